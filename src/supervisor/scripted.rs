//! A backend replaying scripted answers, so the supervisor can be exercised without spawning
//! anything.

use std::cell::RefCell;
use std::rc::Rc;

use super::interfaces::{GroupAccounting, Lifetime, PlatformError, ProcessBackend};

/// 100 ns ticks
pub const TICKS_PER_SECOND: u64 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Launch(String),
    CreateGroup,
    Attach,
    Resume,
    Wait,
    ExitStatus,
    LifetimeTimestamps,
    QueryAggregate,
    ReleaseGroup,
    ReleaseProcess,
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Call>>>);

impl Journal {
    fn record(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }
}

pub struct ScriptedProcess {
    journal: Journal,
}

impl Drop for ScriptedProcess {
    fn drop(&mut self) {
        self.journal.record(Call::ReleaseProcess);
    }
}

pub struct ScriptedGroup {
    journal: Journal,
}

impl Drop for ScriptedGroup {
    fn drop(&mut self) {
        self.journal.record(Call::ReleaseGroup);
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    pub launch: Result<(), PlatformError>,
    pub create_group: Result<(), PlatformError>,
    pub attach: Result<(), PlatformError>,
    pub resume: Result<(), PlatformError>,
    pub wait: Result<(), PlatformError>,
    pub exit_status: Result<i32, PlatformError>,
    pub lifetime: Result<Lifetime, PlatformError>,
    pub accounting: Result<GroupAccounting, PlatformError>,
    pub journal: Journal,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            launch: Ok(()),
            create_group: Ok(()),
            attach: Ok(()),
            resume: Ok(()),
            wait: Ok(()),
            exit_status: Ok(0),
            lifetime: Ok(Lifetime::default()),
            accounting: Ok(GroupAccounting::default()),
            journal: Journal::default(),
        }
    }
}

pub fn seconds(value: f64) -> u64 {
    (value * TICKS_PER_SECOND as f64).round() as u64
}

pub fn failure(description: &str) -> PlatformError {
    PlatformError::new(description)
}

impl ScriptedBackend {
    /// A primary process exiting with `exit_code` after the given wall clock, user and kernel
    /// times, in seconds
    pub fn exiting_with(exit_code: i32, wall_clock: f64, user: f64, kernel: f64) -> Self {
        Self {
            exit_status: Ok(exit_code),
            lifetime: Ok(Lifetime {
                created_at: seconds(1_000.0),
                exited_at: seconds(1_000.0 + wall_clock),
            }),
            accounting: Ok(GroupAccounting {
                user_time: seconds(user),
                kernel_time: seconds(kernel),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn with_page_faults(mut self, page_faults: u64) -> Self {
        if let Ok(accounting) = self.accounting.as_mut() {
            accounting.page_faults = page_faults;
        }
        self
    }

    pub fn with_active_processes(mut self, active_processes: u32) -> Self {
        if let Ok(accounting) = self.accounting.as_mut() {
            accounting.active_processes = active_processes;
        }
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl ProcessBackend for ScriptedBackend {
    type Process = ScriptedProcess;
    type Group = ScriptedGroup;

    fn ticks_per_second(&self) -> u64 {
        TICKS_PER_SECOND
    }

    fn launch_held(&mut self, command_line: &str) -> Result<ScriptedProcess, PlatformError> {
        self.journal.record(Call::Launch(command_line.to_string()));
        self.launch.clone().map(|()| ScriptedProcess {
            journal: self.journal.clone(),
        })
    }

    fn create_group(&mut self) -> Result<ScriptedGroup, PlatformError> {
        self.journal.record(Call::CreateGroup);
        self.create_group.clone().map(|()| ScriptedGroup {
            journal: self.journal.clone(),
        })
    }

    fn attach(
        &mut self,
        _group: &mut ScriptedGroup,
        _process: &ScriptedProcess,
    ) -> Result<(), PlatformError> {
        self.journal.record(Call::Attach);
        self.attach.clone()
    }

    fn resume(&mut self, _process: &mut ScriptedProcess) -> Result<(), PlatformError> {
        self.journal.record(Call::Resume);
        self.resume.clone()
    }

    fn wait_for_exit(&mut self, _process: &mut ScriptedProcess) -> Result<(), PlatformError> {
        self.journal.record(Call::Wait);
        self.wait.clone()
    }

    fn exit_status(&mut self, _process: &ScriptedProcess) -> Result<i32, PlatformError> {
        self.journal.record(Call::ExitStatus);
        self.exit_status.clone()
    }

    fn lifetime_timestamps(&mut self, _process: &ScriptedProcess) -> Result<Lifetime, PlatformError> {
        self.journal.record(Call::LifetimeTimestamps);
        self.lifetime.clone()
    }

    fn query_aggregate(&mut self, _group: &ScriptedGroup) -> Result<GroupAccounting, PlatformError> {
        self.journal.record(Call::QueryAggregate);
        self.accounting.clone()
    }
}
