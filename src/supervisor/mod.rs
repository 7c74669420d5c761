//! Launch a process tree and measure it as a whole.
//!
//! The [`Supervisor`] drives a [`ProcessBackend`] through a fixed sequence: held launch, group
//! creation, attachment, resume, wait, then accounting queries. The order matters: the primary
//! process joins its tracking group before it runs a single instruction, so none of the children
//! it spawns can escape the accounting.

pub mod interfaces;
#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(test)]
pub(crate) mod scripted;


pub use interfaces::{GroupAccounting, Lifetime, PlatformError, ProcessBackend};

use crate::prelude::*;

/// Resource usage of a whole process tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReport {
    /// Measured from the primary process's creation and exit timestamps
    pub wall_clock_seconds: f64,
    /// Summed over the whole group
    pub user_seconds: f64,
    /// Summed over the whole group
    pub kernel_seconds: f64,
    pub page_faults: u64,
    /// Exit status of the primary process only
    pub exit_code: i32,
    /// Group members still alive once the primary process exited
    pub still_active_children: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("Unable to start the process: {0}")]
    LaunchFailed(PlatformError),
    #[error("Unable to create the process tracking group: {0}")]
    GroupCreationFailed(PlatformError),
    #[error("Unable to attach the process to its tracking group: {0}")]
    AttachFailed(PlatformError),
    #[error("Unable to resume the process: {0}")]
    ResumeFailed(PlatformError),
    #[error("Failed waiting for process termination: {0}")]
    WaitFailed(PlatformError),
    #[error("Unable to retrieve the process exit status: {0}")]
    ExitCodeUnavailable(PlatformError),
    #[error("Unable to retrieve the process times: {0}")]
    TimesUnavailable(PlatformError),
    #[error("Unable to query the process tracking group: {0}")]
    GroupQueryFailed(PlatformError),
}

pub struct Supervisor<B: ProcessBackend> {
    backend: B,
}

impl<B: ProcessBackend> Supervisor<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Run `command_line` to completion and collect the resource usage of its process tree.
    ///
    /// Only the primary process is waited for. Descendants still running when it exits are
    /// neither waited for nor killed, they are reported in
    /// [`ResourceReport::still_active_children`].
    ///
    /// Any failure is final, and the group and process handles are released on every path.
    pub fn run_and_measure(&mut self, command_line: &str) -> Result<ResourceReport, SupervisorError> {
        debug!("Launching held process: {command_line}");
        let mut process = self
            .backend
            .launch_held(command_line)
            .map_err(SupervisorError::LaunchFailed)?;

        // Declared after `process` so it is released first
        let mut group = self
            .backend
            .create_group()
            .map_err(SupervisorError::GroupCreationFailed)?;

        self.backend
            .attach(&mut group, &process)
            .map_err(SupervisorError::AttachFailed)?;
        debug!("Process attached to its tracking group, resuming it");

        self.backend
            .resume(&mut process)
            .map_err(SupervisorError::ResumeFailed)?;

        self.backend
            .wait_for_exit(&mut process)
            .map_err(SupervisorError::WaitFailed)?;

        let exit_code = self
            .backend
            .exit_status(&process)
            .map_err(SupervisorError::ExitCodeUnavailable)?;
        debug!("Primary process exited with status {exit_code}");

        let lifetime = self
            .backend
            .lifetime_timestamps(&process)
            .map_err(SupervisorError::TimesUnavailable)?;

        let accounting = self
            .backend
            .query_aggregate(&group)
            .map_err(SupervisorError::GroupQueryFailed)?;
        debug!("Group accounting: {accounting:?}");

        drop(group);
        drop(process);

        let ticks_per_second = self.backend.ticks_per_second() as f64;
        let to_seconds = |ticks: u64| ticks as f64 / ticks_per_second;

        Ok(ResourceReport {
            wall_clock_seconds: to_seconds(lifetime.elapsed()),
            user_seconds: to_seconds(accounting.user_time),
            kernel_seconds: to_seconds(accounting.kernel_time),
            page_faults: accounting.page_faults,
            exit_code,
            still_active_children: accounting.active_processes,
        })
    }
}

/// Warning to surface when part of the process tree outlived the primary process.
pub fn surviving_processes_warning(report: &ResourceReport) -> Option<String> {
    match report.still_active_children {
        0 => None,
        count => Some(format!(
            "there are still {count} alive children processes, their remaining usage is not accounted"
        )),
    }
}
