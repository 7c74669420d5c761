//! Linux implementation of the process primitives.
//!
//! Linux has no job objects. The supervisor marks itself as a child subreaper instead: every
//! descendant orphaned by the death of its parent is reparented to the supervisor rather than to
//! init, so the whole tree stays below the supervisor and its usage ends up in the supervisor's
//! `RUSAGE_CHILDREN` once reaped.

use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

use nix::errno::Errno;
use nix::sys::resource::{UsageWho, getrusage};
use nix::sys::signal::{Signal, kill};
use nix::sys::time::{TimeVal, TimeValLike};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::time::{ClockId, clock_gettime};
use nix::unistd::{ForkResult, Pid, fork, getpid};

use super::interfaces::{GroupAccounting, Lifetime, PlatformError, ProcessBackend};
use crate::prelude::*;

const NANOS_PER_SECOND: u64 = 1_000_000_000;
/// Exit code of the child when `execv` fails after the fork, as shells do
const EXEC_FAILED_EXIT_CODE: i32 = 127;
/// Offset added to the signal number when the primary process is killed by a signal
const SIGNAL_EXIT_CODE_BASE: i32 = 128;

impl From<procfs::ProcError> for PlatformError {
    fn from(err: procfs::ProcError) -> Self {
        PlatformError::new(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    /// Stopped before `execv`
    Held,
    Running,
    Exited { status: WaitStatus, at: u64 },
}

pub struct LinuxProcess {
    pid: Pid,
    created_at: u64,
    state: ProcessState,
}

impl Drop for LinuxProcess {
    fn drop(&mut self) {
        // A process that never ran any of its own code can be discarded, the others are left alone
        if self.state == ProcessState::Held {
            debug!("Killing never resumed process {}", self.pid);
            let _ = kill(self.pid, Signal::SIGKILL);
            let _ = waitpid_retrying(self.pid, None);
        }
    }
}

/// Accounting of the reaped descendants of the supervisor
#[derive(Debug, Clone, Copy, Default)]
struct ChildrenUsage {
    user_time: u64,
    kernel_time: u64,
    page_faults: u64,
}

impl ChildrenUsage {
    fn current() -> Result<Self, PlatformError> {
        let usage = getrusage(UsageWho::RUSAGE_CHILDREN)?;
        let page_faults = usage.minor_page_faults() + usage.major_page_faults();

        Ok(Self {
            user_time: timeval_to_nanos(usage.user_time()),
            kernel_time: timeval_to_nanos(usage.system_time()),
            page_faults: page_faults.max(0) as u64,
        })
    }

    fn since(&self, baseline: &ChildrenUsage) -> Self {
        Self {
            user_time: self.user_time.saturating_sub(baseline.user_time),
            kernel_time: self.kernel_time.saturating_sub(baseline.kernel_time),
            page_faults: self.page_faults.saturating_sub(baseline.page_faults),
        }
    }
}

pub struct LinuxGroup {
    root: Option<Pid>,
    /// Usage of the children reaped before the group existed
    baseline: ChildrenUsage,
    /// Descendants of the supervisor that existed before the group, they are never members
    outsiders: HashSet<i32>,
}

impl Drop for LinuxGroup {
    fn drop(&mut self) {
        if let Err(err) = set_child_subreaper(false) {
            warn!("Failed to clear the child subreaper flag: {err}");
        }
    }
}

#[derive(Debug, Default)]
pub struct LinuxBackend;

impl LinuxBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessBackend for LinuxBackend {
    type Process = LinuxProcess;
    type Group = LinuxGroup;

    fn ticks_per_second(&self) -> u64 {
        NANOS_PER_SECOND
    }

    fn launch_held(&mut self, command_line: &str) -> Result<LinuxProcess, PlatformError> {
        let argv = shell_words::split(command_line)
            .map_err(|err| PlatformError::new(format!("Invalid command line: {err}")))?;
        let Some(program) = argv.first() else {
            return Err(PlatformError::new("Empty command line"));
        };
        let path = which::which(program)
            .map_err(|err| PlatformError::new(format!("{program}: {err}")))?;
        debug!("Resolved {program} to {}", path.display());

        // Everything the child needs is allocated before the fork
        let path = to_cstring(path.as_os_str().as_bytes())?;
        let argv = argv
            .iter()
            .map(|arg| to_cstring(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        let created_at = monotonic_now()?;
        // SAFETY: the child only makes async-signal-safe calls until it execs or exits
        match unsafe { fork() }? {
            ForkResult::Child => unsafe {
                libc::raise(libc::SIGSTOP);
                libc::execv(path.as_ptr(), argv_ptrs.as_ptr());
                libc::_exit(EXEC_FAILED_EXIT_CODE)
            },
            ForkResult::Parent { child } => {
                let mut process = LinuxProcess {
                    pid: child,
                    created_at,
                    state: ProcessState::Held,
                };

                match waitpid_retrying(child, Some(WaitPidFlag::WUNTRACED))? {
                    WaitStatus::Stopped(_, Signal::SIGSTOP) => {
                        debug!("Process {child} is held before exec");
                        Ok(process)
                    }
                    status => {
                        if matches!(status, WaitStatus::Exited(..) | WaitStatus::Signaled(..)) {
                            process.state = ProcessState::Exited {
                                status,
                                at: monotonic_now()?,
                            };
                        }
                        Err(PlatformError::new(format!(
                            "Process {child} did not stop before exec: {status:?}"
                        )))
                    }
                }
            }
        }
    }

    fn create_group(&mut self) -> Result<LinuxGroup, PlatformError> {
        set_child_subreaper(true)?;
        let mut group = LinuxGroup {
            root: None,
            baseline: ChildrenUsage::default(),
            outsiders: HashSet::new(),
        };
        group.outsiders = ProcessTree::snapshot()?
            .descendants(getpid(), &HashSet::new())
            .map(|entry| entry.pid)
            .collect();
        group.baseline = ChildrenUsage::current()?;
        Ok(group)
    }

    fn attach(&mut self, group: &mut LinuxGroup, process: &LinuxProcess) -> Result<(), PlatformError> {
        if let Some(root) = group.root {
            return Err(PlatformError::new(format!(
                "The tracking group already belongs to process {root}"
            )));
        }
        if process.state != ProcessState::Held {
            return Err(PlatformError::new(format!(
                "Process {} is already running",
                process.pid
            )));
        }

        let stat = procfs::process::Process::new(process.pid.as_raw())?.stat()?;
        if stat.ppid != getpid().as_raw() {
            return Err(PlatformError::new(format!(
                "Process {} is not a child of the supervisor",
                process.pid
            )));
        }
        if stat.state != 'T' {
            return Err(PlatformError::new(format!(
                "Process {} is not stopped (state {})",
                process.pid, stat.state
            )));
        }

        // The held process was launched before the group was created
        group.outsiders.remove(&process.pid.as_raw());
        group.root = Some(process.pid);
        Ok(())
    }

    fn resume(&mut self, process: &mut LinuxProcess) -> Result<(), PlatformError> {
        kill(process.pid, Signal::SIGCONT)?;
        process.state = ProcessState::Running;
        Ok(())
    }

    fn wait_for_exit(&mut self, process: &mut LinuxProcess) -> Result<(), PlatformError> {
        if matches!(process.state, ProcessState::Exited { .. }) {
            return Ok(());
        }

        loop {
            match waitpid_retrying(process.pid, None)? {
                status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => {
                    process.state = ProcessState::Exited {
                        status,
                        at: monotonic_now()?,
                    };
                    return Ok(());
                }
                status => trace!("Ignoring wait status {status:?}"),
            }
        }
    }

    fn exit_status(&mut self, process: &LinuxProcess) -> Result<i32, PlatformError> {
        match process.state {
            ProcessState::Exited {
                status: WaitStatus::Exited(_, code),
                ..
            } => Ok(code),
            ProcessState::Exited {
                status: WaitStatus::Signaled(_, signal, _),
                ..
            } => Ok(SIGNAL_EXIT_CODE_BASE + signal as i32),
            _ => Err(PlatformError::new(format!(
                "Process {} has not exited",
                process.pid
            ))),
        }
    }

    fn lifetime_timestamps(&mut self, process: &LinuxProcess) -> Result<Lifetime, PlatformError> {
        match process.state {
            ProcessState::Exited { at, .. } => Ok(Lifetime {
                created_at: process.created_at,
                exited_at: at,
            }),
            _ => Err(PlatformError::new(format!(
                "Process {} has not exited",
                process.pid
            ))),
        }
    }

    fn query_aggregate(&mut self, group: &LinuxGroup) -> Result<GroupAccounting, PlatformError> {
        if group.root.is_none() {
            return Err(PlatformError::new("No process attached to the tracking group"));
        }

        let supervisor = getpid();
        let mut active_processes = 0;
        for entry in ProcessTree::snapshot()?.descendants(supervisor, &group.outsiders) {
            if !entry.is_zombie() {
                active_processes += 1;
            } else if entry.ppid == supervisor.as_raw() {
                reap_terminated_child(Pid::from_raw(entry.pid))?;
            }
        }
        let usage = ChildrenUsage::current()?.since(&group.baseline);

        Ok(GroupAccounting {
            user_time: usage.user_time,
            kernel_time: usage.kernel_time,
            page_faults: usage.page_faults,
            active_processes,
        })
    }
}

fn to_cstring(bytes: &[u8]) -> Result<CString, PlatformError> {
    CString::new(bytes).map_err(|_| PlatformError::new("Command line contains a NUL byte"))
}

fn monotonic_now() -> Result<u64, PlatformError> {
    let now = clock_gettime(ClockId::CLOCK_MONOTONIC)?;
    Ok(now.num_nanoseconds() as u64)
}

fn timeval_to_nanos(value: TimeVal) -> u64 {
    value.num_microseconds().max(0) as u64 * 1_000
}

fn waitpid_retrying(pid: Pid, flags: Option<WaitPidFlag>) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, flags) {
            Err(Errno::EINTR) => continue,
            result => return result,
        }
    }
}

fn set_child_subreaper(enabled: bool) -> nix::Result<()> {
    // SAFETY: PR_SET_CHILD_SUBREAPER only reads its integer argument
    let ret = unsafe {
        libc::prctl(
            libc::PR_SET_CHILD_SUBREAPER,
            libc::c_ulong::from(enabled),
            0,
            0,
            0,
        )
    };
    Errno::result(ret).map(drop)
}

/// Reap a member that was reparented to the supervisor and has already exited, so its usage is
/// added to `RUSAGE_CHILDREN`
fn reap_terminated_child(pid: Pid) -> Result<(), PlatformError> {
    match waitpid_retrying(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => {
            trace!("Reaped orphaned descendant: {status:?}");
            Ok(())
        }
        // Already reaped elsewhere
        Err(Errno::ECHILD) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Clone, Copy)]
struct ProcessEntry {
    pid: i32,
    ppid: i32,
    state: char,
}

impl ProcessEntry {
    fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }
}

/// Parent to children view of the process table
struct ProcessTree {
    children: HashMap<i32, Vec<ProcessEntry>>,
}

impl ProcessTree {
    fn snapshot() -> Result<Self, PlatformError> {
        let mut children: HashMap<i32, Vec<ProcessEntry>> = HashMap::new();
        for process in procfs::process::all_processes()? {
            // Processes can exit while the table is being walked
            let Ok(stat) = process.and_then(|process| process.stat()) else {
                continue;
            };
            children.entry(stat.ppid).or_default().push(ProcessEntry {
                pid: stat.pid,
                ppid: stat.ppid,
                state: stat.state,
            });
        }
        Ok(Self { children })
    }

    /// Every process below `ancestor`, zombies included, leaving out the `excluded` processes
    /// along with their own descendants
    fn descendants<'a>(
        &'a self,
        ancestor: Pid,
        excluded: &'a HashSet<i32>,
    ) -> impl Iterator<Item = ProcessEntry> + 'a {
        let mut pending = vec![ancestor.as_raw()];
        std::iter::from_fn(move || {
            while let Some(pid) = pending.pop() {
                let Some(direct_children) = self.children.get(&pid) else {
                    continue;
                };
                let members: Vec<ProcessEntry> = direct_children
                    .iter()
                    .filter(|entry| !excluded.contains(&entry.pid))
                    .copied()
                    .collect();
                pending.extend(members.iter().map(|entry| entry.pid));
                if !members.is_empty() {
                    return Some(members);
                }
            }
            None
        })
        .flatten()
    }
}
