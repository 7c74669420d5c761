/// Human-readable description of a failed platform call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PlatformError(String);

impl PlatformError {
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }
}

impl From<nix::errno::Errno> for PlatformError {
    fn from(errno: nix::errno::Errno) -> Self {
        Self(errno.desc().to_string())
    }
}

/// Creation and exit timestamps of a process, in backend ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifetime {
    pub created_at: u64,
    pub exited_at: u64,
}

impl Lifetime {
    pub fn elapsed(&self) -> u64 {
        self.exited_at.saturating_sub(self.created_at)
    }
}

/// Totals over every process that ever belonged to a tracking group, terminated ones included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupAccounting {
    /// User-mode time, in backend ticks
    pub user_time: u64,
    /// Kernel-mode time, in backend ticks
    pub kernel_time: u64,
    pub page_faults: u64,
    /// Members still alive when the group was queried
    pub active_processes: u32,
}

/// The OS primitives the supervisor is built on.
///
/// `Process` and `Group` are owned handles: dropping them releases the underlying OS resources.
pub trait ProcessBackend {
    type Process;
    type Group;

    /// Number of ticks in one second for every time value returned by this backend
    fn ticks_per_second(&self) -> u64;

    /// Start `command_line` in a state where it cannot run any instruction yet
    fn launch_held(&mut self, command_line: &str) -> Result<Self::Process, PlatformError>;

    fn create_group(&mut self) -> Result<Self::Group, PlatformError>;

    /// Make `process` a member of `group`. The process must still be held.
    fn attach(
        &mut self,
        group: &mut Self::Group,
        process: &Self::Process,
    ) -> Result<(), PlatformError>;

    /// Let a held process run
    fn resume(&mut self, process: &mut Self::Process) -> Result<(), PlatformError>;

    /// Block until `process` terminates. Does not wait for its descendants.
    fn wait_for_exit(&mut self, process: &mut Self::Process) -> Result<(), PlatformError>;

    fn exit_status(&mut self, process: &Self::Process) -> Result<i32, PlatformError>;

    fn lifetime_timestamps(&mut self, process: &Self::Process) -> Result<Lifetime, PlatformError>;

    fn query_aggregate(&mut self, group: &Self::Group) -> Result<GroupAccounting, PlatformError>;
}
