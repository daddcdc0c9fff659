use crate::target::error::Error;
use nix::unistd::Pid;
use std::fmt::{Display, Formatter};
use sysinfo::{RefreshKind, System};

/// Process chosen for a dump. It is never modified or terminated by a dump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetProcess {
    pub pid: Pid,
    /// Human readable name, used in reports.
    pub name: String,
}

impl TargetProcess {
    pub fn new(pid: Pid, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }

    /// Find a running process by its pid.
    pub fn from_pid(pid: Pid) -> Result<Self, Error> {
        let sys =
            System::new_with_specifics(RefreshKind::everything().without_cpu().without_memory());
        let process = System::process(&sys, sysinfo::Pid::from_u32(pid.as_raw() as u32))
            .ok_or(Error::AttachedProcessNotFound(pid))?;

        Ok(Self::new(pid, process.name()))
    }

    /// Describe a child process spawned by the current one.
    pub fn from_child(child: &std::process::Child) -> Result<Self, Error> {
        Self::from_pid(Pid::from_raw(child.id() as i32))
    }
}

impl Display for TargetProcess {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.pid)
    }
}
