//! The pid-by-role table of the manager's three children.
//!
//! Only the manager mutates this table, and only on its own thread: a pid
//! is recorded when the fork succeeds and cleared exactly when waitpid
//! reports that pid.

use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    ServiceManager,
    Cyclog,
    ControlHelper,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::ServiceManager => "service-manager",
            Role::Cyclog => "cyclog",
            Role::ControlHelper => "system-control",
        }
    }
}

/// How a reaped child ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildTermination {
    Exit(i32),
    Signal(nix::sys::signal::Signal),
}

impl ChildTermination {
    /// Abnormal means signalled or a non-zero exit.
    pub fn abnormal(&self) -> bool {
        match self {
            ChildTermination::Exit(code) => *code != 0,
            ChildTermination::Signal(_) => true,
        }
    }
}

impl std::fmt::Display for ChildTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ChildTermination::Exit(code) => write!(f, "status {code}"),
            ChildTermination::Signal(sig) => write!(f, "signal {sig}"),
        }
    }
}

#[derive(Default)]
pub struct ChildTable {
    service_manager: Option<Pid>,
    cyclog: Option<Pid>,
    control_helper: Option<Pid>,
}

impl ChildTable {
    pub fn pid(&self, role: Role) -> Option<Pid> {
        match role {
            Role::ServiceManager => self.service_manager,
            Role::Cyclog => self.cyclog,
            Role::ControlHelper => self.control_helper,
        }
    }

    pub fn has(&self, role: Role) -> bool {
        self.pid(role).is_some()
    }

    pub fn set(&mut self, role: Role, pid: Pid) {
        let slot = match role {
            Role::ServiceManager => &mut self.service_manager,
            Role::Cyclog => &mut self.cyclog,
            Role::ControlHelper => &mut self.control_helper,
        };
        debug_assert!(slot.is_none(), "role already has a live pid");
        *slot = Some(pid);
    }

    /// Clear whichever role owns `pid`, reporting which one it was.
    pub fn clear_pid(&mut self, pid: Pid) -> Option<Role> {
        if self.service_manager == Some(pid) {
            self.service_manager = None;
            Some(Role::ServiceManager)
        } else if self.cyclog == Some(pid) {
            self.cyclog = None;
            Some(Role::Cyclog)
        } else if self.control_helper == Some(pid) {
            self.control_helper = None;
            Some(Role::ControlHelper)
        } else {
            None
        }
    }
}

/// Reap every currently waitable child without blocking.
pub fn reap_exited() -> Vec<(Pid, ChildTermination)> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => reaped.push((pid, ChildTermination::Exit(code))),
            Ok(WaitStatus::Signaled(pid, sig, _core)) => {
                reaped.push((pid, ChildTermination::Signal(sig)))
            }
            Ok(WaitStatus::StillAlive) => break,
            // Stop/continue notifications are of no interest here.
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    reaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_most_one_pid_per_role() {
        let mut t = ChildTable::default();
        assert!(!t.has(Role::Cyclog));
        t.set(Role::Cyclog, Pid::from_raw(100));
        assert!(t.has(Role::Cyclog));
        assert_eq!(t.pid(Role::Cyclog), Some(Pid::from_raw(100)));
        assert_eq!(t.clear_pid(Pid::from_raw(100)), Some(Role::Cyclog));
        assert!(!t.has(Role::Cyclog));
    }

    #[test]
    fn test_clear_unknown_pid() {
        let mut t = ChildTable::default();
        t.set(Role::ServiceManager, Pid::from_raw(7));
        assert_eq!(t.clear_pid(Pid::from_raw(8)), None);
        assert!(t.has(Role::ServiceManager));
    }

    #[test]
    fn test_termination_abnormality() {
        assert!(!ChildTermination::Exit(0).abnormal());
        assert!(ChildTermination::Exit(1).abnormal());
        assert!(ChildTermination::Signal(nix::sys::signal::Signal::SIGKILL).abnormal());
    }
}
