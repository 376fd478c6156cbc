//! Signal event source and intent classification.
//!
//! Signals never run logic in handlers.  The one blocking point of the
//! manager is [`SignalSource::wait_one`]; everything a signal means is
//! expressed by latching an [`Intent`] into the owned [`IntentSet`] that the
//! manager loop threads through each turn.  Latches are idempotent: any
//! number of deliveries of the same signal between two waits leaves exactly
//! one latched intent.

use log::warn;
use signal_hook::iterator::Signals;

use crate::platform;

/// What a received signal asks the manager to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    SysInit,
    Normal,
    Rescue,
    Emergency,
    Halt,
    Poweroff,
    Reboot,
    PowerFailed,
    KbRequest,
    SecureAttention,
    Child,
    FastHalt,
    FastPoweroff,
    FastReboot,
    Unknown,
}

/// The latched intents, threaded through the manager loop by value.
#[derive(Default)]
pub struct IntentSet {
    pub sysinit: bool,
    /// Latched implicitly at manager start; never re-latched by a signal.
    pub init: bool,
    pub normal: bool,
    pub child: bool,
    pub rescue: bool,
    pub emergency: bool,
    pub halt: bool,
    pub poweroff: bool,
    pub reboot: bool,
    pub power_failed: bool,
    pub kbrequest: bool,
    pub secure_attention: bool,
    pub fast_halt: bool,
    pub fast_poweroff: bool,
    pub fast_reboot: bool,
    pub unknown: bool,
}

impl IntentSet {
    pub fn at_boot() -> Self {
        IntentSet {
            init: true,
            ..IntentSet::default()
        }
    }

    pub fn latch(&mut self, intent: Intent) {
        match intent {
            Intent::SysInit => self.sysinit = true,
            Intent::Normal => self.normal = true,
            Intent::Rescue => self.rescue = true,
            Intent::Emergency => self.emergency = true,
            Intent::Halt => self.halt = true,
            Intent::Poweroff => self.poweroff = true,
            Intent::Reboot => self.reboot = true,
            Intent::PowerFailed => self.power_failed = true,
            Intent::KbRequest => self.kbrequest = true,
            Intent::SecureAttention => self.secure_attention = true,
            Intent::Child => self.child = true,
            Intent::FastHalt => self.fast_halt = true,
            Intent::FastPoweroff => self.fast_poweroff = true,
            Intent::FastReboot => self.fast_reboot = true,
            Intent::Unknown => self.unknown = true,
        }
    }

    /// Whether any of the fast shutdown family is latched.
    pub fn stop_signalled(&self) -> bool {
        self.fast_halt || self.fast_poweroff || self.fast_reboot
    }

    /// Pop the highest-priority control-helper job, clearing its latch.
    /// Priority: sysinit, normal, rescue, emergency, halt, poweroff,
    /// reboot, power-failed, kbrequest, secure-attention.
    pub fn take_helper_job(&mut self) -> Option<(&'static str, &'static str)> {
        if self.sysinit {
            self.sysinit = false;
            Some(("start", "sysinit"))
        } else if self.normal {
            self.normal = false;
            Some(("start", "normal"))
        } else if self.rescue {
            self.rescue = false;
            Some(("start", "rescue"))
        } else if self.emergency {
            self.emergency = false;
            Some(("activate", "emergency"))
        } else if self.halt {
            self.halt = false;
            Some(("start", "halt"))
        } else if self.poweroff {
            self.poweroff = false;
            Some(("start", "poweroff"))
        } else if self.reboot {
            self.reboot = false;
            Some(("start", "reboot"))
        } else if self.power_failed {
            self.power_failed = false;
            Some(("activate", "powerfail"))
        } else if self.kbrequest {
            self.kbrequest = false;
            Some(("activate", "kbrequest"))
        } else if self.secure_attention {
            self.secure_attention = false;
            Some(("activate", "secure-attention-key"))
        } else {
            None
        }
    }
}

/* Classification ***********************************************************/

fn classify_rt_system(offset: i32) -> Intent {
    match offset {
        platform::RT_NORMAL => Intent::Normal,
        platform::RT_RESCUE => Intent::Rescue,
        platform::RT_EMERGENCY => Intent::Emergency,
        platform::RT_HALT => Intent::Halt,
        platform::RT_POWEROFF => Intent::Poweroff,
        platform::RT_REBOOT => Intent::Reboot,
        platform::RT_SYSINIT => Intent::SysInit,
        platform::RT_FORCE_HALT => Intent::FastHalt,
        platform::RT_FORCE_POWEROFF => Intent::FastPoweroff,
        platform::RT_FORCE_REBOOT => Intent::FastReboot,
        _ => Intent::Unknown,
    }
}

fn classify_rt_user(offset: i32) -> Intent {
    match offset {
        platform::RT_NORMAL | platform::RT_RESCUE | platform::RT_EMERGENCY => Intent::Normal,
        platform::RT_HALT | platform::RT_POWEROFF | platform::RT_REBOOT => Intent::Halt,
        platform::RT_SYSINIT => Intent::SysInit,
        platform::RT_FORCE_HALT | platform::RT_FORCE_POWEROFF | platform::RT_FORCE_REBOOT => {
            Intent::FastHalt
        }
        _ => Intent::Unknown,
    }
}

fn rt_offset_of(signo: i32) -> Option<i32> {
    let base = platform::rt_signal(0)?;
    if signo >= base { Some(signo - base) } else { None }
}

/// Classify for the system role.  `None` means received-and-discarded.
pub fn classify_system(signo: i32) -> Option<Intent> {
    match signo {
        s if s == libc::SIGCHLD => return Some(Intent::Child),
        s if s == libc::SIGWINCH => return Some(Intent::KbRequest),
        _ => {}
    }
    #[cfg(target_os = "linux")]
    {
        if signo == libc::SIGPWR {
            return Some(Intent::PowerFailed);
        }
        // Reserved by the kernel for process #1 on Linux.
        if signo == libc::SIGTERM {
            return None;
        }
    }
    #[cfg(any(
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        match signo {
            s if s == platform::bsd_named::RESCUE_SIGNAL => return Some(Intent::Rescue),
            s if s == platform::bsd_named::HALT_SIGNAL => return Some(Intent::Halt),
            s if s == platform::bsd_named::POWEROFF_SIGNAL => return Some(Intent::Poweroff),
            s if s == platform::bsd_named::REBOOT_SIGNAL => return Some(Intent::Reboot),
            _ => {}
        }
    }
    if Some(signo) == platform::SAK_SIGNAL {
        return Some(Intent::SecureAttention);
    }
    match rt_offset_of(signo) {
        Some(offset) => Some(classify_rt_system(offset)),
        None => Some(Intent::Unknown),
    }
}

/// Classify for the per-user role.
pub fn classify_user(signo: i32) -> Option<Intent> {
    match signo {
        s if s == libc::SIGCHLD => return Some(Intent::Child),
        s if s == libc::SIGINT || s == libc::SIGTERM || s == libc::SIGHUP || s == libc::SIGPIPE => {
            return Some(Intent::Halt);
        }
        _ => {}
    }
    match rt_offset_of(signo) {
        Some(offset) => Some(classify_rt_user(offset)),
        None => Some(Intent::Unknown),
    }
}

/* Event source *************************************************************/

/// The single kernel event queue of the manager.
pub struct SignalSource {
    signals: Signals,
}

impl SignalSource {
    pub fn new_system() -> Result<Self, std::io::Error> {
        Ok(SignalSource {
            signals: Signals::new(platform::system_control_signals())?,
        })
    }

    pub fn new_user() -> Result<Self, std::io::Error> {
        Ok(SignalSource {
            signals: Signals::new(platform::user_control_signals())?,
        })
    }

    /// Block until at least one registered signal has been delivered, then
    /// drain everything currently pending.  EINTR never surfaces.
    pub fn wait_one(&mut self) -> Vec<i32> {
        loop {
            let batch: Vec<i32> = self.signals.wait().collect();
            if !batch.is_empty() {
                return batch;
            }
            // A close of the internal waker wakes us with nothing pending;
            // treat it like EINTR and wait again.
        }
    }
}

/// Latch one intent per signal into `intents`, logging unknowns once.
pub fn latch_all(
    intents: &mut IntentSet,
    batch: &[i32],
    classify: fn(i32) -> Option<Intent>,
) {
    for &signo in batch {
        if let Some(intent) = classify(signo) {
            if intent == Intent::Unknown && !intents.unknown {
                warn!("Unknown signal {signo} ignored.");
            }
            intents.latch(intent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_classification_basics() {
        assert_eq!(classify_system(libc::SIGCHLD), Some(Intent::Child));
        assert_eq!(classify_system(libc::SIGWINCH), Some(Intent::KbRequest));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_classification_linux() {
        assert_eq!(classify_system(libc::SIGPWR), Some(Intent::PowerFailed));
        assert_eq!(classify_system(libc::SIGTERM), None);
        let rt = |o| libc::SIGRTMIN() + o;
        assert_eq!(classify_system(rt(0)), Some(Intent::Normal));
        assert_eq!(classify_system(rt(1)), Some(Intent::Rescue));
        assert_eq!(classify_system(rt(2)), Some(Intent::Emergency));
        assert_eq!(classify_system(rt(3)), Some(Intent::Halt));
        assert_eq!(classify_system(rt(4)), Some(Intent::Poweroff));
        assert_eq!(classify_system(rt(5)), Some(Intent::Reboot));
        assert_eq!(classify_system(rt(10)), Some(Intent::SysInit));
        assert_eq!(classify_system(rt(13)), Some(Intent::FastHalt));
        assert_eq!(classify_system(rt(14)), Some(Intent::FastPoweroff));
        assert_eq!(classify_system(rt(15)), Some(Intent::FastReboot));
        assert_eq!(classify_system(rt(7)), Some(Intent::Unknown));
    }

    #[test]
    fn test_user_classification_terminal_family() {
        for signo in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGPIPE] {
            assert_eq!(classify_user(signo), Some(Intent::Halt));
        }
        assert_eq!(classify_user(libc::SIGCHLD), Some(Intent::Child));
        assert_eq!(classify_user(libc::SIGWINCH), Some(Intent::Unknown));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_user_classification_rt_folding() {
        let rt = |o| libc::SIGRTMIN() + o;
        assert_eq!(classify_user(rt(1)), Some(Intent::Normal));
        assert_eq!(classify_user(rt(4)), Some(Intent::Halt));
        assert_eq!(classify_user(rt(14)), Some(Intent::FastHalt));
    }

    #[test]
    fn test_latch_is_idempotent() {
        let mut intents = IntentSet::default();
        for _ in 0..5 {
            intents.latch(Intent::Reboot);
        }
        assert!(intents.reboot);
        let job = intents.take_helper_job();
        assert_eq!(job, Some(("start", "reboot")));
        // The latch is consumed exactly once.
        assert_eq!(intents.take_helper_job(), None);
    }

    #[test]
    fn test_helper_job_priority_order() {
        let mut intents = IntentSet::default();
        intents.latch(Intent::Reboot);
        intents.latch(Intent::Rescue);
        intents.latch(Intent::SysInit);
        assert_eq!(intents.take_helper_job(), Some(("start", "sysinit")));
        assert_eq!(intents.take_helper_job(), Some(("start", "rescue")));
        assert_eq!(intents.take_helper_job(), Some(("start", "reboot")));
        assert_eq!(intents.take_helper_job(), None);
    }

    #[test]
    fn test_activate_verbs() {
        let mut intents = IntentSet::default();
        intents.latch(Intent::Emergency);
        assert_eq!(intents.take_helper_job(), Some(("activate", "emergency")));
        intents.latch(Intent::PowerFailed);
        assert_eq!(intents.take_helper_job(), Some(("activate", "powerfail")));
        intents.latch(Intent::KbRequest);
        assert_eq!(intents.take_helper_job(), Some(("activate", "kbrequest")));
        intents.latch(Intent::SecureAttention);
        assert_eq!(
            intents.take_helper_job(),
            Some(("activate", "secure-attention-key"))
        );
    }

    #[test]
    fn test_stop_signalled() {
        let mut intents = IntentSet::at_boot();
        assert!(intents.init);
        assert!(!intents.stop_signalled());
        intents.latch(Intent::FastReboot);
        assert!(intents.stop_signalled());
    }
}
