//! The shutdown finalizer: the manager's only successful way out.

use crate::platform::{self, FinalAction};
use crate::signals::IntentSet;

/// Select the reboot variant from whichever fast intent is latched.
/// With none latched the default is a reboot.
pub fn final_action(intents: &IntentSet) -> FinalAction {
    if intents.fast_poweroff {
        FinalAction::Poweroff
    } else if intents.fast_halt {
        FinalAction::Halt
    } else {
        FinalAction::Reboot
    }
}

/// Sync and issue the final reboot syscall.  Skipped entirely inside a
/// jail, where the syscall would affect the host.  Returns only on failure.
pub fn finalize(prog: &str, intents: &IntentSet) {
    nix::unistd::sync();
    if platform::am_in_jail() {
        return;
    }
    // The BSD reboot system call already implies a sync; the Linux one
    // does not.
    #[cfg(target_os = "linux")]
    nix::unistd::sync();

    let error = platform::reboot_final(final_action(intents));
    eprintln!("{prog}: FATAL: reboot: {error}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::Intent;

    #[test]
    fn test_action_selection() {
        let mut intents = IntentSet::default();
        assert_eq!(final_action(&intents), FinalAction::Reboot);
        intents.latch(Intent::FastHalt);
        assert_eq!(final_action(&intents), FinalAction::Halt);
        intents.latch(Intent::FastPoweroff);
        // Poweroff wins over halt when both are latched.
        assert_eq!(final_action(&intents), FinalAction::Poweroff);
        let mut intents = IntentSet::default();
        intents.latch(Intent::FastReboot);
        assert_eq!(final_action(&intents), FinalAction::Reboot);
    }
}
