//! Platform branches, kept behind a narrow surface.
//!
//! Everything that differs between Linux and the BSDs lives here: the
//! control-signal numbering, the reboot syscall variants, hardware-clock
//! conventions, the API mount table, jail detection, and the subreaper
//! request.  The rest of the crate is platform-neutral.

#[cfg(not(target_os = "linux"))]
use std::ffi::CString;

/* Control signal numbering *************************************************/

/// Offset of a real-time control signal, where the platform has them.
#[cfg(target_os = "linux")]
pub fn rt_signal(offset: i32) -> Option<i32> {
    Some(libc::SIGRTMIN() + offset)
}

#[cfg(any(target_os = "freebsd", target_os = "dragonfly", target_os = "netbsd"))]
pub fn rt_signal(offset: i32) -> Option<i32> {
    Some(libc::SIGRTMIN + offset)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd"
)))]
pub fn rt_signal(_offset: i32) -> Option<i32> {
    None
}

/// Real-time offsets of the control alphabet, shared by both roles.
pub const RT_NORMAL: i32 = 0;
pub const RT_RESCUE: i32 = 1;
pub const RT_EMERGENCY: i32 = 2;
pub const RT_HALT: i32 = 3;
pub const RT_POWEROFF: i32 = 4;
pub const RT_REBOOT: i32 = 5;
pub const RT_SYSINIT: i32 = 10;
pub const RT_FORCE_HALT: i32 = 13;
pub const RT_FORCE_POWEROFF: i32 = 14;
pub const RT_FORCE_REBOOT: i32 = 15;

const RT_OFFSETS: &[i32] = &[
    RT_NORMAL,
    RT_RESCUE,
    RT_EMERGENCY,
    RT_HALT,
    RT_POWEROFF,
    RT_REBOOT,
    RT_SYSINIT,
    RT_FORCE_HALT,
    RT_FORCE_POWEROFF,
    RT_FORCE_REBOOT,
];

/// Secure-attention-key notification from the kernel, where one exists.
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
pub const SAK_SIGNAL: Option<i32> = Some(libc::SIGEMT);
#[cfg(not(any(target_os = "freebsd", target_os = "dragonfly")))]
pub const SAK_SIGNAL: Option<i32> = None;

#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
))]
pub mod bsd_named {
    /// Traditional BSD init(8) control signals.
    pub const RESCUE_SIGNAL: i32 = libc::SIGTERM;
    pub const HALT_SIGNAL: i32 = libc::SIGUSR1;
    pub const POWEROFF_SIGNAL: i32 = libc::SIGUSR2;
    pub const REBOOT_SIGNAL: i32 = libc::SIGINT;
}

/// Signals the system-role manager listens for.
pub fn system_control_signals() -> Vec<i32> {
    let mut v = vec![libc::SIGCHLD, libc::SIGWINCH];
    #[cfg(target_os = "linux")]
    {
        v.push(libc::SIGPWR);
        // SIGTERM is reserved by the kernel for process #1 on Linux; it is
        // received and discarded rather than left at the default action.
        v.push(libc::SIGTERM);
    }
    #[cfg(any(
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        v.push(bsd_named::RESCUE_SIGNAL);
        v.push(bsd_named::HALT_SIGNAL);
        v.push(bsd_named::POWEROFF_SIGNAL);
        v.push(bsd_named::REBOOT_SIGNAL);
    }
    if let Some(sak) = SAK_SIGNAL {
        v.push(sak);
    }
    for &off in RT_OFFSETS {
        if let Some(signo) = rt_signal(off) {
            v.push(signo);
        }
    }
    v.sort_unstable();
    v.dedup();
    v
}

/// Signals the per-user manager listens for.
pub fn user_control_signals() -> Vec<i32> {
    let mut v = vec![
        libc::SIGCHLD,
        libc::SIGINT,
        libc::SIGTERM,
        libc::SIGHUP,
        libc::SIGPIPE,
    ];
    for &off in RT_OFFSETS {
        if let Some(signo) = rt_signal(off) {
            v.push(signo);
        }
    }
    v.sort_unstable();
    v.dedup();
    v
}

/* Reboot *******************************************************************/

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalAction {
    Halt,
    Poweroff,
    Reboot,
}

/// Issue the final reboot(2) variant.  Returns only on failure.
pub fn reboot_final(action: FinalAction) -> std::io::Error {
    #[cfg(target_os = "linux")]
    let cmd = match action {
        FinalAction::Halt => libc::LINUX_REBOOT_CMD_HALT,
        FinalAction::Poweroff => libc::LINUX_REBOOT_CMD_POWER_OFF,
        FinalAction::Reboot => libc::LINUX_REBOOT_CMD_RESTART,
    };
    #[cfg(target_os = "linux")]
    unsafe {
        libc::reboot(cmd);
    }

    #[cfg(not(target_os = "linux"))]
    {
        #[cfg(any(target_os = "openbsd", target_os = "netbsd"))]
        let howto = match action {
            FinalAction::Halt => libc::RB_HALT,
            FinalAction::Poweroff => libc::RB_HALT | libc::RB_POWERDOWN,
            FinalAction::Reboot => libc::RB_AUTOBOOT,
        };
        #[cfg(not(any(target_os = "openbsd", target_os = "netbsd")))]
        let howto = match action {
            FinalAction::Halt => libc::RB_HALT,
            FinalAction::Poweroff => libc::RB_HALT | libc::RB_POWEROFF,
            FinalAction::Reboot => libc::RB_AUTOBOOT,
        };
        unsafe {
            libc::reboot(howto);
        }
    }

    std::io::Error::last_os_error()
}

/// Turn off the kernel's own ctrl-alt-del handling so that the keystroke is
/// delivered to process #1 as a signal instead.  No-op off Linux.
pub fn disable_ctrl_alt_del() {
    #[cfg(target_os = "linux")]
    {
        let _ = nix::sys::reboot::set_cad_enabled(false);
    }
}

/// Ask the kernel to deliver console keyboard events as SIGWINCH.
/// No-op off Linux.
pub fn accept_console_signals(fd: std::os::fd::RawFd) {
    #[cfg(target_os = "linux")]
    {
        const KDSIGACCEPT: libc::c_ulong = 0x4B4E;
        unsafe {
            libc::ioctl(fd, KDSIGACCEPT, libc::SIGWINCH);
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = fd;
}

/* Jail / container detection ***********************************************/

/// Whether we are running inside a jail or container, in which case the
/// shutdown finalizer must not issue the reboot syscall.
pub fn am_in_jail() -> bool {
    #[cfg(target_os = "linux")]
    {
        if let Ok(environ) = std::fs::read("/proc/1/environ") {
            for entry in environ.split(|b| *b == 0) {
                if entry.starts_with(b"container=") {
                    return true;
                }
            }
        }
        // OpenVZ guests have /proc/vz but not /proc/bc.
        return std::path::Path::new("/proc/vz").exists()
            && !std::path::Path::new("/proc/bc").exists();
    }
    #[cfg(not(target_os = "linux"))]
    {
        sysctl_int("security.jail.jailed").unwrap_or(0) != 0
    }
}

/* Subreaper ****************************************************************/

/// Adopt orphaned descendants instead of letting them reparent to init.
pub fn become_subreaper() {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0);
    }
    #[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
    unsafe {
        let mut status: libc::c_int = 0;
        libc::procctl(
            libc::P_PID,
            0,
            libc::PROC_REAP_ACQUIRE,
            std::ptr::addr_of_mut!(status).cast(),
        );
    }
}

/* sysctl *******************************************************************/

/// Read an integer sysctl by name.  Linux has no sysctl(3); callers use the
/// procfs equivalents instead.
#[cfg(not(target_os = "linux"))]
pub fn sysctl_int(name: &str) -> Option<i32> {
    let cname = CString::new(name).ok()?;
    let mut value: libc::c_int = 0;
    let mut size = std::mem::size_of::<libc::c_int>();
    let rc = unsafe {
        libc::sysctlbyname(
            cname.as_ptr(),
            std::ptr::addr_of_mut!(value).cast(),
            &mut size,
            std::ptr::null(),
            0,
        )
    };
    if rc == 0 { Some(value) } else { None }
}

/// Write an integer sysctl by name, returning the previous value.
#[cfg(not(target_os = "linux"))]
pub fn sysctl_set_int(name: &str, new: i32) -> Option<i32> {
    let cname = CString::new(name).ok()?;
    let mut old: libc::c_int = 0;
    let mut size = std::mem::size_of::<libc::c_int>();
    let newv: libc::c_int = new;
    let rc = unsafe {
        libc::sysctlbyname(
            cname.as_ptr(),
            std::ptr::addr_of_mut!(old).cast(),
            &mut size,
            std::ptr::addr_of!(newv).cast(),
            std::mem::size_of::<libc::c_int>(),
        )
    };
    if rc == 0 { Some(old) } else { None }
}

/* API mounts ***************************************************************/

/// The mount-flags word, which nix spells differently per platform family.
#[cfg(target_os = "linux")]
pub type MountFlags = nix::mount::MsFlags;
#[cfg(not(target_os = "linux"))]
pub type MountFlags = nix::mount::MntFlags;

/// One pseudo-filesystem required early in boot.
pub struct ApiMount {
    pub source: &'static str,
    pub fspath: &'static str,
    pub fstype: &'static str,
    pub flags: MountFlags,
    pub data: Option<&'static str>,
}

/// Symbolic links created alongside the API mounts.
pub struct ApiSymlink {
    pub name: &'static str,
    pub target: &'static str,
}

#[cfg(target_os = "linux")]
pub fn api_mounts() -> Vec<ApiMount> {
    use nix::mount::MsFlags;
    vec![
        ApiMount {
            source: "proc",
            fspath: "/proc",
            fstype: "proc",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
            data: None,
        },
        ApiMount {
            source: "sysfs",
            fspath: "/sys",
            fstype: "sysfs",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
            data: None,
        },
        ApiMount {
            source: "dev",
            fspath: "/dev",
            fstype: "devtmpfs",
            flags: MsFlags::MS_NOSUID,
            data: Some("mode=0755"),
        },
        ApiMount {
            source: "devpts",
            fspath: "/dev/pts",
            fstype: "devpts",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            data: Some("gid=5,mode=0620"),
        },
        ApiMount {
            source: "shm",
            fspath: "/dev/shm",
            fstype: "tmpfs",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            data: Some("mode=1777"),
        },
        ApiMount {
            source: "run",
            fspath: "/run",
            fstype: "tmpfs",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            data: Some("mode=0755"),
        },
    ]
}

#[cfg(not(target_os = "linux"))]
pub fn api_mounts() -> Vec<ApiMount> {
    use nix::mount::MntFlags as MsFlags;
    vec![
        ApiMount {
            source: "devfs",
            fspath: "/dev",
            fstype: "devfs",
            flags: MsFlags::empty(),
            data: None,
        },
        ApiMount {
            source: "fdescfs",
            fspath: "/dev/fd",
            fstype: "fdescfs",
            flags: MsFlags::empty(),
            data: None,
        },
        ApiMount {
            source: "procfs",
            fspath: "/proc",
            fstype: "procfs",
            flags: MsFlags::empty(),
            data: None,
        },
        ApiMount {
            source: "run",
            fspath: "/run",
            fstype: "tmpfs",
            flags: MsFlags::empty(),
            data: Some("mode=0755"),
        },
    ]
}

pub fn api_symlinks() -> Vec<ApiSymlink> {
    #[cfg(target_os = "linux")]
    {
        vec![
            ApiSymlink {
                name: "/dev/fd",
                target: "/proc/self/fd",
            },
            ApiSymlink {
                name: "/dev/stdin",
                target: "fd/0",
            },
            ApiSymlink {
                name: "/dev/stdout",
                target: "fd/1",
            },
            ApiSymlink {
                name: "/dev/stderr",
                target: "fd/2",
            },
        ]
    }
    #[cfg(not(target_os = "linux"))]
    {
        Vec::new()
    }
}

/// Whether `p` is one of the API mount points.
pub fn is_api_mountpoint(p: &str) -> bool {
    api_mounts().iter().any(|m| m.fspath == p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_signal_sets_disjoint_roles_share_chld() {
        let sys = system_control_signals();
        let user = user_control_signals();
        assert!(sys.contains(&libc::SIGCHLD));
        assert!(user.contains(&libc::SIGCHLD));
        assert!(user.contains(&libc::SIGHUP));
        assert!(user.contains(&libc::SIGPIPE));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rt_signals_present_on_linux() {
        let sys = system_control_signals();
        assert!(sys.contains(&(libc::SIGRTMIN() + RT_SYSINIT)));
        assert!(sys.contains(&(libc::SIGRTMIN() + RT_FORCE_REBOOT)));
        // Reserved but discarded.
        assert!(sys.contains(&libc::SIGTERM));
    }

    #[test]
    fn test_no_duplicate_registrations() {
        let mut sys = system_control_signals();
        let before = sys.len();
        sys.dedup();
        assert_eq!(before, sys.len());
    }

    #[test]
    fn test_api_mountpoint_membership() {
        assert!(is_api_mountpoint("/run"));
        assert!(!is_api_mountpoint("/home"));
    }
}
