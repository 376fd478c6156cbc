//! Boot staging: everything the system manager does before its event loop.
//!
//! Ordering matters throughout.  Environment seeding happens before the
//! clock is touched, the clock before the API mounts (fsck on real volumes
//! wants correct timestamps), the mounts before any path under /run or /dev
//! is used, and nothing here may write much to standard output, which is
//! already the logging pipe with no reader yet.

use std::io::ErrorKind;
use std::path::Path;

use crate::config::{BOOT_PATH, ENV_FILES, MANAGER_DIRECTORIES, MANAGER_SYMLINKS,
    SYSTEM_MANAGER_LOGDIRS, effective_user_runtime_dir};
use crate::platform;

/// Session, working directory, umask, and base environment for the system
/// role; sub-reaper status for the per-user role.
pub fn setup_process_state(is_system: bool, prog: &str) {
    if is_system {
        let _ = nix::unistd::setsid();
        #[cfg(not(target_os = "linux"))]
        unsafe {
            libc::setlogin(c"root".as_ptr());
        }
        let _ = nix::unistd::chdir("/");
        nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o022));

        // SAFETY: the manager is single-threaded; no other thread can be
        // reading the environment concurrently.
        unsafe {
            std::env::set_var("PATH", BOOT_PATH);
            std::env::set_var("LANG", "C");
        }

        load_env_dir(prog, Path::new("/etc/locale.d"));
        load_env_files(prog);
    } else {
        platform::become_subreaper();
    }
}

/// Parse /etc/locale.d as an environment directory: one file per variable,
/// content with the trailing newline removed; an empty file unsets.
fn load_env_dir(prog: &str, dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                eprintln!("{prog}: ERROR: {}: {e}", dir.display());
            }
            return;
        }
    };
    let mut names: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .collect();
    names.sort();
    for name in names {
        let path = dir.join(&name);
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let val = raw.trim_end_matches('\n').replace('\0', "\n");
                let var = name.to_string_lossy();
                // SAFETY: single-threaded, as above.
                unsafe {
                    if val.is_empty() {
                        std::env::remove_var(var.as_ref());
                    } else {
                        std::env::set_var(var.as_ref(), &val);
                    }
                }
            }
            Err(e) => {
                eprintln!("{prog}: ERROR: {}: {e}", path.display());
            }
        }
    }
}

/// Load the first existing locale file from the ordered candidate list.
/// Later assignments within the file win; a malformed line only warns.
fn load_env_files(prog: &str) {
    for filename in ENV_FILES {
        let text = match std::fs::read_to_string(filename) {
            Ok(text) => text,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    eprintln!("{prog}: ERROR: {filename}: {e}");
                }
                continue;
            }
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (var, val) = crate::scripts::split_env_assignment(line);
            if var.is_empty() {
                eprintln!("{prog}: ERROR: {filename}: {line}: malformed assignment");
                continue;
            }
            let val = val.trim_matches('"');
            // SAFETY: single-threaded, as above.
            unsafe {
                std::env::set_var(var, val);
            }
        }
        break;
    }
}

/* Clock and timezone *******************************************************/

#[repr(C)]
struct Timezone {
    tz_minuteswest: libc::c_int,
    tz_dsttime: libc::c_int,
}

unsafe extern "C" {
    fn settimeofday(tv: *const libc::timeval, tz: *const Timezone) -> libc::c_int;
}

fn seconds_west_of_utc() -> libc::c_int {
    use chrono::Offset;
    -chrono::Local::now().offset().fix().local_minus_utc()
}

#[cfg(target_os = "linux")]
fn hwclock_runs_in_utc() -> bool {
    // The third line of /etc/adjtime says LOCAL when the RTC keeps local
    // time; anything else, including an unreadable file, means UTC.
    match std::fs::read_to_string("/etc/adjtime") {
        Ok(text) => text.lines().nth(2) != Some("LOCAL"),
        Err(_) => true,
    }
}

#[cfg(target_os = "linux")]
pub fn initialize_system_clock_timezone(_prog: &str) {
    let utc = hwclock_runs_in_utc();
    let seconds_west = seconds_west_of_utc();
    let mut tz = Timezone {
        tz_minuteswest: 0,
        tz_dsttime: 0,
    };
    unsafe {
        if utc {
            // Prevent the next call from warping the system clock.
            settimeofday(std::ptr::null(), &tz);
        }
        // Set the RTC/FAT local time offset and, when the hardware clock
        // keeps local time, shift the system clock from
        // local-time-as-if-UTC to UTC.
        tz.tz_minuteswest = seconds_west / 60;
        settimeofday(std::ptr::null(), &tz);
    }
}

#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
fn hwclock_runs_in_utc() -> bool {
    if platform::sysctl_int("machdep.wall_cmos_clock").unwrap_or(0) != 0 {
        return true;
    }
    !std::path::Path::new("/etc/wall_cmos_clock").exists()
}

#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
pub fn initialize_system_clock_timezone(prog: &str) {
    let utc = hwclock_runs_in_utc();
    let seconds_west = seconds_west_of_utc();
    let tz = Timezone {
        tz_minuteswest: 0,
        tz_dsttime: 0,
    };
    if !utc {
        let _ = platform::sysctl_set_int("machdep.disable_rtc_set", 0);
        let _ = platform::sysctl_set_int("machdep.wall_cmos_clock", 1);
        let old_seconds_west = platform::sysctl_set_int("machdep.adjkerntz", seconds_west)
            .unwrap_or(0);

        // Shift the system clock from local-time-as-if-UTC to UTC and zero
        // the kernel's tz_minuteswest while we are at it.
        let mut tv = libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        unsafe {
            libc::gettimeofday(&mut tv, std::ptr::null_mut());
            tv.tv_sec += libc::time_t::from(seconds_west - old_seconds_west);
            settimeofday(&tv, &tz);
        }
        if seconds_west != old_seconds_west {
            eprintln!(
                "{prog}: WARNING: Timezone wrong.  Please put machdep.adjkerntz={seconds_west} and machdep.wall_cmos_clock=1 in loader.conf."
            );
        }
    } else {
        unsafe {
            settimeofday(std::ptr::null(), &tz);
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd", target_os = "dragonfly")))]
pub fn initialize_system_clock_timezone(_prog: &str) {}

/* API mounts ***************************************************************/

/// Mounted volumes traditionally put inode 2 at their root; Linux virtual
/// volumes often use inode 1.  /proc/self/mounts settles the stragglers.
pub fn is_already_mounted(fspath: &str) -> bool {
    if let Ok(meta) = std::fs::metadata(fspath) {
        use std::os::unix::fs::MetadataExt;
        if meta.ino() == 2 {
            return true;
        }
        #[cfg(target_os = "linux")]
        if meta.ino() == 1 {
            return true;
        }
    }
    #[cfg(target_os = "linux")]
    if let Ok(mounts) = std::fs::read_to_string("/proc/self/mounts") {
        for line in mounts.lines() {
            if line.split_whitespace().nth(1) == Some(fspath) {
                return true;
            }
        }
    }
    false
}

/// Mount the platform's API filesystem table, passing the remount/update
/// flag when a volume is already there.  EBUSY is expected and swallowed.
pub fn setup_api_volumes(prog: &str) {
    for m in platform::api_mounts() {
        if let Err(e) = std::fs::create_dir(m.fspath) {
            if e.kind() != ErrorKind::AlreadyExists {
                eprintln!("{prog}: ERROR: mkdir: {}: {e}", m.fspath);
            }
        }
        let update = is_already_mounted(m.fspath);
        if update {
            eprintln!("{prog}: INFO: {}: A volume is already mounted here.", m.fspath);
        }
        if let Err(e) = mount_one(&m, update) {
            if e != nix::Error::EBUSY {
                eprintln!("{prog}: ERROR: mount: {}: {e}", m.fspath);
            }
        }
    }
    for l in platform::api_symlinks() {
        if let Err(e) = std::os::unix::fs::symlink(l.target, l.name) {
            if e.kind() != ErrorKind::AlreadyExists {
                eprintln!("{prog}: ERROR: symlink: {}: {e}", l.name);
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn mount_one(m: &platform::ApiMount, update: bool) -> nix::Result<()> {
    let mut flags = m.flags;
    if update {
        flags |= nix::mount::MsFlags::MS_REMOUNT;
    }
    nix::mount::mount(Some(m.source), m.fspath, Some(m.fstype), flags, m.data)
}

#[cfg(target_os = "freebsd")]
fn mount_one(m: &platform::ApiMount, update: bool) -> nix::Result<()> {
    let mut nmount = nix::mount::Nmount::new();
    nmount
        .str_opt_owned("fstype", m.fstype)
        .str_opt_owned("fspath", m.fspath)
        .str_opt_owned("from", m.source);
    if let Some(data) = m.data {
        for opt in data.split(',') {
            match opt.split_once('=') {
                Some((k, v)) => {
                    nmount.str_opt_owned(k, v);
                }
                None => {
                    nmount.null_opt_owned(opt);
                }
            }
        }
    }
    let mut flags = m.flags;
    if update {
        flags |= nix::mount::MntFlags::MNT_UPDATE;
    }
    nmount.nmount(flags).map_err(|e| e.error())
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
fn mount_one(_m: &platform::ApiMount, _update: bool) -> nix::Result<()> {
    Err(nix::Error::ENOSYS)
}

/* Runtime directories ******************************************************/

/// Create the /run hierarchy the manager and its children rely on.
pub fn make_run_directories(prog: &str) {
    use std::os::unix::fs::DirBuilderExt;
    for dirname in MANAGER_DIRECTORIES {
        if let Err(e) = std::fs::DirBuilder::new().mode(0o755).create(dirname) {
            if e.kind() != ErrorKind::AlreadyExists {
                eprintln!("{prog}: ERROR: mkdir: {dirname}: {e}");
            }
        }
    }
    for (name, target) in MANAGER_SYMLINKS {
        if let Err(e) = std::os::unix::fs::symlink(target, name) {
            if e.kind() != ErrorKind::AlreadyExists {
                eprintln!("{prog}: ERROR: symlink: {name}: {e}");
            }
        }
    }
}

/// Change into the directory the cyclog child will write to.
pub fn change_to_log_root(is_system: bool) {
    if is_system {
        for dir in SYSTEM_MANAGER_LOGDIRS {
            if nix::unistd::chdir(*dir).is_ok() {
                return;
            }
        }
    } else {
        let dir = format!("{}per-user-manager/log", effective_user_runtime_dir());
        let _ = nix::unistd::chdir(dir.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_already_mounted_root() {
        // / is a mount point on any sane system.
        assert!(is_already_mounted("/"));
    }

    #[test]
    fn test_is_already_mounted_plain_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_already_mounted(dir.path().to_str().unwrap()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_hwclock_utc_default() {
        // Without a readable /etc/adjtime the hardware clock is presumed
        // UTC; the helper must not panic either way.
        let _ = hwclock_runs_in_utc();
    }
}
