//! Well-known paths and per-user runtime directory resolution.
//!
//! There is no configuration file.  All paths match the compiled-in defaults
//! of the toolchain this manager interoperates with: unit files are searched
//! under the usual `systemd/{system,user}` prefixes, bundles live under
//! `/run/service-bundles` and the `sv` directories, and the per-user runtime
//! directory is `/run/user/<name>/`.

use std::path::PathBuf;

/// Unit file search prefixes, in priority order.  Each is joined with
/// `systemd/system/` or `systemd/user/` and the unit basename.
pub const SYSTEMD_PREFIXES: &[&str] = &["/run/", "/etc/", "/lib/", "/usr/lib/", "/usr/local/lib/"];

/// Directories created under /run by the system manager during boot staging.
pub const MANAGER_DIRECTORIES: &[&str] = &[
    "/run/system-manager",
    "/run/system-manager/log",
    "/run/service-bundles",
    "/run/service-bundles/early-supervise",
    "/run/service-manager",
    "/run/user",
];

/// Compatibility symlinks created alongside [`MANAGER_DIRECTORIES`].
/// Pre-1.17 layouts kept early-supervise directly under the manager root.
pub const MANAGER_SYMLINKS: &[(&str, &str)] = &[(
    "/run/system-manager/early-supervise",
    "../service-bundles/early-supervise",
)];

/// Ordered list of locale environment files; the first readable one wins.
pub const ENV_FILES: &[&str] = &[
    "/etc/locale.conf",
    "/etc/default/locale",
    "/etc/sysconfig/i18n",
    "/etc/sysconfig/language",
    "/etc/sysconf/i18n",
];

/// Candidate working directories for the system manager's own log, tried in
/// order until one admits a chdir.
pub const SYSTEM_MANAGER_LOGDIRS: &[&str] = &[
    "/var/log/system-manager",
    "/var/system-manager/log",
    "/var/tmp/system-manager/log",
    "/run/system-manager/log",
];

/// Where `system-control` scans for target bundles.
pub const TARGET_BUNDLE_PREFIXES: &[&str] = &[
    "/run/system-manager/targets/",
    "/etc/system-manager/targets/",
    "/var/system-manager/targets/",
];

/// Where `system-control` scans for service bundles.
pub const SERVICE_BUNDLE_PREFIXES: &[&str] = &[
    "/run/sv/",
    "/etc/sv/",
    "/var/local/sv/",
    "/var/sv/",
    "/service/",
];

/// Root of the early-supervise staging area.
pub const EARLY_SUPERVISE_DIR: &str = "/run/service-bundles/early-supervise/";

/// The PATH seeded during boot staging.  /sbin and /bin cannot be omitted:
/// on some systems they are the symbolic links and /usr is a separate volume
/// that is not mounted yet, on others it is the reverse.
pub const BOOT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Runtime directory of the effective user, `/run/user/<name>/`.
pub fn effective_user_runtime_dir() -> String {
    let mut r = String::from("/run/user/");
    match nix::unistd::User::from_uid(nix::unistd::geteuid()) {
        Ok(Some(p)) => r.push_str(&p.name),
        _ => r.push_str(&nix::unistd::geteuid().to_string()),
    }
    r.push('/');
    r
}

/// Runtime directory of the login user, preferring the login name recorded
/// in the environment over a uid lookup.
pub fn login_user_runtime_dir() -> String {
    let mut r = String::from("/run/user/");
    if let Ok(u) = std::env::var("USER") {
        r.push_str(&u);
    } else if let Ok(n) = std::env::var("LOGNAME") {
        r.push_str(&n);
    } else {
        match nix::unistd::User::from_uid(nix::unistd::getuid()) {
            Ok(Some(p)) => r.push_str(&p.name),
            _ => r.push_str(&nix::unistd::getuid().to_string()),
        }
    }
    r.push('/');
    r
}

/// Path of the running executable, used to re-enter this multi-call binary
/// from forked children.
pub fn self_path() -> PathBuf {
    std::env::current_exe().unwrap_or_else(|_| PathBuf::from("/proc/self/exe"))
}

/// basename_of: the program name as printed in diagnostics.
pub fn basename_of(arg0: &str) -> &str {
    match arg0.rsplit_once('/') {
        Some((_, base)) => base,
        None => arg0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename_of() {
        assert_eq!(basename_of("/sbin/system-manager"), "system-manager");
        assert_eq!(basename_of("system-control"), "system-control");
        assert_eq!(basename_of("./a/b"), "b");
    }

    #[test]
    fn test_runtime_dir_shape() {
        let d = effective_user_runtime_dir();
        assert!(d.starts_with("/run/user/"));
        assert!(d.ends_with('/'));
    }
}
