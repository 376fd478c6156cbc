//! system-control: the one-shot control helper.
//!
//! Every invocation performs a single state change and exits.  The shutdown
//! and runlevel verbs are delivered to the running manager as control
//! signals; `start`/`activate` resolve a bundle directory and run its start
//! script; `init` brings the sysinit target up.  The converter verbs chain
//! to the builtins of the same name.
//!
//! Option processing is strictly options-before-arguments: the first bare
//! word is the verb and everything after it belongs to the verb.

use std::path::PathBuf;

use log::{info, warn};
use nix::unistd::Pid;

use crate::boot;
use crate::config::{
    SERVICE_BUNDLE_PREFIXES, TARGET_BUNDLE_PREFIXES, basename_of,
};
use crate::error::{
    EXIT_FAILURE, EXIT_PERMANENT_FAILURE, EXIT_SUCCESS, EXIT_TEMPORARY_FAILURE, EXIT_USAGE,
};
use crate::platform;

struct TopOptions {
    user: bool,
}

/// Strip the recognized top-level options, stopping at the first bare word.
/// The compatibility flags exist so that shell completion and packaged
/// maintainer scripts keep working; they do nothing.
fn parse_top_options(args: &[String]) -> (TopOptions, Vec<String>) {
    let mut top = TopOptions { user: false };
    let mut rest = Vec::new();
    let mut iter = args.iter();
    for arg in iter.by_ref() {
        match arg.as_str() {
            "--user" | "-u" => top.user = true,
            "--full" | "--no-legend" | "--no-pager" | "--no-reload" | "--quiet" => {}
            _ => {
                rest.push(arg.clone());
                break;
            }
        }
    }
    rest.extend(iter.cloned());
    (top, rest)
}

/// Locate the bundle directory for a name, scanning the target prefixes,
/// the service prefixes, or both, depending on the suffix given.
pub fn open_bundle_directory(arg: &str, local_session_mode: bool) -> Option<PathBuf> {
    if arg.contains('/') {
        let path = PathBuf::from(arg);
        return if path.is_dir() { Some(path) } else { None };
    }
    if !local_session_mode {
        let (name, scan_target, scan_service) =
            if let Some(name) = arg.strip_suffix(".target") {
                (name, true, false)
            } else if let Some(name) = arg.strip_suffix(".service") {
                (name, false, true)
            } else if let Some(name) = arg.strip_suffix(".socket") {
                (name, false, true)
            } else {
                (arg, true, true)
            };
        if scan_target {
            for prefix in TARGET_BUNDLE_PREFIXES {
                let path = PathBuf::from(format!("{prefix}{name}"));
                if path.is_dir() {
                    return Some(path);
                }
            }
        }
        if scan_service {
            for prefix in SERVICE_BUNDLE_PREFIXES {
                let path = PathBuf::from(format!("{prefix}{name}"));
                if path.is_dir() {
                    return Some(path);
                }
            }
        }
    }
    let path = PathBuf::from(arg);
    if path.is_dir() { Some(path) } else { None }
}

/// The control signal that asks the manager for a given verb.
fn manager_signal(verb: &str, user: bool) -> Option<i32> {
    let offset = match verb {
        "normal" => platform::RT_NORMAL,
        "rescue" => platform::RT_RESCUE,
        "emergency" => platform::RT_EMERGENCY,
        "halt" => platform::RT_HALT,
        "poweroff" => platform::RT_POWEROFF,
        "reboot" => platform::RT_REBOOT,
        "sysinit" => platform::RT_SYSINIT,
        _ => return None,
    };
    if let Some(signo) = platform::rt_signal(offset) {
        return Some(signo);
    }
    if user {
        // The per-user manager folds the whole shutdown family into halt.
        return Some(libc::SIGTERM);
    }
    named_signal_fallback(verb)
}

#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
))]
fn named_signal_fallback(verb: &str) -> Option<i32> {
    use platform::bsd_named;
    match verb {
        "rescue" => Some(bsd_named::RESCUE_SIGNAL),
        "halt" => Some(bsd_named::HALT_SIGNAL),
        "poweroff" => Some(bsd_named::POWEROFF_SIGNAL),
        "reboot" => Some(bsd_named::REBOOT_SIGNAL),
        _ => None,
    }
}

#[cfg(not(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
fn named_signal_fallback(_verb: &str) -> Option<i32> {
    None
}

/// Pid of the manager this helper talks to: process #1 for the system
/// manager, $MANAGER_PID for a per-user session.
fn manager_pid(user: bool) -> Option<Pid> {
    if user {
        std::env::var("MANAGER_PID")
            .ok()
            .and_then(|p| p.parse::<i32>().ok())
            .map(Pid::from_raw)
    } else {
        Some(Pid::from_raw(1))
    }
}

fn signal_manager(prog: &str, verb: &str, user: bool) -> i32 {
    let Some(signo) = manager_signal(verb, user) else {
        eprintln!("{prog}: FATAL: {verb}: No control signal on this platform.");
        return EXIT_PERMANENT_FAILURE;
    };
    let Some(pid) = manager_pid(user) else {
        eprintln!("{prog}: FATAL: MANAGER_PID: Not set.");
        return EXIT_TEMPORARY_FAILURE;
    };
    let rc = unsafe { libc::kill(pid.as_raw(), signo) };
    if rc != 0 {
        let error = std::io::Error::last_os_error();
        eprintln!("{prog}: FATAL: kill: {pid}: {error}");
        return EXIT_TEMPORARY_FAILURE;
    }
    EXIT_SUCCESS
}

struct VerbOptions {
    verbose: bool,
    user: bool,
    names: Vec<String>,
}

fn parse_verb_options(args: &[String], mut user: bool) -> VerbOptions {
    let mut verbose = false;
    let mut names = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--verbose" => verbose = true,
            "--user" | "-u" => user = true,
            _ => names.push(arg.clone()),
        }
    }
    VerbOptions {
        verbose,
        user,
        names,
    }
}

/// Run one bundle's start script to completion.
fn start_bundle(prog: &str, verb: &str, name: &str, opts: &VerbOptions) -> i32 {
    let Some(bundle) = open_bundle_directory(name, opts.user) else {
        eprintln!("{prog}: FATAL: {name}: No such service bundle.");
        return EXIT_TEMPORARY_FAILURE;
    };
    let service_dir = bundle.join("service");
    let script = service_dir.join("start");
    if opts.verbose {
        info!("{verb} {}", bundle.display());
    }
    match std::process::Command::new(&script)
        .current_dir(&service_dir)
        .status()
    {
        Ok(status) if status.success() => EXIT_SUCCESS,
        Ok(status) => {
            warn!("{}: start ended {status}", bundle.display());
            EXIT_TEMPORARY_FAILURE
        }
        Err(e) => {
            eprintln!("{prog}: FATAL: {}: {e}", script.display());
            EXIT_PERMANENT_FAILURE
        }
    }
}

fn do_init(prog: &str, opts: &VerbOptions) -> i32 {
    if !opts.names.is_empty() {
        info!("init: passing over arguments: {}", opts.names.join(" "));
    }
    // Make sure the runtime tree exists even when the manager could not
    // create it; the init verb can run inside a jail where boot staging
    // was skipped.
    boot::make_run_directories(prog);
    start_bundle(prog, "init", "sysinit.target", opts)
}

pub fn run_system_control(args: &[String]) -> i32 {
    let prog = args
        .first()
        .map(|a| basename_of(a))
        .unwrap_or("system-control");
    let _ = crate::logging::setup_logging(log::LevelFilter::Info);
    let (top, rest) = parse_top_options(args.get(1..).unwrap_or(&[]));
    let Some(verb) = rest.first().cloned() else {
        eprintln!("{prog}: FATAL: Missing command name.");
        return EXIT_FAILURE;
    };
    let verb_args = &rest[1..];

    match verb.as_str() {
        "halt" | "poweroff" | "reboot" | "emergency" | "rescue" | "normal" | "sysinit" => {
            let opts = parse_verb_options(verb_args, top.user);
            signal_manager(prog, &verb, opts.user)
        }
        "start" | "activate" => {
            let opts = parse_verb_options(verb_args, top.user);
            let Some(name) = opts.names.first() else {
                eprintln!("{prog}: FATAL: Missing service name.");
                return EXIT_USAGE;
            };
            // The shutdown-family names double as targets: starting them
            // is the graceful counterpart of the direct signal verbs.
            start_bundle(prog, &verb, name, &opts)
        }
        "init" => {
            let opts = parse_verb_options(verb_args, top.user);
            do_init(prog, &opts)
        }
        "convert-systemd-units" => {
            let mut chained = vec!["convert-systemd-units".to_owned()];
            chained.extend(verb_args.iter().cloned());
            super::run_convert_systemd_units(&chained)
        }
        "convert-fstab-services" => {
            let mut chained = vec!["convert-fstab-services".to_owned()];
            chained.extend(verb_args.iter().cloned());
            super::run_convert_fstab_services(&chained)
        }
        "version" => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            EXIT_SUCCESS
        }
        other => {
            eprintln!("{prog}: FATAL: {other}: Unknown command.");
            EXIT_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_top_options_stop_at_first_word() {
        let (top, rest) = parse_top_options(&strings(&[
            "--no-pager", "--user", "start", "--verbose", "thing",
        ]));
        assert!(top.user);
        assert_eq!(rest, strings(&["start", "--verbose", "thing"]));
        // Options after the verb are left for the verb to interpret.
        let (top, rest) = parse_top_options(&strings(&["start", "--user", "thing"]));
        assert!(!top.user);
        assert_eq!(rest, strings(&["start", "--user", "thing"]));
    }

    #[test]
    fn test_verb_options() {
        let opts = parse_verb_options(&strings(&["--verbose", "--user", "sysinit"]), false);
        assert!(opts.verbose);
        assert!(opts.user);
        assert_eq!(opts.names, strings(&["sysinit"]));
    }

    #[test]
    fn test_open_bundle_directory_literal_path() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("svc");
        std::fs::create_dir(&bundle).unwrap();
        let found = open_bundle_directory(bundle.to_str().unwrap(), false).unwrap();
        assert_eq!(found, bundle);
        assert!(open_bundle_directory("/nonexistent/svc", false).is_none());
    }

    #[test]
    fn test_missing_verb_fails() {
        let rc = run_system_control(&strings(&["system-control"]));
        assert_eq!(rc, EXIT_FAILURE);
    }

    #[test]
    fn test_unknown_verb_fails() {
        let rc = run_system_control(&strings(&["system-control", "frobnicate"]));
        assert_eq!(rc, EXIT_FAILURE);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_manager_signal_mapping() {
        assert_eq!(
            manager_signal("halt", false),
            Some(libc::SIGRTMIN() + platform::RT_HALT)
        );
        assert_eq!(
            manager_signal("sysinit", false),
            Some(libc::SIGRTMIN() + platform::RT_SYSINIT)
        );
        assert_eq!(manager_signal("frob", false), None);
    }
}
