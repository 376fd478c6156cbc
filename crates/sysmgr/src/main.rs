//! The multi-call binary.
//!
//! Dispatch is by the executable's basename first, so that hardlink or
//! symlink installs of `per-user-manager`, `system-control` and friends
//! work, and by the first argument otherwise.

use libsysmgr::entrypoints;

const COMMANDS: &[(&str, fn(&[String]) -> i32)] = &[
    ("system-manager", entrypoints::run_system_manager),
    ("per-user-manager", entrypoints::run_per_user_manager),
    ("system-control", entrypoints::run_system_control),
    ("convert-systemd-units", entrypoints::run_convert_systemd_units),
    ("convert-fstab-services", entrypoints::run_convert_fstab_services),
    (
        "write-volume-service-bundles",
        entrypoints::run_write_volume_service_bundles,
    ),
    ("fifo-listen", entrypoints::run_fifo_listen),
    ("service-is-ok", entrypoints::run_service_is_ok),
    ("initctl-read", entrypoints::run_initctl_read),
];

fn lookup(name: &str) -> Option<fn(&[String]) -> i32> {
    COMMANDS
        .iter()
        .find(|(command, _)| *command == name)
        .map(|(_, entry)| *entry)
}

fn basename(arg0: &str) -> &str {
    match arg0.rsplit_once('/') {
        Some((_, base)) => base,
        None => arg0,
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let exec_name = args
        .first()
        .map(|a| basename(a).to_owned())
        .unwrap_or_default();

    if let Some(entry) = lookup(&exec_name) {
        std::process::exit(entry(&args));
    }

    // Not installed under a command name; take the command from argv[1].
    if args.len() > 1 {
        if let Some(entry) = lookup(&args[1]) {
            std::process::exit(entry(&args[1..]));
        }
        eprintln!("{exec_name}: FATAL: {}: Unknown command.", args[1]);
        std::process::exit(libsysmgr::error::EXIT_USAGE);
    }

    eprintln!("Usage: {exec_name} <command> [arguments...]");
    for (command, _) in COMMANDS {
        eprintln!("    {command}");
    }
    std::process::exit(libsysmgr::error::EXIT_USAGE);
}
