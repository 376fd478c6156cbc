//! fifo-listen: create a FIFO, park it on the listen descriptor, and chain
//! into the next program.
//!
//! The FIFO lands on descriptor 3 with close-on-exec cleared, and with
//! `--systemd-compatibility` the LISTEN_FDS/LISTEN_PID pair announces it to
//! the chained program.  The FIFO is opened read-write so that it never
//! reports writer-less end-of-file to the reader that inherits it.

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use clap::Parser;

use crate::config::basename_of;
use crate::error::{EXIT_FAILURE, EXIT_USAGE};
use crate::log_pipe::LISTEN_SOCKET_FILENO;

#[derive(Parser, Debug)]
#[command(name = "fifo-listen", about = "Listen on a FIFO and chain")]
struct Cli {
    /// Set the $LISTEN_FDS and $LISTEN_PID environment variables for
    /// compatibility with socket-activated programs.
    #[arg(long)]
    systemd_compatibility: bool,

    /// Specify the UID for the FIFO filename.
    #[arg(short = 'u', long, value_name = "number")]
    uid: Option<u32>,

    /// Specify the GID for the FIFO filename.
    #[arg(short = 'g', long, value_name = "number")]
    gid: Option<u32>,

    /// Specify the permissions for the FIFO filename (octal).
    #[arg(short = 'm', long, value_name = "number")]
    mode: Option<String>,

    /// Specify the user for the FIFO filename.
    #[arg(long, value_name = "name")]
    user: Option<String>,

    /// Specify the group for the FIFO filename.
    #[arg(long, value_name = "name")]
    group: Option<String>,

    /// FIFO path.
    path: String,

    /// Program to chain into.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    prog: Vec<String>,
}

pub fn run_fifo_listen(args: &[String]) -> i32 {
    let prog = args.first().map(|a| basename_of(a)).unwrap_or("fifo-listen");
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return EXIT_USAGE;
        }
    };
    if cli.prog.is_empty() {
        eprintln!("{prog}: FATAL: Missing next program.");
        return EXIT_USAGE;
    }

    let mode = match &cli.mode {
        Some(mode) => match u32::from_str_radix(mode, 8) {
            Ok(mode) => mode,
            Err(_) => {
                eprintln!("{prog}: FATAL: {mode}: Not an octal mode.");
                return EXIT_USAGE;
            }
        },
        None => 0o600,
    };

    let fifo_mode = nix::sys::stat::Mode::from_bits_truncate(mode);
    // An existing FIFO is reused as-is.
    let _ = nix::unistd::mkfifo(cli.path.as_str(), fifo_mode);

    let raw = unsafe {
        let cpath = match CString::new(cli.path.as_str()) {
            Ok(cpath) => cpath,
            Err(_) => {
                eprintln!("{prog}: FATAL: {}: Embedded NUL.", cli.path);
                return EXIT_USAGE;
            }
        };
        libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_NOCTTY)
    };
    if raw < 0 {
        let error = std::io::Error::last_os_error();
        eprintln!("{prog}: FATAL: {}: {error}", cli.path);
        return EXIT_FAILURE;
    }
    let fifo = unsafe { OwnedFd::from_raw_fd(raw) };

    if cli.mode.is_some() {
        if let Err(e) = nix::sys::stat::fchmod(&fifo, fifo_mode) {
            eprintln!("{prog}: FATAL: {e}");
            return EXIT_FAILURE;
        }
    }
    if cli.uid.is_some() || cli.gid.is_some() {
        let rc = unsafe {
            libc::fchown(
                fifo.as_raw_fd(),
                cli.uid.map(|u| u as libc::uid_t).unwrap_or(u32::MAX),
                cli.gid.map(|g| g as libc::gid_t).unwrap_or(u32::MAX),
            )
        };
        if rc != 0 {
            let error = std::io::Error::last_os_error();
            eprintln!("{prog}: FATAL: {error}");
            return EXIT_FAILURE;
        }
    } else if cli.user.is_some() || cli.group.is_some() {
        let uid = match &cli.user {
            Some(user) => match nix::unistd::User::from_name(user) {
                Ok(Some(u)) => Some(u.uid),
                _ => {
                    eprintln!("{prog}: FATAL: {user}: No such user");
                    return EXIT_FAILURE;
                }
            },
            None => None,
        };
        let gid = match &cli.group {
            Some(group) => match nix::unistd::Group::from_name(group) {
                Ok(Some(g)) => Some(g.gid),
                _ => {
                    eprintln!("{prog}: FATAL: {group}: No such group");
                    return EXIT_FAILURE;
                }
            },
            None => None,
        };
        if let Err(e) = nix::unistd::chown(cli.path.as_str(), uid, gid) {
            eprintln!("{prog}: FATAL: {e}");
            return EXIT_FAILURE;
        }
    }

    unsafe {
        if fifo.as_raw_fd() != LISTEN_SOCKET_FILENO {
            if libc::dup2(fifo.as_raw_fd(), LISTEN_SOCKET_FILENO) < 0 {
                let error = std::io::Error::last_os_error();
                eprintln!("{prog}: FATAL: {error}");
                return EXIT_FAILURE;
            }
            drop(fifo);
        } else {
            std::mem::forget(fifo);
        }
        let flags = libc::fcntl(LISTEN_SOCKET_FILENO, libc::F_GETFD, 0) & !libc::FD_CLOEXEC;
        libc::fcntl(LISTEN_SOCKET_FILENO, libc::F_SETFD, flags);
    }

    if cli.systemd_compatibility {
        // SAFETY: single-threaded utility about to exec.
        unsafe {
            std::env::set_var("LISTEN_FDS", "1");
            std::env::set_var("LISTEN_PID", nix::unistd::getpid().to_string());
        }
    }

    let argv: Vec<CString> = cli
        .prog
        .iter()
        .filter_map(|a| CString::new(a.as_str()).ok())
        .collect();
    if let Some(head) = argv.first() {
        let _ = nix::unistd::execvp(head, &argv);
    }
    let error = std::io::Error::last_os_error();
    eprintln!("{prog}: FATAL: {}: {error}", cli.prog[0]);
    EXIT_FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_chain_with_hyphen_args() {
        let cli = Cli::try_parse_from([
            "fifo-listen",
            "--systemd-compatibility",
            "--mode",
            "0622",
            "/run/initctl",
            "initctl-read",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.systemd_compatibility);
        assert_eq!(cli.mode.as_deref(), Some("0622"));
        assert_eq!(cli.path, "/run/initctl");
        assert_eq!(cli.prog, vec!["initctl-read", "--verbose"]);
    }

    #[test]
    fn test_missing_next_program_is_usage_error() {
        let args: Vec<String> = ["fifo-listen", "/tmp/x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(run_fifo_listen(&args), EXIT_USAGE);
    }
}
