//! initctl-read: consume classic initctl request records and re-issue them
//! as runlevel changes.
//!
//! Requests arrive on the inherited listen descriptors as fixed 384-byte
//! records.  Only the set-runlevel command is honored: a valid record forks
//! `telinit -<runlevel>`.  Bad magic, unknown commands, and unprintable
//! runlevels are logged and dropped.

use std::ffi::CString;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::unistd::ForkResult;

use crate::config::basename_of;
use crate::error::{EXIT_FAILURE, EXIT_SUCCESS, Error};
use crate::log_pipe::LISTEN_SOCKET_FILENO;

/// The size of one request record on the wire.
pub const INITREQ_SIZE: usize = 384;
/// Request magic, unchanged since 1969-09-03.
pub const INITREQ_MAGIC: i32 = 0x0309_1969;
/// The set-runlevel command.
pub const INITREQ_RUNLVL: i32 = 1;

/// Count of inherited listen descriptors, honoring the LISTEN_PID check.
fn query_listen_fds() -> Result<usize, Error> {
    let pid = std::env::var("LISTEN_PID")
        .map_err(|_| Error::protocol("LISTEN_PID: Not set."))?;
    if pid.parse::<i32>() != Ok(nix::unistd::getpid().as_raw()) {
        return Err(Error::protocol("LISTEN_PID: Not ours."));
    }
    let fds = std::env::var("LISTEN_FDS")
        .map_err(|_| Error::protocol("LISTEN_FDS: Not set."))?;
    let count: usize = fds
        .parse()
        .map_err(|_| Error::protocol(format!("LISTEN_FDS: {fds}: Not a count.")))?;
    if count < 1 {
        return Err(Error::protocol("LISTEN_FDS: No listen descriptors."));
    }
    Ok(count)
}

/// Validate one complete record and extract the runlevel character.
pub fn parse_request(buffer: &[u8; INITREQ_SIZE]) -> Result<char, Error> {
    let field = |at: usize| {
        i32::from_ne_bytes([buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3]])
    };
    let magic = field(0);
    if magic != INITREQ_MAGIC {
        return Err(Error::protocol("bad magic number in request"));
    }
    let cmd = field(4);
    if cmd != INITREQ_RUNLVL {
        return Err(Error::protocol(format!(
            "{cmd}: unsupported command in request"
        )));
    }
    let runlevel = field(8);
    u32::try_from(runlevel)
        .ok()
        .and_then(char::from_u32)
        .filter(|c| c.is_ascii_graphic())
        .ok_or_else(|| {
            Error::protocol(format!("{runlevel}: unsupported run level in request"))
        })
}

/// The argv for re-issuing a runlevel change.
pub fn telinit_argv(runlevel: char) -> Vec<CString> {
    vec![
        CString::new("telinit").expect("static string"),
        CString::new(format!("-{runlevel}")).expect("printable runlevel"),
    ]
}

struct Client {
    buffer: [u8; INITREQ_SIZE],
    off: usize,
}

impl Client {
    fn new() -> Self {
        Client {
            buffer: [0; INITREQ_SIZE],
            off: 0,
        }
    }
}

pub fn run_initctl_read(args: &[String]) -> i32 {
    let prog = args
        .first()
        .map(|a| basename_of(a))
        .unwrap_or("initctl-read");
    let _ = crate::logging::setup_logging(log::LevelFilter::Info);
    let listen_fds = match query_listen_fds() {
        Ok(count) => count,
        Err(e) => {
            eprintln!("{prog}: FATAL: {e}");
            return EXIT_FAILURE;
        }
    };

    // Shutdown-family signals end the loop; SIGTSTP pauses it.  The flags
    // are polled between reads; no logic runs in handlers.
    let in_shutdown = Arc::new(AtomicBool::new(false));
    let pause_requested = Arc::new(AtomicBool::new(false));
    for signo in [
        signal_hook::consts::SIGHUP,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGPIPE,
        signal_hook::consts::SIGQUIT,
    ] {
        if let Err(e) = signal_hook::flag::register(signo, Arc::clone(&in_shutdown)) {
            eprintln!("{prog}: FATAL: signal registration: {e}");
            return EXIT_FAILURE;
        }
    }
    if let Err(e) =
        signal_hook::flag::register(signal_hook::consts::SIGTSTP, Arc::clone(&pause_requested))
    {
        eprintln!("{prog}: FATAL: signal registration: {e}");
        return EXIT_FAILURE;
    }

    let mut clients: Vec<Client> = (0..listen_fds).map(|_| Client::new()).collect();

    while !in_shutdown.load(Ordering::Relaxed) {
        if pause_requested.swap(false, Ordering::Relaxed) {
            info!("Paused.");
            let _ = nix::sys::signal::raise(nix::sys::signal::Signal::SIGSTOP);
            info!("Continued.");
        }

        let mut fds: Vec<PollFd> = (0..listen_fds)
            .map(|i| {
                let fd = unsafe {
                    BorrowedFd::borrow_raw(LISTEN_SOCKET_FILENO + i as i32)
                };
                PollFd::new(fd, PollFlags::POLLIN)
            })
            .collect();
        match nix::poll::poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(nix::Error::EINTR) => continue,
            Err(e) => {
                eprintln!("{prog}: FATAL: poll: {e}");
                return EXIT_FAILURE;
            }
        }
        let ready: Vec<usize> = fds
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.revents()
                    .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
            })
            .map(|(i, _)| i)
            .collect();

        for index in ready {
            let client = &mut clients[index];
            let fd = LISTEN_SOCKET_FILENO + index as i32;
            let n = unsafe {
                libc::read(
                    fd,
                    client.buffer[client.off..].as_mut_ptr().cast(),
                    INITREQ_SIZE - client.off,
                )
            };
            if n < 0 {
                let e = std::io::Error::last_os_error();
                if e.kind() != std::io::ErrorKind::Interrupted {
                    error!("read: {e}");
                }
                continue;
            }
            if n == 0 {
                continue;
            }
            client.off += n as usize;
            if client.off < INITREQ_SIZE {
                continue;
            }
            client.off = 0;
            let runlevel = match parse_request(&client.buffer) {
                Ok(runlevel) => runlevel,
                Err(e) => {
                    error!("{e}");
                    continue;
                }
            };
            match unsafe { nix::unistd::fork() } {
                Err(e) => {
                    error!("fork: {e}");
                }
                Ok(ForkResult::Child) => {
                    let argv = telinit_argv(runlevel);
                    let _ = nix::unistd::execvp(&argv[0], &argv);
                    unsafe {
                        libc::_exit(1);
                    }
                }
                Ok(ForkResult::Parent { child }) => {
                    info!("telinit -{runlevel} (pid {child}) started");
                }
            }
        }
    }
    EXIT_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(magic: i32, cmd: i32, runlevel: i32) -> [u8; INITREQ_SIZE] {
        let mut buffer = [0u8; INITREQ_SIZE];
        buffer[0..4].copy_from_slice(&magic.to_ne_bytes());
        buffer[4..8].copy_from_slice(&cmd.to_ne_bytes());
        buffer[8..12].copy_from_slice(&runlevel.to_ne_bytes());
        buffer
    }

    #[test]
    fn test_set_runlevel_three() {
        let buffer = request(INITREQ_MAGIC, INITREQ_RUNLVL, '3' as i32);
        let runlevel = parse_request(&buffer).unwrap();
        assert_eq!(runlevel, '3');
        let argv = telinit_argv(runlevel);
        let argv: Vec<&str> = argv.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(argv, vec!["telinit", "-3"]);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let buffer = request(0x1234_5678, INITREQ_RUNLVL, '3' as i32);
        assert!(parse_request(&buffer).is_err());
    }

    #[test]
    fn test_unsupported_command_rejected() {
        let buffer = request(INITREQ_MAGIC, 2, '3' as i32);
        assert!(parse_request(&buffer).is_err());
    }

    #[test]
    fn test_unprintable_runlevel_rejected() {
        let buffer = request(INITREQ_MAGIC, INITREQ_RUNLVL, 7);
        assert!(parse_request(&buffer).is_err());
        let buffer = request(INITREQ_MAGIC, INITREQ_RUNLVL, -1);
        assert!(parse_request(&buffer).is_err());
    }

    #[test]
    fn test_single_user_runlevel() {
        let buffer = request(INITREQ_MAGIC, INITREQ_RUNLVL, 'S' as i32);
        assert_eq!(parse_request(&buffer).unwrap(), 'S');
    }
}
