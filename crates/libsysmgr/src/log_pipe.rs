//! The primary logging pipe and the last-resort standard descriptors.
//!
//! At manager entry, standard output and error are swapped onto the write
//! end of a close-on-exec pipe whose read end later feeds the cyclog child.
//! Whatever was originally open on descriptors 0..=3 is saved first: those
//! are the destinations of last resort once the logger is gone during fast
//! shutdown, and the cyclog child inherits them as its own stdout/stderr so
//! its errors do not vanish into its own input.
//!
//! Descriptors 0..=3 that were closed at entry are padded with opens of `/`
//! so no later allocation can land inside the reserved range; the pads are
//! remembered so their useless dup-saves can be discarded.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::platform;

/// The descriptor on which a listening socket is passed to children.
pub const LISTEN_SOCKET_FILENO: RawFd = 3;

fn open_root_dir() -> Option<OwnedFd> {
    let fd = unsafe {
        libc::open(
            c"/".as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY,
        )
    };
    if fd < 0 {
        None
    } else {
        Some(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

fn set_blocking(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK);
        }
    }
}

fn dup_fd(fd: RawFd) -> Option<OwnedFd> {
    let d = unsafe { libc::dup(fd) };
    if d < 0 {
        None
    } else {
        set_blocking(d);
        Some(unsafe { OwnedFd::from_raw_fd(d) })
    }
}

/// Open /dev/null read-write for use as a child stdin.
pub fn open_dev_null(prog: &str) -> Option<OwnedFd> {
    let fd = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        let error = std::io::Error::last_os_error();
        eprintln!("{prog}: ERROR: /dev/null: {error}");
        None
    } else {
        set_blocking(fd);
        Some(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

pub struct LogPipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl LogPipe {
    /// Open the close-on-exec pipe.  A failure leaves both ends absent and
    /// the manager running without its pipe.
    pub fn open(prog: &str) -> LogPipe {
        match nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC) {
            Ok((read, write)) => LogPipe {
                read: Some(read),
                write: Some(write),
            },
            Err(e) => {
                eprintln!("{prog}: ERROR: pipe: {e}");
                LogPipe {
                    read: None,
                    write: None,
                }
            }
        }
    }

    pub fn read_raw(&self) -> RawFd {
        self.read.as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1)
    }

    pub fn write_raw(&self) -> RawFd {
        self.write.as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1)
    }

    pub fn is_open(&self) -> bool {
        self.read.is_some()
    }

    /// Drop both ends so the logger drains the remaining buffer and EOFs.
    pub fn close(&mut self) {
        self.read = None;
        self.write = None;
    }
}

pub struct StdioState {
    saved: [Option<OwnedFd>; 4],
    faked: [bool; 4],
}

impl StdioState {
    /// Pad descriptors 0..=3 and save what was genuinely inherited there.
    pub fn capture(is_system: bool) -> StdioState {
        let mut faked = [false; 4];

        // Keep opening / until the allocator hands out something above the
        // reserved range; every low descriptor it hands out was free.
        loop {
            match open_root_dir() {
                Some(fd) if fd.as_raw_fd() <= LISTEN_SOCKET_FILENO => {
                    faked[fd.as_raw_fd() as usize] = true;
                    // The pad stays open on its number until something
                    // dup2s over it.
                    std::mem::forget(fd);
                }
                _ => break,
            }
        }

        let mut saved: [Option<OwnedFd>; 4] = [None, None, None, None];
        for i in 0..=LISTEN_SOCKET_FILENO {
            #[cfg(not(target_os = "linux"))]
            if is_system && unsafe { libc::isatty(i) } > 0 {
                // The BSD kernel starts process #1 with a controlling
                // terminal; the only way to shed it is to close every
                // descriptor open onto it.  Replace with a pad.
                if let Some(root) = open_root_dir() {
                    unsafe {
                        libc::dup2(root.as_raw_fd(), i);
                    }
                }
                faked[i as usize] = true;
                continue;
            }
            #[cfg(target_os = "linux")]
            let _ = is_system;
            saved[i as usize] = dup_fd(i);
        }
        StdioState { saved, faked }
    }

    /// Swap standard output and error onto the pipe's write end, forgetting
    /// saves that were only copies of the pads.
    pub fn attach_pipe(&mut self, pipe: &LogPipe) {
        for i in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if self.faked[i as usize] {
                self.faked[i as usize] = false;
                self.saved[i as usize] = None;
            }
            if pipe.write_raw() >= 0 {
                unsafe {
                    libc::dup2(pipe.write_raw(), i);
                }
            }
        }
    }

    /// Point standard input at /dev/null.
    pub fn attach_dev_null(&mut self, dev_null: &OwnedFd) {
        let i = libc::STDIN_FILENO as usize;
        if self.faked[i] {
            self.faked[i] = false;
            self.saved[i] = None;
        }
        unsafe {
            libc::dup2(dev_null.as_raw_fd(), libc::STDIN_FILENO);
        }
    }

    /// The listening socket supersedes whatever occupied descriptor 3.
    pub fn release_listen_slot(&mut self) {
        let i = LISTEN_SOCKET_FILENO as usize;
        if self.faked[i] {
            self.faked[i] = false;
            self.saved[i] = None;
            unsafe {
                libc::close(LISTEN_SOCKET_FILENO);
            }
        }
    }

    /// Fill the gaps in the saved descriptors so every slot has a usable
    /// last-resort destination.
    pub fn last_resort_defaults(&mut self, is_system: bool, prog: &str, dev_null: Option<&OwnedFd>) {
        if self.saved[0].is_none() {
            self.saved[0] = dev_null.and_then(|f| dup_fd(f.as_raw_fd()));
        }
        if is_system {
            // Always open the console, to turn on console events even when
            // standard output was inherited open.
            let console = unsafe {
                libc::open(c"/dev/console".as_ptr(), libc::O_RDWR)
            };
            let console_fd = if console < 0 {
                let error = std::io::Error::last_os_error();
                eprintln!("{prog}: ERROR: /dev/console: {error}");
                self.saved[0].as_ref().and_then(|f| dup_fd(f.as_raw_fd()))
            } else {
                set_blocking(console);
                let owned = unsafe { OwnedFd::from_raw_fd(console) };
                platform::accept_console_signals(owned.as_raw_fd());
                Some(owned)
            };
            if self.saved[1].is_none() {
                self.saved[1] = console_fd.as_ref().and_then(|f| dup_fd(f.as_raw_fd()));
            }
        } else if self.saved[1].is_none() {
            self.saved[1] = self.saved[0].as_ref().and_then(|f| dup_fd(f.as_raw_fd()));
        }
        if self.saved[2].is_none() {
            self.saved[2] = self.saved[1].as_ref().and_then(|f| dup_fd(f.as_raw_fd()));
        }
    }

    pub fn saved_raw(&self, i: usize) -> RawFd {
        self.saved[i].as_ref().map(|f| f.as_raw_fd()).unwrap_or(-1)
    }

    /// Restore the last-resort descriptors onto 0..=3, used when the pipe
    /// is being closed so the logger can drain and exit.
    pub fn restore_all(&self) {
        for i in 0..=LISTEN_SOCKET_FILENO {
            let fd = self.saved_raw(i as usize);
            if fd >= 0 {
                unsafe {
                    libc::dup2(fd, i);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_open_close() {
        let mut pipe = LogPipe::open("test");
        assert!(pipe.is_open());
        assert!(pipe.read_raw() >= 0);
        assert!(pipe.write_raw() >= 0);
        pipe.close();
        assert!(!pipe.is_open());
        assert_eq!(pipe.read_raw(), -1);
    }

    #[test]
    fn test_dev_null_opens() {
        let fd = open_dev_null("test").unwrap();
        assert!(fd.as_raw_fd() >= 0);
    }

    #[test]
    fn test_dup_fd_clears_nonblocking() {
        let null = open_dev_null("test").unwrap();
        let d = dup_fd(null.as_raw_fd()).unwrap();
        let flags = unsafe { libc::fcntl(d.as_raw_fd(), libc::F_GETFL, 0) };
        assert_eq!(flags & libc::O_NONBLOCK, 0);
    }
}
