//! The system / per-user manager.
//!
//! A single-threaded cooperative loop around one blocking signal wait.
//! Each turn: reap children, dispatch at most one control-helper job,
//! enforce the shutdown progression, respawn the logger and the service
//! manager, then wait.  Child reaping always happens before intent
//! dispatch so that "at most one helper" is decided against fresh state.
//!
//! The manager never exits on error.  Everything is logged and swallowed;
//! the only ways out are the shutdown finalizer and a dead event queue.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};

use log::{debug, info, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{ForkResult, Pid};

use crate::boot;
use crate::children::{ChildTable, Role, reap_exited};
use crate::config::{basename_of, effective_user_runtime_dir};
use crate::error::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::log_pipe::{LISTEN_SOCKET_FILENO, LogPipe, StdioState, open_dev_null};
use crate::logging;
use crate::platform;
use crate::shutdown;
use crate::signals::{IntentSet, SignalSource, classify_system, classify_user, latch_all};

pub fn run_system_manager(args: &[String]) -> i32 {
    common_manager(args)
}

pub fn run_per_user_manager(args: &[String]) -> i32 {
    common_manager(args)
}

/// Signals whose default disposition would kill the manager; they are
/// ignored up front so that only the registered event source sees them.
fn prevent_default_for_fatal_signals() {
    let mut signals = vec![
        libc::SIGTERM,
        libc::SIGINT,
        libc::SIGQUIT,
        libc::SIGHUP,
        libc::SIGUSR1,
        libc::SIGUSR2,
        libc::SIGPIPE,
        libc::SIGABRT,
        libc::SIGALRM,
        libc::SIGIO,
    ];
    #[cfg(target_os = "linux")]
    signals.push(libc::SIGPWR);
    for signo in signals {
        unsafe {
            libc::signal(signo, libc::SIG_IGN);
        }
    }
}

/// Restore every signal to its default action; used in forked children
/// before exec.
fn default_all_signals() {
    for signo in 1..64 {
        unsafe {
            libc::signal(signo, libc::SIG_DFL);
        }
    }
}

fn to_cstrings(args: &[&str]) -> Vec<CString> {
    args.iter()
        .filter_map(|a| CString::new(*a).ok())
        .collect()
}

/// exec by name through PATH; only returns on failure.
fn execvp_argv(argv: &[CString]) -> ! {
    if let Some(prog) = argv.first() {
        let _ = nix::unistd::execvp(prog, argv);
    }
    unsafe {
        let msg = b"exec failed\n";
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::_exit(1);
    }
}

/// Bind the stream socket the service manager accepts control connections
/// on.  A stale socket path from a previous boot is removed first.  The
/// descriptor stays close-on-exec; the child that should inherit it gets
/// an explicit dup2 onto the listen descriptor instead.
fn listen_service_manager_socket(is_system: bool, prog: &str) -> Option<OwnedFd> {
    let path = if is_system {
        "/run/service-manager/control".to_owned()
    } else {
        let dir = format!("{}service-manager", effective_user_runtime_dir());
        let _ = std::fs::create_dir_all(&dir);
        format!("{dir}/control")
    };
    let _ = std::fs::remove_file(&path);
    match std::os::unix::net::UnixListener::bind(&path) {
        Ok(listener) => Some(OwnedFd::from(listener)),
        Err(e) => {
            eprintln!("{prog}: ERROR: {path}: {e}");
            None
        }
    }
}

/// Fork a control helper for one subcommand + option.
fn spawn_control_helper(
    is_system: bool,
    prog: &str,
    subcommand: &str,
    option: &str,
) -> Option<Pid> {
    let mut argv = vec![
        "move-to-control-group",
        "system-control.slice",
        "system-control",
        subcommand,
        "--verbose",
    ];
    if !is_system {
        argv.push("--user");
    }
    argv.push(option);
    let argv = to_cstrings(&argv);
    match unsafe { nix::unistd::fork() } {
        Err(e) => {
            eprintln!("{prog}: ERROR: fork: {e}");
            None
        }
        Ok(ForkResult::Child) => {
            default_all_signals();
            unsafe {
                libc::alarm(180);
            }
            execvp_argv(&argv);
        }
        Ok(ForkResult::Parent { child }) => {
            info!("system-control (pid {child}) started ({subcommand} {option})");
            Some(child)
        }
    }
}

/// Fork the one-shot init helper with the manager's original arguments.
fn spawn_init_helper(is_system: bool, prog: &str, orig_args: &[String]) -> Option<Pid> {
    let mut argv: Vec<&str> = vec![
        "move-to-control-group",
        "system-control.slice",
        "system-control",
        "init",
    ];
    if !is_system {
        argv.push("--user");
    }
    for arg in orig_args {
        argv.push(arg.as_str());
    }
    let argv = to_cstrings(&argv);
    match unsafe { nix::unistd::fork() } {
        Err(e) => {
            eprintln!("{prog}: ERROR: fork: {e}");
            None
        }
        Ok(ForkResult::Child) => {
            default_all_signals();
            unsafe {
                libc::alarm(420);
            }
            execvp_argv(&argv);
        }
        Ok(ForkResult::Parent { child }) => {
            info!(
                "system-control (pid {child}) started (init {})",
                orig_args.join(" ")
            );
            Some(child)
        }
    }
}

/// Fork the log catcher.  It reads the pipe on stdin and writes its own
/// diagnostics to the last-resort descriptors.
fn spawn_cyclog(
    is_system: bool,
    prog: &str,
    pipe: &LogPipe,
    stdio: &StdioState,
) -> Option<Pid> {
    let slice = if is_system {
        "system-manager-log.slice"
    } else {
        "per-user-manager-log.slice"
    };
    let argv = to_cstrings(&[
        "move-to-control-group",
        slice,
        "cyclog",
        "--max-file-size",
        "32768",
        "--max-total-size",
        "1048576",
        ".",
    ]);
    match unsafe { nix::unistd::fork() } {
        Err(e) => {
            eprintln!("{prog}: ERROR: fork: {e}");
            None
        }
        Ok(ForkResult::Child) => {
            boot::change_to_log_root(is_system);
            if is_system {
                let _ = nix::unistd::setsid();
            }
            default_all_signals();
            unsafe {
                if pipe.read_raw() >= 0 {
                    libc::dup2(pipe.read_raw(), libc::STDIN_FILENO);
                }
                if stdio.saved_raw(1) >= 0 {
                    libc::dup2(stdio.saved_raw(1), libc::STDOUT_FILENO);
                }
                if stdio.saved_raw(2) >= 0 {
                    libc::dup2(stdio.saved_raw(2), libc::STDERR_FILENO);
                }
                libc::close(LISTEN_SOCKET_FILENO);
            }
            execvp_argv(&argv);
        }
        Ok(ForkResult::Parent { child }) => {
            info!("cyclog (pid {child}) started");
            Some(child)
        }
    }
}

/// Fork the service manager with the listen socket on descriptor 3.
fn spawn_service_manager(
    is_system: bool,
    prog: &str,
    dev_null: Option<&OwnedFd>,
    pipe: &LogPipe,
    socket: Option<&OwnedFd>,
) -> Option<Pid> {
    let argv = to_cstrings(&[
        "move-to-control-group",
        "service-manager.slice",
        "service-manager",
    ]);
    match unsafe { nix::unistd::fork() } {
        Err(e) => {
            eprintln!("{prog}: ERROR: fork: {e}");
            None
        }
        Ok(ForkResult::Child) => {
            #[cfg(target_os = "linux")]
            {
                // The default descriptor limit is far too low for a
                // supervisor holding two pipes per service.
                let limit = libc::rlimit {
                    rlim_cur: 16384,
                    rlim_max: 16384,
                };
                unsafe {
                    libc::setrlimit(libc::RLIMIT_NOFILE, &limit);
                }
            }
            if is_system {
                let _ = nix::unistd::setsid();
            }
            default_all_signals();
            unsafe {
                if let Some(null) = dev_null {
                    libc::dup2(null.as_raw_fd(), libc::STDIN_FILENO);
                }
                if pipe.write_raw() >= 0 {
                    libc::dup2(pipe.write_raw(), libc::STDOUT_FILENO);
                    libc::dup2(pipe.write_raw(), libc::STDERR_FILENO);
                }
                if let Some(sock) = socket {
                    libc::dup2(sock.as_raw_fd(), LISTEN_SOCKET_FILENO);
                    // Advertise the socket in the expected protocol.
                    let unset = libc::fcntl(LISTEN_SOCKET_FILENO, libc::F_GETFD, 0)
                        & !libc::FD_CLOEXEC;
                    libc::fcntl(LISTEN_SOCKET_FILENO, libc::F_SETFD, unset);
                }
                // SAFETY: freshly forked, single-threaded child.
                std::env::set_var("LISTEN_FDS", "1");
                std::env::set_var("LISTEN_PID", nix::unistd::getpid().to_string());
            }
            execvp_argv(&argv);
        }
        Ok(ForkResult::Parent { child }) => {
            info!("service-manager (pid {child}) started");
            Some(child)
        }
    }
}

fn common_manager(args: &[String]) -> i32 {
    let prog = args
        .first()
        .map(|a| basename_of(a).to_owned())
        .unwrap_or_else(|| "system-manager".to_owned());
    let prog = prog.as_str();
    let orig_args: Vec<String> = args.iter().skip(1).cloned().collect();

    // Role follows the pid, not the invocation name: either subcommand run
    // as process #1 is the system manager.
    let is_system = nix::unistd::getpid() == Pid::from_raw(1);

    let mut stdio = StdioState::capture(is_system);
    let mut pipe = LogPipe::open(prog);
    stdio.attach_pipe(&pipe);

    // Everything below writes into the pipe with no reader yet; keep the
    // chatter down until the first cyclog is up.
    boot::setup_process_state(is_system, prog);
    prevent_default_for_fatal_signals();

    let mut source = match if is_system {
        SignalSource::new_system()
    } else {
        SignalSource::new_user()
    } {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{prog}: FATAL: signal registration: {e}");
            return EXIT_FAILURE;
        }
    };

    if is_system {
        boot::initialize_system_clock_timezone(prog);
        boot::setup_api_volumes(prog);
        boot::make_run_directories(prog);
        if !platform::am_in_jail() {
            platform::disable_ctrl_alt_del();
        }
    }

    // Now /dev/null, /dev/console and friends exist.
    let dev_null = open_dev_null(prog);
    if let Some(null) = dev_null.as_ref() {
        stdio.attach_dev_null(null);
    }
    stdio.last_resort_defaults(is_system, prog, dev_null.as_ref());

    let service_manager_socket = listen_service_manager_socket(is_system, prog);
    stdio.release_listen_slot();

    let _ = logging::setup_logging(log::LevelFilter::Info);

    if !is_system {
        // Aspirational export for clients of the per-user manager; nothing
        // reads it back yet.
        // SAFETY: still single-threaded here.
        unsafe {
            std::env::set_var("MANAGER_PID", nix::unistd::getpid().to_string());
        }
    }

    let mut intents = IntentSet::at_boot();
    let mut table = ChildTable::default();
    let classify = if is_system { classify_system } else { classify_user };

    loop {
        if intents.child {
            for (pid, status) in reap_exited() {
                let Some(role) = table.clear_pid(pid) else {
                    continue;
                };
                match role {
                    Role::ControlHelper => info!("{} (pid {pid}) ended {status}", role.as_str()),
                    _ => warn!("{} (pid {pid}) ended {status}", role.as_str()),
                }
                if role == Role::Cyclog && status.abnormal() {
                    // Throttle respawns; any signal arriving in the
                    // meantime cuts the sleep short.
                    let delay = libc::timespec {
                        tv_sec: 0,
                        tv_nsec: 500_000_000,
                    };
                    unsafe {
                        libc::nanosleep(&delay, std::ptr::null_mut());
                    }
                }
            }
            intents.child = false;
        }

        // Run system-control if a job is pending and it isn't already
        // running.
        if !table.has(Role::ControlHelper) {
            if let Some((subcommand, option)) = intents.take_helper_job() {
                if let Some(pid) = spawn_control_helper(is_system, prog, subcommand, option) {
                    table.set(Role::ControlHelper, pid);
                }
            }
        }
        if !table.has(Role::ControlHelper) && intents.init {
            intents.init = false;
            if let Some(pid) = spawn_init_helper(is_system, prog, &orig_args) {
                table.set(Role::ControlHelper, pid);
            }
        }

        // Exit once stop has been signalled and both long-lived children
        // are gone.
        if intents.stop_signalled()
            && !table.has(Role::Cyclog)
            && !table.has(Role::ServiceManager)
        {
            break;
        }

        // Ask the service manager to stop.  Sending the signal again on a
        // later turn is harmless.
        if table.has(Role::ServiceManager)
            && intents.stop_signalled()
            && !table.has(Role::ControlHelper)
        {
            debug!("terminating service manager");
            if let Some(pid) = table.pid(Role::ServiceManager) {
                let _ = kill(pid, Signal::SIGTERM);
            }
        }

        // Restart the logger unless both stop has been signalled and the
        // service manager has exited.  While the service manager still
        // runs during a stop, the logger must keep draining the pipe.
        if !table.has(Role::Cyclog)
            && (!intents.stop_signalled() || table.has(Role::ServiceManager))
        {
            if let Some(pid) = spawn_cyclog(is_system, prog, &pipe, &stdio) {
                table.set(Role::Cyclog, pid);
            }
        }

        // With the service manager gone and stop signalled, close the pipe
        // so the logger sees EOF and exits on its own.
        if !table.has(Role::ServiceManager) && intents.stop_signalled() && pipe.is_open() {
            debug!("closing logger");
            stdio.restore_all();
            pipe.close();
        }

        // Restart the service manager unless stop has been signalled.
        if !table.has(Role::ServiceManager) && !intents.stop_signalled() {
            if let Some(pid) = spawn_service_manager(
                is_system,
                prog,
                dev_null.as_ref(),
                &pipe,
                service_manager_socket.as_ref(),
            ) {
                table.set(Role::ServiceManager, pid);
            }
        }

        if intents.unknown {
            warn!("Unknown signal ignored.");
            intents.unknown = false;
        }

        let batch = source.wait_one();
        latch_all(&mut intents, &batch, classify);
    }

    if is_system {
        shutdown::finalize(prog, &intents);
    }
    EXIT_SUCCESS
}
