//! Error kinds shared across the toolkit.
//!
//! Converters treat `Config` and `Io` errors as fatal: they print a
//! `prog: FATAL: …` line and exit non-zero.  The managers log and swallow
//! almost everything; their only exits are the shutdown finalizer and an
//! unrecoverable event-queue failure.

use std::fmt;

/// Process exit codes used throughout the toolkit.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
/// Permanent failure, in the daemontools tradition.
pub const EXIT_PERMANENT_FAILURE: i32 = 100;
/// Temporary failure, in the daemontools tradition.
pub const EXIT_TEMPORARY_FAILURE: i32 = 111;

#[derive(Debug)]
pub enum Error {
    /// Unreadable or malformed unit file or fstab row.
    Config { subject: String, detail: String },
    /// Filesystem or syscall failure.
    Io { subject: String, source: std::io::Error },
    /// Bad wire data (initctl magic, LISTEN_FDS contents).
    Protocol { detail: String },
    /// A supervised child ended abnormally.
    Child { role: &'static str, detail: String },
    /// Missing platform capability (sysctl, ioctl, …).
    Platform { detail: String },
    Internal { detail: String },
}

impl Error {
    pub fn config(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Config {
            subject: subject.into(),
            detail: detail.into(),
        }
    }

    pub fn io(subject: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            subject: subject.into(),
            source,
        }
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol {
            detail: detail.into(),
        }
    }

    /// The exit code a converter should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::Internal { .. } => EXIT_FAILURE,
            Self::Io { .. } => EXIT_FAILURE,
            Self::Protocol { .. } => EXIT_FAILURE,
            Self::Child { .. } => EXIT_TEMPORARY_FAILURE,
            Self::Platform { .. } => EXIT_PERMANENT_FAILURE,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Config { subject, detail } => write!(f, "{subject}: {detail}"),
            Self::Io { subject, source } => write!(f, "{subject}: {source}"),
            Self::Protocol { detail } => write!(f, "{detail}"),
            Self::Child { role, detail } => write!(f, "{role}: {detail}"),
            Self::Platform { detail } => write!(f, "{detail}"),
            Self::Internal { detail } => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            subject: String::new(),
            source: e,
        }
    }
}

/// Print the single-line fatal diagnostic a converter emits before exiting.
pub fn fatal(prog: &str, err: &Error) {
    eprintln!("{prog}: FATAL: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_subject() {
        let e = Error::config("/etc/fstab", "Unable to open fstab database.");
        assert_eq!(e.to_string(), "/etc/fstab: Unable to open fstab database.");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            Error::config("x", "y").exit_code(),
            EXIT_FAILURE
        );
        assert_eq!(
            Error::Platform {
                detail: "no sysctl".into()
            }
            .exit_code(),
            EXIT_PERMANENT_FAILURE
        );
        assert_eq!(
            Error::Child {
                role: "cyclog",
                detail: "signalled".into()
            }
            .exit_code(),
            EXIT_TEMPORARY_FAILURE
        );
    }
}
