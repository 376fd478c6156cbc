#![allow(clippy::result_large_err)]

//! `libsysmgr` is the core library for system-manager-rs, a
//! service-supervision and system-initialization toolkit.
//!
//! It contains:
//! - The system / per-user manager: a single-threaded signal-event loop that
//!   supervises the service manager, the log catcher, and a one-shot control
//!   helper
//! - Boot staging (API filesystem mounts, runtime directories, clock and
//!   locale initialization)
//! - Unit file parsing (INI-style with appendable values and templates)
//! - Name escaping and `%` specifier substitution
//! - The service-bundle writer (scripts, relation symlinks, flag files)
//! - The fstab-to-bundle and unit-to-bundle converters
//! - Small listener and probe utilities (FIFO listener, initctl reader,
//!   service readiness check)

pub mod boot;
pub mod bundle;
pub mod children;
pub mod config;
pub mod entrypoints;
pub mod error;
pub mod fstab;
pub mod log_pipe;
pub mod logging;
pub mod platform;
pub mod scripts;
pub mod shutdown;
pub mod signals;
pub mod unit_name;
pub mod units;
