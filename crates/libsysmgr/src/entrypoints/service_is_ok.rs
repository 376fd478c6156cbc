//! service-is-ok: probe whether a supervised service directory is live.
//!
//! A supervisor that is running keeps the `ok` FIFO open for reading, so a
//! writable open succeeds.  Exit status 0 means supervised, 111 means the
//! directory itself is missing (worth retrying), 100 means present but
//! unsupervised.

use clap::Parser;

use crate::error::{EXIT_PERMANENT_FAILURE, EXIT_SUCCESS, EXIT_TEMPORARY_FAILURE, EXIT_USAGE};

#[derive(Parser, Debug)]
#[command(name = "service-is-ok", about = "Probe a supervised service directory")]
struct Cli {
    /// Service directory.
    directory: String,
}

fn open_for_write(path: &std::path::Path) -> bool {
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .is_ok()
}

pub fn run_service_is_ok(args: &[String]) -> i32 {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return EXIT_USAGE;
        }
    };
    let dir = std::path::Path::new(&cli.directory);
    if !dir.is_dir() {
        return EXIT_TEMPORARY_FAILURE;
    }
    if open_for_write(&dir.join("ok")) || open_for_write(&dir.join("supervise/ok")) {
        return EXIT_SUCCESS;
    }
    EXIT_PERMANENT_FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(dir: &str) -> i32 {
        let args: Vec<String> = vec!["service-is-ok".to_owned(), dir.to_owned()];
        run_service_is_ok(&args)
    }

    #[test]
    fn test_missing_directory_is_temporary() {
        assert_eq!(run("/nonexistent/service/dir"), EXIT_TEMPORARY_FAILURE);
    }

    #[test]
    fn test_unsupervised_directory_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run(dir.path().to_str().unwrap()), EXIT_PERMANENT_FAILURE);
    }

    #[test]
    fn test_ok_file_means_supervised() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok"), b"").unwrap();
        assert_eq!(run(dir.path().to_str().unwrap()), EXIT_SUCCESS);
    }

    #[test]
    fn test_supervise_subdir_ok() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("supervise")).unwrap();
        std::fs::write(dir.path().join("supervise/ok"), b"").unwrap();
        assert_eq!(run(dir.path().to_str().unwrap()), EXIT_SUCCESS);
    }
}
