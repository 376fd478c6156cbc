//! sysmgr-escape — escape and unescape bundle name components.
//!
//! The same escaping the converters apply when they derive `mount@…` and
//! template instance names, exposed for interactive use and scripts.

use clap::Parser;
use libsysmgr::unit_name;
use std::process;

#[derive(Parser, Debug)]
#[command(
    name = "sysmgr-escape",
    about = "Escape strings for use as service bundle names",
    version
)]
struct Cli {
    /// Unescape the given strings instead of escaping them.
    #[arg(short, long)]
    unescape: bool,

    /// Use the alternative escape algorithm, which leaves `-` and `/`
    /// untouched.
    #[arg(short, long)]
    alt: bool,

    /// Prepend a bundle class, e.g. "mount" to produce "mount@…".
    #[arg(long, value_name = "CLASS")]
    class: Option<String>,

    /// The strings to escape or unescape.  If none are given, reads from
    /// stdin (one per line).
    strings: Vec<String>,
}

fn read_stdin_lines() -> Vec<String> {
    use std::io::BufRead;
    let stdin = std::io::stdin();
    let mut lines = Vec::new();
    for line in stdin.lock().lines() {
        match line {
            Ok(l) => lines.push(l),
            Err(e) => {
                eprintln!("Error reading stdin: {e}");
                process::exit(1);
            }
        }
    }
    lines
}

fn do_escape(input: &str, cli: &Cli) -> Result<String, String> {
    if cli.unescape {
        let name = match &cli.class {
            Some(class) => input
                .strip_prefix(&format!("{class}@"))
                .unwrap_or(input),
            None => input,
        };
        unit_name::unescape(cli.alt, name).ok_or_else(|| format!("Failed to unescape: {name}"))
    } else {
        let escaped = unit_name::escape(cli.alt, input);
        match &cli.class {
            Some(class) => Ok(format!("{class}@{escaped}")),
            None => Ok(escaped),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let inputs = if cli.strings.is_empty() {
        read_stdin_lines()
    } else {
        cli.strings.clone()
    };

    if inputs.is_empty() {
        eprintln!("Error: no input strings provided.");
        process::exit(1);
    }

    let mut exit_code = 0;

    for input in &inputs {
        match do_escape(input, &cli) {
            Ok(result) => println!("{result}"),
            Err(e) => {
                eprintln!("Error: {e}");
                exit_code = 1;
            }
        }
    }

    process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cli(unescape: bool, alt: bool, class: Option<&str>) -> Cli {
        Cli {
            unescape,
            alt,
            class: class.map(String::from),
            strings: vec![],
        }
    }

    #[test]
    fn test_basic_escape() {
        let cli = make_cli(false, false, None);
        assert_eq!(do_escape("/dev/sda1", &cli).unwrap(), "-dev-sda1");
    }

    #[test]
    fn test_basic_unescape() {
        let cli = make_cli(true, false, None);
        assert_eq!(do_escape("-dev-sda1", &cli).unwrap(), "/dev/sda1");
    }

    #[test]
    fn test_class_prefix() {
        let cli = make_cli(false, false, Some("mount"));
        assert_eq!(do_escape("/var/log", &cli).unwrap(), "mount@-var-log");
        let cli = make_cli(true, false, Some("mount"));
        assert_eq!(do_escape("mount@-var-log", &cli).unwrap(), "/var/log");
    }

    #[test]
    fn test_alt_escape() {
        let cli = make_cli(false, true, None);
        assert_eq!(do_escape("/dev/sda1", &cli).unwrap(), "/dev/sda1");
        assert_eq!(do_escape("a b", &cli).unwrap(), r"a\x20b");
    }

    #[test]
    fn test_unescape_failure() {
        let cli = make_cli(true, false, None);
        assert!(do_escape(r"\x2", &cli).is_err());
    }
}
