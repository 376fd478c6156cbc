//! Log dispatcher setup.
//!
//! Everything goes to stderr: in the managers stderr is the logging pipe
//! drained by the cyclog child, and the converters are expected to keep
//! stdout clean for their own output.

pub fn setup_logging(level: log::LevelFilter) -> Result<(), String> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            let level = record.level();
            let colored_level = match level {
                log::Level::Error => format!("\x1b[31m{}\x1b[0m", level),
                log::Level::Warn => format!("\x1b[33m{}\x1b[0m", level),
                log::Level::Info => format!("\x1b[32m{}\x1b[0m", level),
                log::Level::Debug => format!("\x1b[34m{}\x1b[0m", level),
                log::Level::Trace => format!("\x1b[36m{}\x1b[0m", level),
            };
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                colored_level,
                message
            ));
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .map_err(|e| format!("Error while setting up logger: {e}"))
}
