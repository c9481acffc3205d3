// Logging module
use colored::*;
use log::{Level, LevelFilter};

/// Format log level with color for console
fn format_level_colored(level: Level) -> ColoredString {
    match level {
        Level::Error => format!("[{:5}]", level).bright_red().bold(),
        Level::Warn => format!("[{:5}]", level).bright_yellow().bold(),
        Level::Info => format!("[{:5}]", level).bright_green().bold(),
        Level::Debug => format!("[{:5}]", level).bright_blue().bold(),
        Level::Trace => format!("[{:5}]", level).bright_magenta().bold(),
    }
}

/// Initialize console logging.
/// Pattern (colored): [timestamp] [LEVEL] - module - message
pub fn init_logging(verbose: bool) -> Result<(), fern::InitError> {
    let level_filter = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    fern::Dispatch::new()
        .level(level_filter)
        // Keep HTTP plumbing quiet even in verbose runs
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {} - {} - {}",
                format!("[{}]", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
                    .bright_green()
                    .bold(),
                format_level_colored(record.level()),
                record.target().bright_magenta(),
                message
            ))
        })
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}
