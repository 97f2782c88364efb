use std::io;

use anyhow::Result;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

pub struct LogConfig {
    pub console_level: LevelFilter,
    /// File sink level; only used when `log_file` is set.
    pub file_level: LevelFilter,
    pub log_file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_level: LevelFilter::Info,
            file_level: LevelFilter::Debug,
            log_file: None,
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Set up logging: colored output on stderr, plus an optional file sink.
/// Each sink formats for itself so color escapes never reach the file.
pub fn init(config: LogConfig) -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let console = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] [{}] {}",
                timestamp(),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .level(config.console_level)
        .chain(io::stderr());

    let mut dispatch = fern::Dispatch::new().chain(console);

    if let Some(path) = config.log_file {
        let file = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} [{}] [{}] {}",
                    timestamp(),
                    record.target(),
                    record.level(),
                    message
                ))
            })
            .level(config.file_level)
            .chain(fern::log_file(path)?);
        dispatch = dispatch.chain(file);
    }

    dispatch.apply()?;
    Ok(())
}

/// Map a user-supplied level string onto a filter; unknown strings fall
/// back to Info.
pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_strings_parse_case_insensitively() {
        assert_eq!(parse_log_level("DEBUG"), LevelFilter::Debug);
        assert_eq!(parse_log_level("off"), LevelFilter::Off);
        assert_eq!(parse_log_level("nonsense"), LevelFilter::Info);
    }
}
