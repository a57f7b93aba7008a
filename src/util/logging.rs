use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

use crate::config::LogLevel;
use crate::error::{BridgeError, Result};

impl From<&LogLevel> for LevelFilter {
    fn from(level: &LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init(level: &LogLevel) -> Result<()> {
    let default_level = LevelFilter::from(level).to_string().to_lowercase();

    Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
        .map_err(|e| BridgeError::Other(format!("Failed to initialize logging: {}", e)))
}
