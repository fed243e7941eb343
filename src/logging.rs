//! Logging configuration
//!
//! Uses log4rs with two appenders:
//! 1. ConsoleAppender - stdout output
//! 2. RollingFileAppender - log files with rotation

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::PathBuf;

/// Initialize log4rs with console and rolling file appenders
///
/// # Log File Configuration
/// - File: `{log_dir}/nodewarden.1.log`
/// - Max size: 20 MB per file
/// - Max count: 10 files (rotation)
/// - Pattern: `{timestamp} [{level}] {target} - {message}`
pub fn init_logger(log_dir: PathBuf) -> anyhow::Result<log4rs::Handle> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S)} [{l}] {t} - {m}{n}",
        )))
        .build();

    std::fs::create_dir_all(&log_dir)?;

    let log_file = log_dir.join("nodewarden.1.log");
    let log_pattern = log_dir.join("nodewarden.{}.log");

    let roller = FixedWindowRoller::builder()
        .base(1)
        .build(&log_pattern.to_string_lossy(), 10)
        .map_err(|e| anyhow::anyhow!("log roller setup failed: {}", e))?;
    let trigger = SizeTrigger::new(20 * 1024 * 1024); // 20 MB
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let logfile = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} [{l}] {t} - {m}{n}",
        )))
        .build(log_file, Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(
            Root::builder()
                .appender("console")
                .appender("logfile")
                .build(LevelFilter::Info),
        )?;

    Ok(log4rs::init_config(config)?)
}
