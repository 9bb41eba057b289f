use std::path::PathBuf;

use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

use crate::config::AppPaths;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

fn err(msg: impl Into<String>) -> AnyError {
    Box::new(std::io::Error::new(std::io::ErrorKind::Other, msg.into()))
}

fn log_paths(paths: &AppPaths) -> (PathBuf, PathBuf) {
    let logs_dir = paths.logs_dir();
    let log_file = logs_dir.join("wb-rewind.log");
    (logs_dir, log_file)
}

/// Rolling file log under `<root>/logs`, plus stderr at debug level when `verbose`.
pub fn init(paths: &AppPaths, verbose: bool) -> Result<PathBuf, AnyError> {
    let (logs_dir, log_file) = log_paths(paths);
    std::fs::create_dir_all(&logs_dir)?;

    // 10MB per file, keep 5 rolled files.
    let roller = FixedWindowRoller::builder()
        .build(&logs_dir.join("wb-rewind.{}.log").to_string_lossy(), 5)
        .map_err(|e| err(e.to_string()))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(10 * 1024 * 1024)), Box::new(roller));

    let file_appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} {M} - {m}{n}",
        )))
        .build(&log_file, Box::new(policy))
        .map_err(|e| err(e.to_string()))?;

    let mut cfg_builder =
        Config::builder().appender(Appender::builder().build("file", Box::new(file_appender)));
    let mut root_builder = Root::builder().appender("file");
    if verbose {
        let stderr = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(Box::new(PatternEncoder::new("[{l}] {m}{n}")))
            .build();
        cfg_builder = cfg_builder.appender(Appender::builder().build("stderr", Box::new(stderr)));
        root_builder = root_builder.appender("stderr");
    }

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let cfg = cfg_builder
        .build(root_builder.build(level))
        .map_err(|e| err(e.to_string()))?;

    // Ignore error if already initialized.
    if log4rs::init_config(cfg).is_err() {
        return Ok(log_file);
    }

    std::panic::set_hook(Box::new(|info| {
        log::error!("panic: {info}");
        eprintln!("{info}");
    }));

    log::info!("logger initialized");
    log::info!("log file: {}", log_file.to_string_lossy());
    Ok(log_file)
}
