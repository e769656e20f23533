//! Logger initialisation for the meta planning executables
//!
//! Records go to stdout and to the session's log file. Each line is prefixed with the elapsed
//! session time and a coloured level tag. Records logged from a thread other than `main` (for
//! instance the replanning worker) also carry the thread's name, so interleaved planning and
//! control logs can be told apart.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use log::{self, info};
use std::{collections::HashMap, thread};
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Invalid log level \"{level}\" for target \"{target}\"")]
    InvalidTargetLevel { target: String, level: String },

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `target_levels` maps a module path (e.g. `meta_lib::nav::rrt`) to the level name it should be
/// limited to, which allows chatty modules to be quietened without lowering the global level.
///
/// # Notes
///
/// - `min_level` must be at least `log::Level::Info`.
///
/// # Safety
///
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    min_level: LevelFilter,
    target_levels: &HashMap<String, String>,
    session: &session::Session,
) -> Result<(), LoggerInitError> {
    if min_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level));
    }

    let overrides = parse_target_levels(target_levels)?;

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            let prefix = format!(
                "[{:10.6} {}]",
                session::get_elapsed_seconds(),
                level_to_str(record.level())
            );

            let current = thread::current();
            let thread_tag = match current.name() {
                Some("main") | None => String::new(),
                Some(name) => format!(" ({})", name),
            };

            // Targets are only worth the space below info
            if record.level() > log::Level::Info {
                out.finish(format_args!(
                    "{}{} {}: {}",
                    prefix,
                    thread_tag,
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!("{}{} {}", prefix, thread_tag, message))
            }
        })
        .level(min_level);

    for (target, level) in &overrides {
        dispatch = dispatch.level_for(target.clone(), *level);
    }

    dispatch
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    for (target, level) in &overrides {
        info!("    {} limited to {:?}", target, level);
    }
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Parse per-target level names, sorted by target so the log header is stable.
fn parse_target_levels(
    target_levels: &HashMap<String, String>,
) -> Result<Vec<(String, LevelFilter)>, LoggerInitError> {
    let mut overrides = target_levels
        .iter()
        .map(|(target, level)| match level.parse::<LevelFilter>() {
            Ok(l) => Ok((target.clone(), l)),
            Err(_) => Err(LoggerInitError::InvalidTargetLevel {
                target: target.clone(),
                level: level.clone(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    overrides.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(overrides)
}

/// Get the string representation of a log level
fn level_to_str(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => "TRC".dimmed().italic(),
        log::Level::Debug => "DBG".dimmed(),
        log::Level::Info => "INF".normal(),
        log::Level::Warn => "WRN".yellow(),
        log::Level::Error => "ERR".red().bold(),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
