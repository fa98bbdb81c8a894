//! Logging initialisation via tracing-subscriber.
//!
//! A bare level such as `"debug"` applies to this crate only; dependencies
//! stay at `warn` so key generation internals do not flood the bootstrap
//! output. Full directives (`"idp_bootstrap=trace,rcgen=debug"`) pass
//! through untouched.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

const CRATE_TARGET: &str = "idp_bootstrap";

/// Install the global subscriber, writing to stderr.
///
/// With `prefer_level` (a `-v` flag was given) `level` wins and `RUST_LOG`
/// is only the fallback; otherwise `RUST_LOG` wins over `level`.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let directive = filter_directive(level);
    let filter = if prefer_level {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => filter,
            Err(level_err) => EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            })?,
        }
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&directive))
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Turn a configured level into an `EnvFilter` directive.
pub fn filter_directive(level: &str) -> String {
    match parse_level(level) {
        Ok(_) => format!("warn,{CRATE_TARGET}={}", level.to_ascii_lowercase()),
        Err(_) => level.to_string(),
    }
}

/// Parse a bare level name; used to validate `[idp].log_level` at load time.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}
