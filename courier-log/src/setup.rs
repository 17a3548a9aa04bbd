use std::env;
use std::io::IsTerminal;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Controls the log format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise
    /// [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// Controls the diagnostic logging of the SDK.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level filter directive, e.g. `"info"` or `"courier=trace"`.
    pub level: String,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based
    /// on the TTY.
    pub format: LogFormat,

    /// When set to `true`, backtraces are forced on.
    ///
    /// Otherwise, backtraces can be enabled by setting the `RUST_BACKTRACE`
    /// variable to `full`.
    pub enable_backtraces: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Initializes the logging system.
///
/// The environment variable `RUST_LOG` takes precedence over the level
/// configured in [`LogConfig`]. Calling this function more than once is a
/// no-op.
///
/// # Example
///
/// ```
/// let config = courier_log::LogConfig {
///     level: "debug".to_owned(),
///     ..Default::default()
/// };
///
/// courier_log::init(&config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        env::set_var("RUST_BACKTRACE", "full");
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match (config.format, std::io::stderr().is_terminal()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => {
            builder.pretty().with_writer(std::io::stderr).try_init()
        }
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => builder
            .compact()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .try_init(),
        (LogFormat::Json, _) => builder.json().with_writer(std::io::stderr).try_init(),
    };

    // A subscriber installed by the host application wins.
    result.ok();
}

/// Initializes logging for tests.
///
/// Logs at debug level to the test writer so output is captured per test.
/// Safe to call from every test; repeated initialization is a no-op.
pub fn init_test() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init()
        .ok();
}
