use courier_config::Config;

use crate::TelemetryLog;

/// A callback filtering or transforming logs before they are buffered.
pub type BeforeSendLog = Box<dyn Fn(TelemetryLog) -> Option<TelemetryLog> + Send + Sync>;

/// Options controlling how the SDK captures and delivers telemetry.
#[derive(Default)]
pub struct Options {
    /// The DSN to deliver telemetry to.
    ///
    /// Without a DSN the client initializes in disabled mode and all capture
    /// calls are no-ops.
    pub dsn: Option<String>,

    /// The environment reported on all telemetry, e.g. `"production"`.
    pub environment: Option<String>,

    /// The release reported on all telemetry, e.g. `"app@1.2.0"`.
    pub release: Option<String>,

    /// A stable identifier of this installation, used as the fallback
    /// `user.id` attribute when no user is set on the scope.
    pub installation_id: Option<String>,

    /// Filters or transforms logs before they enter the batch buffer.
    ///
    /// Returning `None` drops the log silently.
    pub before_send_log: Option<BeforeSendLog>,

    /// Ambient configuration: cache location and bounds, HTTP timeouts,
    /// batching thresholds, logging.
    pub config: Config,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("dsn", &self.dsn)
            .field("environment", &self.environment)
            .field("release", &self.release)
            .field("installation_id", &self.installation_id)
            .field(
                "before_send_log",
                &self.before_send_log.as_ref().map(|_| "<closure>"),
            )
            .field("config", &self.config)
            .finish()
    }
}

impl Options {
    /// Returns the effective environment, defaulting to `"production"`.
    pub fn environment(&self) -> &str {
        self.environment.as_deref().unwrap_or("production")
    }
}
