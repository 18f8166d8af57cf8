//! Tracing subscriber setup for the `didsrv` binary.
//!
//! Everything goes to stderr; `didsrv resolve` prints documents on stdout
//! and the two must not interleave. `RUST_LOG`, when set, replaces the
//! filter chosen by the subcommand.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
    Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines with the emitting module.
    Pretty,
    /// One JSON object per event, fields flattened to the top level.
    Json,
}

impl LogFormat {
    /// `json` (any case) selects [`LogFormat::Json`]; anything else falls
    /// back to [`LogFormat::Pretty`].
    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }

    fn layer(self) -> BoxedLayer {
        match self {
            LogFormat::Pretty => fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_writer(std::io::stderr)
                .boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// `default_filter` uses `EnvFilter` directive syntax, for example
/// `didsrv_node=info,tower_http=debug`. Fails if a subscriber is already
/// installed.
pub fn init_logging(default_filter: &str, format: LogFormat) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let directives = filter.to_string();

    tracing_subscriber::registry()
        .with(format.layer())
        .with(filter)
        .try_init()?;

    tracing::debug!(?format, filter = %directives, "logging initialized");
    Ok(())
}
