//! Tracing subscriber setup for hosts embedding the engine.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::FabricGitOpsError;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `filter`, which wins over `info`. `log` records are
/// bridged into tracing. Returns `Ok(false)` if a subscriber was already
/// installed by an earlier call.
pub fn init_tracing(format: LogFormat, filter: Option<&str>) -> Result<bool, FabricGitOpsError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }

    tracing_log::LogTracer::init()
        .map_err(|e| FabricGitOpsError::Logging(format!("log bridge: {}", e)))?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter.unwrap_or(DEFAULT_FILTER)))
        .map_err(|e| FabricGitOpsError::Logging(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true),
            )
            .try_init(),
    };

    match installed {
        Ok(()) => Ok(true),
        // Another subscriber owns the process (e.g. a test harness); keep going.
        Err(e) => {
            tracing::debug!("tracing subscriber already set: {}", e);
            Ok(false)
        }
    }
}
