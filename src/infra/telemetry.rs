use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const OUTCOME_COUNTER: &str = "etagger_validator_outcome_total";
pub const STORE_ERROR_COUNTER: &str = "etagger_validator_store_errors_total";
pub const READ_LATENCY_HISTOGRAM: &str = "etagger_http_user_read_ms";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            OUTCOME_COUNTER,
            Unit::Count,
            "Coherence engine outcomes by tag (hit, miss, write-invalidate, degraded-invalidate)."
        );
        describe_counter!(
            STORE_ERROR_COUNTER,
            Unit::Count,
            "Validator cache operations that failed or timed out."
        );
        describe_histogram!(
            READ_LATENCY_HISTOGRAM,
            Unit::Milliseconds,
            "Latency of user reads, labelled by cache outcome."
        );
    });
}
