use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "seoforge_artifact_hit_total",
            Unit::Count,
            "Artifact lookups served from the store."
        );
        describe_counter!(
            "seoforge_artifact_miss_total",
            Unit::Count,
            "Artifact lookups that found nothing stored."
        );
        describe_counter!(
            "seoforge_artifact_stale_total",
            Unit::Count,
            "Artifact lookups that found a stale entry."
        );
        describe_counter!(
            "seoforge_artifact_build_failed_total",
            Unit::Count,
            "Artifact builds that returned an error."
        );
        describe_histogram!(
            "seoforge_artifact_build_ms",
            Unit::Milliseconds,
            "Artifact build latency in milliseconds."
        );
        describe_counter!(
            "seoforge_event_routed_total",
            Unit::Count,
            "Lifecycle events routed, by event and outcome."
        );
        describe_gauge!(
            "seoforge_event_queue_len",
            Unit::Count,
            "Lifecycle events waiting in the queue."
        );
        describe_histogram!(
            "seoforge_event_consume_ms",
            Unit::Milliseconds,
            "Event batch consumption latency in milliseconds."
        );
    });
}
