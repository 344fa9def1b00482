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
            "review_engagement_ecache_hit_total",
            Unit::Count,
            "Entity cache reads served from the backend."
        );
        describe_counter!(
            "review_engagement_ecache_miss_total",
            Unit::Count,
            "Entity cache reads that fell through to the store."
        );
        describe_counter!(
            "review_engagement_qcache_hit_total",
            Unit::Count,
            "List pages served from the query cache."
        );
        describe_counter!(
            "review_engagement_qcache_miss_total",
            Unit::Count,
            "List pages that had to be queried."
        );
        describe_counter!(
            "review_engagement_qcache_invalidate_total",
            Unit::Count,
            "Query cache invalidations by mode."
        );
        describe_counter!(
            "review_engagement_cache_evict_total",
            Unit::Count,
            "In-memory cache entries evicted due to capacity."
        );
        describe_counter!(
            "review_engagement_events_published_total",
            Unit::Count,
            "Service events published per topic."
        );
        describe_counter!(
            "review_engagement_events_failed_total",
            Unit::Count,
            "Service events that could not be encoded or published."
        );
        describe_counter!(
            "review_engagement_requests_total",
            Unit::Count,
            "Pipeline executions per transport and outcome."
        );
        describe_histogram!(
            "review_engagement_command_ms",
            Unit::Milliseconds,
            "Database command latency in milliseconds."
        );
    });
}
