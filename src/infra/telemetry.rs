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
            "pagecache_hit_total",
            Unit::Count,
            "Total number of requests served from the page cache."
        );
        describe_counter!(
            "pagecache_miss_total",
            Unit::Count,
            "Total number of eligible requests that missed the page cache."
        );
        describe_counter!(
            "pagecache_store_total",
            Unit::Count,
            "Total number of captured pages written to the active backend."
        );
        describe_counter!(
            "pagecache_store_failed_total",
            Unit::Count,
            "Total number of page writes that failed and were skipped."
        );
        describe_counter!(
            "pagecache_evict_total",
            Unit::Count,
            "Total number of cached pages evicted, labelled by reason."
        );
        describe_gauge!(
            "pagecache_event_queue_len",
            Unit::Count,
            "Current number of pending content events in the queue."
        );
        describe_histogram!(
            "pagecache_invalidate_ms",
            Unit::Milliseconds,
            "Invalidation fan-out latency in milliseconds."
        );
    });
}
