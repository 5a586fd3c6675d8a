use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use thiserror::Error;
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Install the process-wide subscriber that renders the cache's events.
///
/// Coordinator hit/miss/produce events are emitted at `debug`, key-lock
/// handles at `trace` and poisoned-lock recovery at `warn`, so
/// `logging.level` picks how much of the locking protocol is visible. A
/// `RUST_LOG` directive still refines it per target, e.g.
/// `keylock::cache::registry=trace`.
///
/// Fails if a global subscriber is already installed; embedders that own
/// their subscriber should call [`describe_metrics`] instead.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(event_layer(logging.format))
        .try_init()
        .map_err(|err| TelemetryError::Subscriber(err.to_string()))
}

/// Formatting layer for `format`; JSON output carries the caller's span list.
fn event_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    }
}

/// Register descriptions for every metric the cache emits.
///
/// Called by [`init`]; embedders that install their own subscriber can call it
/// directly. Repeated calls are no-ops.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "keylock_cache_hit_total",
            Unit::Count,
            "Cache reads answered from the store, by region and path (fast|locked)."
        );
        describe_counter!(
            "keylock_cache_miss_total",
            Unit::Count,
            "Lock-free reads that found nothing and went on to take the key lock."
        );
        describe_counter!(
            "keylock_cache_produce_total",
            Unit::Count,
            "Producer invocations, by region and outcome (stored|empty|error)."
        );
        describe_histogram!(
            "keylock_cache_lock_wait_ms",
            Unit::Milliseconds,
            "Time spent waiting to acquire a key lock in milliseconds."
        );
        describe_gauge!(
            "keylock_lock_registry_len",
            Unit::Count,
            "Key locks currently registered."
        );
        describe_counter!(
            "keylock_lock_poisoned_total",
            Unit::Count,
            "Poisoned cache locks recovered after a panic."
        );
        describe_counter!(
            "keylock_store_evict_total",
            Unit::Count,
            "Entries evicted from the in-memory store due to region capacity."
        );
    });
}
