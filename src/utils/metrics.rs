//! OTel-native metrics instruments.
//!
//! Centralized metric definitions using OpenTelemetry meters.
//! All instruments are lazily initialized and feature-gated behind `otel`.
//!
//! Naming follows OTel semantic conventions (dot-separated).

use std::sync::LazyLock;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

use crate::envelope::EventKind;

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("productsync"));

// ============================================================================
// Publisher
// ============================================================================

/// Total publish attempts.
pub static PUBLISH_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("productsync.publish.total")
        .with_description("Total publish attempts")
        .build()
});

/// Duration of a publish attempt, connect through release.
pub static PUBLISH_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("productsync.publish.duration")
        .with_description("Publish attempt duration")
        .with_unit("s")
        .build()
});

// ============================================================================
// Consumer
// ============================================================================

/// Total deliveries processed.
pub static CONSUME_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("productsync.consume.total")
        .with_description("Total deliveries processed")
        .build()
});

/// Deliveries whose projection failed to apply.
pub static APPLY_FAILURES: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("productsync.apply.failures")
        .with_description("Deliveries that failed to apply")
        .build()
});

// ============================================================================
// Attribute helpers
// ============================================================================

pub fn kind_attr(kind: EventKind) -> KeyValue {
    KeyValue::new("kind", kind.as_str())
}

pub fn outcome_attr(outcome: &'static str) -> KeyValue {
    KeyValue::new("outcome", outcome)
}

pub fn queue_attr(queue: &str) -> KeyValue {
    KeyValue::new("queue", queue.to_string())
}

/// Attributes for a publish attempt.
pub fn outcome_attrs(kind: EventKind, ok: bool) -> [KeyValue; 2] {
    [
        kind_attr(kind),
        outcome_attr(if ok { "success" } else { "error" }),
    ]
}

/// Attributes for a processed delivery.
pub fn consume_attrs(queue: &str, outcome: &'static str) -> [KeyValue; 2] {
    [queue_attr(queue), outcome_attr(outcome)]
}
