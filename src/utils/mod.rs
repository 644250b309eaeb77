//! Process bootstrap and metrics.

pub mod bootstrap;
#[cfg(feature = "otel")]
pub mod metrics;
