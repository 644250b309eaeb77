//! Observability sink.
//!
//! Publisher and consumer open spans through an `ObservabilitySink` rather
//! than calling `tracing` directly, so tests can assert on parent linkage
//! without installing a global subscriber.
//!
//! - `TracingSink`: production sink backed by `tracing` spans. Under the
//!   `otel` feature the spans carry OpenTelemetry context and remote parents
//!   are attached with `tracing-opentelemetry`.
//! - `RecordingSink`: keeps finished spans in memory for assertions.

mod recording;

use tracing::field::{display, Empty};

use crate::envelope::TraceContext;

pub use recording::{RecordedSpan, RecordingSink};

/// Where a new span hangs in the trace tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SpanParent {
    /// Child of whatever span is current on this task.
    Current,
    /// Child of a span in another process, from propagated headers.
    Remote(TraceContext),
    /// Start of a fresh trace.
    Root,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error(String),
}

/// Source of spans.
pub trait ObservabilitySink: Send + Sync {
    fn start_span(&self, name: &'static str, parent: SpanParent) -> Box<dyn ActiveSpan>;
}

/// A span that has been started and not yet ended.
pub trait ActiveSpan: Send {
    /// Context to propagate so a remote span links as a child of this one.
    fn context(&self) -> TraceContext;

    fn set_attribute(&mut self, key: &'static str, value: String);

    fn set_status(&mut self, status: SpanStatus);

    /// The `tracing` span to instrument work with, so log lines land inside it.
    fn tracing_span(&self) -> tracing::Span;

    fn end(self: Box<Self>);
}

/// Production sink backed by `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl ObservabilitySink for TracingSink {
    fn start_span(&self, name: &'static str, parent: SpanParent) -> Box<dyn ActiveSpan> {
        let span = match &parent {
            SpanParent::Current => tracing::info_span!(
                "span",
                otel.name = name,
                otel.status_code = Empty,
                otel.status_message = Empty,
                trace_id = Empty,
            ),
            SpanParent::Remote(_) | SpanParent::Root => tracing::info_span!(
                parent: None,
                "span",
                otel.name = name,
                otel.status_code = Empty,
                otel.status_message = Empty,
                trace_id = Empty,
            ),
        };

        let fallback = match &parent {
            SpanParent::Remote(ctx) => {
                #[cfg(feature = "otel")]
                {
                    use tracing_opentelemetry::OpenTelemetrySpanExt;
                    span.set_parent(ctx.to_context());
                }
                ctx.child()
            }
            SpanParent::Current | SpanParent::Root => TraceContext::root(),
        };

        let active = TracingSpan {
            name,
            span,
            fallback,
            attributes: Vec::new(),
            status: SpanStatus::Unset,
        };
        active
            .span
            .record("trace_id", display(active.context().trace_id()));
        Box::new(active)
    }
}

struct TracingSpan {
    name: &'static str,
    span: tracing::Span,
    /// Used when no OpenTelemetry layer gives the span a context of its own.
    fallback: TraceContext,
    attributes: Vec<(&'static str, String)>,
    status: SpanStatus,
}

impl ActiveSpan for TracingSpan {
    fn context(&self) -> TraceContext {
        #[cfg(feature = "otel")]
        {
            use tracing_opentelemetry::OpenTelemetrySpanExt;
            use opentelemetry::trace::TraceContextExt;

            let cx = self.span.context();
            if let Some(ctx) = TraceContext::from_span_context(cx.span().span_context()) {
                return ctx;
            }
        }
        self.fallback.clone()
    }

    fn set_attribute(&mut self, key: &'static str, value: String) {
        #[cfg(feature = "otel")]
        {
            use tracing_opentelemetry::OpenTelemetrySpanExt;
            self.span.set_attribute(key, value.clone());
        }
        self.attributes.push((key, value));
    }

    fn set_status(&mut self, status: SpanStatus) {
        match &status {
            SpanStatus::Unset => {}
            SpanStatus::Ok => {
                self.span.record("otel.status_code", "ok");
            }
            SpanStatus::Error(message) => {
                self.span.record("otel.status_code", "error");
                self.span.record("otel.status_message", message.as_str());
            }
        }
        self.status = status;
    }

    fn tracing_span(&self) -> tracing::Span {
        self.span.clone()
    }

    fn end(self: Box<Self>) {
        tracing::debug!(
            parent: &self.span,
            span = self.name,
            status = ?self.status,
            attributes = ?self.attributes,
            "Span ended"
        );
    }
}
