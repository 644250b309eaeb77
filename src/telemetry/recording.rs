use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{ActiveSpan, ObservabilitySink, SpanParent, SpanStatus};
use crate::envelope::TraceContext;

/// A span as the recording sink saw it when it finished.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSpan {
    pub name: &'static str,
    pub context: TraceContext,
    /// `None` for spans that started a fresh trace.
    pub parent: Option<TraceContext>,
    pub status: SpanStatus,
    pub attributes: BTreeMap<&'static str, String>,
}

impl RecordedSpan {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// True when this span is a direct child of `parent`.
    pub fn is_child_of(&self, parent: &TraceContext) -> bool {
        self.parent
            .as_ref()
            .is_some_and(|p| p.trace_id() == parent.trace_id() && p.span_id() == parent.span_id())
    }
}

/// In-memory sink for tests.
///
/// Spans are recorded when they end (or are dropped). `SpanParent::Current`
/// resolves to the ambient context set with `with_ambient`, or a fresh trace.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    spans: Arc<Mutex<Vec<RecordedSpan>>>,
    ambient: Option<TraceContext>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `ctx` as the current span for `SpanParent::Current`.
    pub fn with_ambient(mut self, ctx: TraceContext) -> Self {
        self.ambient = Some(ctx);
        self
    }

    /// Finished spans, in the order they ended.
    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn spans_named(&self, name: &str) -> Vec<RecordedSpan> {
        self.spans()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }

    pub fn clear(&self) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ObservabilitySink for RecordingSink {
    fn start_span(&self, name: &'static str, parent: SpanParent) -> Box<dyn ActiveSpan> {
        let parent = match parent {
            SpanParent::Current => self.ambient.clone(),
            SpanParent::Remote(ctx) => Some(ctx),
            SpanParent::Root => None,
        };

        Box::new(RecordingSpan {
            sink: Arc::clone(&self.spans),
            record: Some(RecordedSpan {
                name,
                context: parent
                    .as_ref()
                    .map_or_else(TraceContext::root, TraceContext::child),
                parent,
                status: SpanStatus::Unset,
                attributes: BTreeMap::new(),
            }),
        })
    }
}

struct RecordingSpan {
    sink: Arc<Mutex<Vec<RecordedSpan>>>,
    record: Option<RecordedSpan>,
}

impl ActiveSpan for RecordingSpan {
    fn context(&self) -> TraceContext {
        self.record
            .as_ref()
            .map(|r| r.context.clone())
            .unwrap_or_else(TraceContext::root)
    }

    fn set_attribute(&mut self, key: &'static str, value: String) {
        if let Some(record) = self.record.as_mut() {
            record.attributes.insert(key, value);
        }
    }

    fn set_status(&mut self, status: SpanStatus) {
        if let Some(record) = self.record.as_mut() {
            record.status = status;
        }
    }

    fn tracing_span(&self) -> tracing::Span {
        tracing::Span::none()
    }

    fn end(self: Box<Self>) {}
}

impl Drop for RecordingSpan {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            self.sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record);
        }
    }
}
