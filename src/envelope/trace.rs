//! W3C trace context carried in message headers.
//!
//! Injection and extraction go through OpenTelemetry's `TraceContextPropagator`
//! over the string header map. `TraceContext` is a view over the propagated
//! `SpanContext`.

use std::collections::BTreeMap;

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};

/// Header holding `version-traceid-parentid-flags`.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Header holding vendor trace state.
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Propagated trace metadata: the trace id and the id of the span that sent
/// the message. Always valid; always marked remote.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext(SpanContext);

impl TraceContext {
    /// Wrap a span context. `None` when its ids are invalid.
    pub fn from_span_context(span_context: &SpanContext) -> Option<Self> {
        if !span_context.is_valid() {
            return None;
        }
        Some(Self(SpanContext::new(
            span_context.trace_id(),
            span_context.span_id(),
            span_context.trace_flags(),
            true,
            span_context.trace_state().clone(),
        )))
    }

    /// Start of a fresh, sampled trace.
    pub fn root() -> Self {
        let ids = RandomIdGenerator::default();
        Self(SpanContext::new(
            ids.new_trace_id(),
            ids.new_span_id(),
            TraceFlags::SAMPLED,
            true,
            Default::default(),
        ))
    }

    /// A new span in the same trace, inheriting flags and trace state.
    pub fn child(&self) -> Self {
        Self(SpanContext::new(
            self.0.trace_id(),
            RandomIdGenerator::default().new_span_id(),
            self.0.trace_flags(),
            true,
            self.0.trace_state().clone(),
        ))
    }

    pub fn span_context(&self) -> &SpanContext {
        &self.0
    }

    pub fn trace_id(&self) -> TraceId {
        self.0.trace_id()
    }

    pub fn span_id(&self) -> SpanId {
        self.0.span_id()
    }

    pub fn is_sampled(&self) -> bool {
        self.0.is_sampled()
    }

    /// OpenTelemetry context whose active span is this remote parent.
    pub fn to_context(&self) -> Context {
        Context::new().with_remote_span_context(self.0.clone())
    }

    /// Write this context into a header map.
    pub fn inject(&self, headers: &mut BTreeMap<String, String>) {
        TraceContextPropagator::new()
            .inject_context(&self.to_context(), &mut HeaderInjector(headers));
    }

    /// Read a context from a header map. Header names match case-insensitively;
    /// missing or malformed headers yield `None`.
    pub fn extract(headers: &BTreeMap<String, String>) -> Option<Self> {
        let cx = TraceContextPropagator::new().extract(&HeaderExtractor(headers));
        Self::from_span_context(cx.span().span_context())
    }

    /// Parse a bare `traceparent` value.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let headers = BTreeMap::from([(TRACEPARENT_HEADER.to_string(), value.to_string())]);
        Self::extract(&headers)
    }

    /// This context as a `traceparent` value.
    pub fn to_traceparent(&self) -> String {
        let mut headers = BTreeMap::new();
        self.inject(&mut headers);
        headers.remove(TRACEPARENT_HEADER).unwrap_or_default()
    }
}

struct HeaderInjector<'a>(&'a mut BTreeMap<String, String>);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        // The propagator writes an empty tracestate; leave it off the wire.
        if !value.is_empty() {
            self.0.insert(key.to_string(), value);
        }
    }
}

struct HeaderExtractor<'a>(&'a BTreeMap<String, String>);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_parse_traceparent() {
        let ctx = TraceContext::from_traceparent(SAMPLE).unwrap();
        assert_eq!(ctx.trace_id().to_string(), "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.span_id().to_string(), "b7ad6b7169203331");
        assert!(ctx.is_sampled());
        assert_eq!(ctx.to_traceparent(), SAMPLE);
    }

    #[test]
    fn test_rejects_malformed_traceparent() {
        for bad in [
            "",
            "garbage",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra",
            "ff-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            "00-zzf7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        ] {
            assert!(TraceContext::from_traceparent(bad).is_none(), "{bad}");
        }
    }

    #[test]
    fn test_inject_and_extract_headers() {
        let mut headers = BTreeMap::new();
        headers.insert(TRACEPARENT_HEADER.to_string(), SAMPLE.to_string());
        headers.insert(TRACESTATE_HEADER.to_string(), "vendor=abc".to_string());
        let ctx = TraceContext::extract(&headers).unwrap();

        let mut injected = BTreeMap::new();
        ctx.inject(&mut injected);

        assert_eq!(injected, headers);
        assert_eq!(TraceContext::extract(&injected), Some(ctx));
    }

    #[test]
    fn test_empty_trace_state_is_not_injected() {
        let mut headers = BTreeMap::new();
        TraceContext::root().inject(&mut headers);

        assert!(headers.contains_key(TRACEPARENT_HEADER));
        assert!(!headers.contains_key(TRACESTATE_HEADER));
    }

    #[test]
    fn test_extract_is_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("TraceParent".to_string(), SAMPLE.to_string());
        assert!(TraceContext::extract(&headers).is_some());
    }

    #[test]
    fn test_extract_without_headers() {
        assert!(TraceContext::extract(&BTreeMap::new()).is_none());
    }

    #[test]
    fn test_child_keeps_trace() {
        let parent = TraceContext::from_traceparent(SAMPLE).unwrap();
        let child = parent.child();

        assert_eq!(child.trace_id(), parent.trace_id());
        assert_ne!(child.span_id(), parent.span_id());
        assert!(child.is_sampled());
    }

    #[test]
    fn test_roots_start_distinct_traces() {
        let a = TraceContext::root();
        let b = TraceContext::root();

        assert!(a.span_context().is_valid());
        assert!(a.is_sampled());
        assert_ne!(a.trace_id(), b.trace_id());
    }
}
