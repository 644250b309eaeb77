//! Event envelope codec.
//!
//! An envelope is a `(kind, payload)` pair plus optional trace context. On the
//! wire the kind travels as the message `content_type`, the payload is the
//! JSON body, and the trace context rides in the header map. Dispatch never
//! needs to look inside the body to know what happened.

mod trace;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

pub use trace::{TraceContext, TRACEPARENT_HEADER, TRACESTATE_HEADER};

/// Kind of change an envelope announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    Liked,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Created,
        EventKind::Updated,
        EventKind::Deleted,
        EventKind::Liked,
    ];

    /// Wire tag carried in the message `content_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "product_created",
            EventKind::Updated => "product_updated",
            EventKind::Deleted => "product_deleted",
            EventKind::Liked => "product_liked",
        }
    }

    /// Short tag without the `product_` prefix.
    pub fn short_name(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
            EventKind::Liked => "liked",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    /// Accepts both the wire tag (`product_created`) and the short tag (`created`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.short_name() == s)
            .ok_or_else(|| DecodeError::UnknownKind(s.to_string()))
    }
}

/// Errors decoding an inbound message into an envelope.
///
/// All variants are recoverable: the consumer drops the message and moves on.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message has no event kind")]
    MissingKind,

    #[error("Unknown event kind: {0}")]
    UnknownKind(String),

    #[error("Malformed payload: {0}")]
    Body(#[from] serde_json::Error),
}

/// A message as it crosses the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMessage {
    /// Message attribute carrying the event kind.
    pub content_type: Option<String>,
    /// String headers. Trace context lives here.
    pub headers: BTreeMap<String, String>,
    /// Serialized payload.
    pub body: Vec<u8>,
}

/// Decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EventKind,
    pub payload: Value,
    pub trace_context: Option<TraceContext>,
}

impl Envelope {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            trace_context: None,
        }
    }

    pub fn with_trace_context(mut self, trace_context: Option<TraceContext>) -> Self {
        self.trace_context = trace_context;
        self
    }

    /// Encode this envelope into a transport message.
    pub fn encode(&self) -> Result<TransportMessage, serde_json::Error> {
        encode(self.kind, &self.payload, self.trace_context.as_ref())
    }
}

/// Encode a kind and payload, plus optional trace context, into a transport message.
pub fn encode(
    kind: EventKind,
    payload: &Value,
    trace_context: Option<&TraceContext>,
) -> Result<TransportMessage, serde_json::Error> {
    let body = serde_json::to_vec(payload)?;

    let mut headers = BTreeMap::new();
    if let Some(ctx) = trace_context {
        ctx.inject(&mut headers);
    }

    Ok(TransportMessage {
        content_type: Some(kind.as_str().to_string()),
        headers,
        body,
    })
}

/// Decode a transport message into an envelope.
///
/// Trace headers that are missing or malformed decode to `trace_context: None`;
/// they never fail the decode.
pub fn decode(message: &TransportMessage) -> Result<Envelope, DecodeError> {
    let kind = message
        .content_type
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::MissingKind)?
        .parse::<EventKind>()?;

    let payload: Value = serde_json::from_slice(&message.body)?;

    Ok(Envelope {
        kind,
        payload,
        trace_context: TraceContext::extract(&message.headers),
    })
}
