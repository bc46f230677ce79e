//! Streaming primitives exposed by chatrelay.
//!
//! Contract:
//! - The transport yields `RawFrame`s in arrival order; each carries the SSE
//!   `data:` payload verbatim (possibly empty for keep-alives).
//! - Non-empty payloads decode into exactly one `Event`; the discriminator is the
//!   payload's own `event` field, not the SSE `event:` line.
//! - A stream is finite: it ends on remote closure, on a transport error item, or
//!   when the consumer stops polling.

use serde::{Deserialize, Deserializer};

use crate::error::CoreResult;
use crate::model::RetrieverResource;

/// One frame as split off the wire by the SSE framer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawFrame {
    /// This frame's own `id:` line, if it had one.
    pub id: Option<String>,
    /// Last non-empty `id:` seen on the stream up to and including this frame.
    pub last_event_id: Option<String>,
    /// SSE `event:` name, if the frame was named.
    pub event: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
}

impl RawFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// Keep-alive frames carry no payload and are never folded.
    pub fn is_heartbeat(&self) -> bool {
        self.data.is_empty()
    }
}

/// Boxed stream of raw frames. `Err` items are transport failures and end the stream.
pub type FrameStream = futures::stream::BoxStream<'static, CoreResult<RawFrame>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    AgentThought,
    AgentMessage,
    Message,
    Error,
    MessageEnd,
    RewriteMessageId,
    WorkflowFinished,
    Other(String),
}

impl EventKind {
    pub fn from_wire(name: &str) -> Self {
        match name {
            "agent_thought" => Self::AgentThought,
            "agent_message" => Self::AgentMessage,
            "message" => Self::Message,
            "error" => Self::Error,
            "message_end" => Self::MessageEnd,
            "rewrite_message_id" | "miso_rewrite_message_id" => Self::RewriteMessageId,
            "workflow_finished" => Self::WorkflowFinished,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::AgentThought => "agent_thought",
            Self::AgentMessage => "agent_message",
            Self::Message => "message",
            Self::Error => "error",
            Self::MessageEnd => "message_end",
            Self::RewriteMessageId => "rewrite_message_id",
            Self::WorkflowFinished => "workflow_finished",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Kinds whose fragment is appended to the answer.
    pub fn carries_answer(&self) -> bool {
        matches!(self, Self::AgentMessage | Self::Message)
    }
}

/// Application-level error fragment reported inside the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFragment {
    pub code: String,
    pub status: i64,
    pub message: String,
}

impl std::fmt::Display for ErrorFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}, {}", self.code, self.status, self.message)
    }
}

/// A decoded stream event. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub answer_fragment: String,
    pub thought_fragment: String,
    /// Present only on `error` events.
    pub error: Option<ErrorFragment>,
    /// Present only on `message_end` events.
    pub retrieved_references: Vec<RetrieverResource>,
    pub raw_payload: String,
}

// ---- Wire shape ----
// Explicit `null` decodes as the zero value, same as an absent field.
#[derive(Deserialize)]
struct WireEvent {
    event: String,
    #[serde(default, deserialize_with = "null_as_default")]
    message_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    conversation_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    answer: String,
    #[serde(default, deserialize_with = "null_as_default")]
    code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    status: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    metadata: WireMetadata,
}

#[derive(Deserialize, Default)]
struct WireMetadata {
    #[serde(default, deserialize_with = "null_as_default")]
    retriever_resources: Vec<RetrieverResource>,
}

fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

impl Event {
    /// Decode one JSON payload. The payload must be an object with an `event` field.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        let wire: WireEvent = serde_json::from_str(payload)?;
        let kind = EventKind::from_wire(&wire.event);

        // agent_thought carries its text in the `answer` slot
        let (answer_fragment, thought_fragment) = match kind {
            EventKind::AgentThought => (String::new(), wire.answer),
            _ => (wire.answer, String::new()),
        };
        let error = match kind {
            EventKind::Error => Some(ErrorFragment {
                code: wire.code,
                status: wire.status,
                message: wire.message,
            }),
            _ => None,
        };
        let retrieved_references = match kind {
            EventKind::MessageEnd => wire.metadata.retriever_resources,
            _ => Vec::new(),
        };

        Ok(Self {
            kind,
            conversation_id: non_empty(wire.conversation_id),
            message_id: non_empty(wire.message_id),
            answer_fragment,
            thought_fragment,
            error,
            retrieved_references,
            raw_payload: payload.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thought_text_comes_from_answer_slot() {
        let ev = Event::parse(r#"{"event":"agent_thought","answer":"thinking","message_id":"m1"}"#)
            .unwrap();
        assert_eq!(ev.kind, EventKind::AgentThought);
        assert_eq!(ev.thought_fragment, "thinking");
        assert_eq!(ev.answer_fragment, "");
        assert_eq!(ev.message_id.as_deref(), Some("m1"));
        assert_eq!(ev.conversation_id, None);
    }

    #[test]
    fn error_fragment_formats_code_status_message() {
        let ev = Event::parse(r#"{"event":"error","code":"500","status":500,"message":"boom"}"#)
            .unwrap();
        assert_eq!(ev.error.as_ref().unwrap().to_string(), "500 500, boom");
    }

    #[test]
    fn message_end_carries_references() {
        let ev = Event::parse(
            r#"{"event":"message_end","metadata":{"retriever_resources":[{"document_id":"d1","score":0.5}]}}"#,
        )
        .unwrap();
        assert_eq!(ev.kind, EventKind::MessageEnd);
        assert_eq!(ev.retrieved_references.len(), 1);
        assert_eq!(ev.retrieved_references[0].document_id, "d1");
    }

    #[test]
    fn rewrite_kind_accepts_both_wire_names() {
        assert_eq!(EventKind::from_wire("rewrite_message_id"), EventKind::RewriteMessageId);
        assert_eq!(
            EventKind::from_wire("miso_rewrite_message_id"),
            EventKind::RewriteMessageId
        );
        assert_eq!(EventKind::from_wire("ping"), EventKind::Other("ping".into()));
    }

    #[test]
    fn null_fields_decode_as_absent() {
        let ev = Event::parse(
            r#"{"event":"message","answer":"x","conversation_id":null,"message_id":null,"metadata":null}"#,
        )
        .unwrap();
        assert_eq!(ev.answer_fragment, "x");
        assert_eq!(ev.conversation_id, None);
        assert_eq!(ev.message_id, None);

        let ev = Event::parse(
            r#"{"event":"message_end","conversation_id":"c1","metadata":{"retriever_resources":null}}"#,
        )
        .unwrap();
        assert!(ev.retrieved_references.is_empty());
        assert_eq!(ev.conversation_id.as_deref(), Some("c1"));

        let ev = Event::parse(r#"{"event":"error","code":null,"status":null,"message":"boom"}"#)
            .unwrap();
        assert_eq!(ev.error.unwrap().to_string(), " 0, boom");
    }

    #[test]
    fn payload_without_event_field_is_rejected() {
        assert!(Event::parse(r#"{"answer":"x"}"#).is_err());
        assert!(Event::parse("not json").is_err());
    }

    #[test]
    fn heartbeat_is_empty_payload() {
        assert!(RawFrame::default().is_heartbeat());
        assert!(!RawFrame::data("{}").is_heartbeat());
    }
}
