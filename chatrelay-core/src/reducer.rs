//! Pure fold of stream events into one aggregate result.

use serde::Serialize;

use crate::model::RetrieverResource;
use crate::stream::{Event, EventKind};

/// Running and final state of one chat stream.
///
/// `answer`, `thought`, `error_message` and `retrieved_references` only ever grow.
/// Ids are last-non-empty-wins and never cleared once set.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregateResult {
    pub message_id: String,
    pub conversation_id: String,
    pub answer: String,
    pub thought: String,
    #[serde(skip)]
    pub error_message: String,
    #[serde(skip)]
    pub retrieved_references: Vec<RetrieverResource>,
}

impl AggregateResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a single event in place.
    pub fn apply(&mut self, event: &Event) {
        if let Some(cid) = event.conversation_id.as_deref().filter(|s| !s.is_empty()) {
            self.conversation_id = cid.to_string();
        }
        if let Some(mid) = event.message_id.as_deref().filter(|s| !s.is_empty()) {
            self.message_id = mid.to_string();
        }

        match &event.kind {
            EventKind::AgentThought => self.thought.push_str(&event.thought_fragment),
            // Empty fragments are appended too: the backend keeps streaming after them.
            EventKind::AgentMessage | EventKind::Message => {
                self.answer.push_str(&event.answer_fragment)
            }
            EventKind::Error => {
                if let Some(err) = &event.error {
                    self.error_message.push_str(&err.to_string());
                }
            }
            EventKind::MessageEnd => self
                .retrieved_references
                .extend(event.retrieved_references.iter().cloned()),
            // The id update above already applied a non-empty rewrite.
            EventKind::RewriteMessageId => {}
            EventKind::WorkflowFinished | EventKind::Other(_) => {
                tracing::debug!(kind = event.kind.as_str(), "ignoring event for aggregation");
            }
        }
    }

    pub fn has_error(&self) -> bool {
        !self.error_message.is_empty()
    }
}

/// `fold(state, event) -> state'`; deterministic, no I/O.
pub fn fold(mut state: AggregateResult, event: &Event) -> AggregateResult {
    state.apply(event);
    state
}
