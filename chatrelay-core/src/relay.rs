//! Relay controller: drives the reducer against a live frame stream, optionally
//! forwarding every raw frame downstream, and turns the way the stream ended into
//! a single `StreamOutcome`.
//!
//! Per invocation: `Idle -> Streaming -> {Completed | BackendReported |
//! TransportFailure | MalformedEvent | RelayFailure | Cancelled}`. No retries.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{RelayError, StreamFailure};
use crate::reducer::AggregateResult;
use crate::sink::FrameSink;
use crate::stream::{Event, FrameStream, RawFrame};
use crate::telemetry::{
    KEY_CONVERSATION_ID, KEY_ERROR_MESSAGE, KEY_FRAMES, KEY_MESSAGE_ID, KEY_OUTCOME,
};

/// Final disposition of one streaming call. Created once, never mutated.
#[derive(Debug)]
pub enum StreamOutcome {
    Completed(AggregateResult),
    /// The stream closed cleanly but carried application-level error fragments.
    BackendReported(String),
    TransportFailure(RelayError),
    MalformedEvent { payload: String, reason: String },
    RelayFailure(RelayError),
    /// No partial result is ever returned for a cancelled stream.
    Cancelled,
}

impl StreamOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::BackendReported(_) => "backend_reported",
            Self::TransportFailure(_) => "transport_failure",
            Self::MalformedEvent { .. } => "malformed_event",
            Self::RelayFailure(_) => "relay_failure",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn into_result(self) -> Result<AggregateResult, StreamFailure> {
        match self {
            Self::Completed(res) => Ok(res),
            Self::BackendReported(msg) => Err(StreamFailure::BackendReported(msg)),
            Self::TransportFailure(e) => Err(StreamFailure::Transport(e)),
            Self::MalformedEvent { payload, reason } => {
                Err(StreamFailure::MalformedEvent { payload, reason })
            }
            Self::RelayFailure(e) => Err(StreamFailure::Relay(e)),
            Self::Cancelled => Err(StreamFailure::Cancelled),
        }
    }
}

/// Optional callbacks for one run. `Default` leaves every hook unset (no-op).
#[derive(Default)]
pub struct RelayHooks<'a> {
    /// Called with the cumulative answer after every answer-bearing event.
    pub on_answer_changed: Option<Box<dyn FnMut(&str) + Send + 'a>>,
    /// Receives each raw frame before it is parsed (proxy mode).
    pub on_raw_frame: Option<&'a mut dyn FrameSink>,
}

impl<'a> RelayHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_answer_changed(mut self, f: impl FnMut(&str) + Send + 'a) -> Self {
        self.on_answer_changed = Some(Box::new(f));
        self
    }

    pub fn forward_to(mut self, sink: &'a mut dyn FrameSink) -> Self {
        self.on_raw_frame = Some(sink);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelayController {
    cancel: CancellationToken,
}

impl RelayController {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Consume `frames` to the end and reduce them into one outcome.
    pub async fn run(&self, frames: FrameStream, hooks: RelayHooks<'_>) -> StreamOutcome {
        let span = tracing::info_span!(
            "chat.stream",
            chat.conversation_id = tracing::field::Empty,
            chat.message_id = tracing::field::Empty,
            stream.frames = tracing::field::Empty,
            stream.outcome = tracing::field::Empty,
            error.message = tracing::field::Empty,
        );
        let outcome = self.drive(frames, hooks, &span).instrument(span.clone()).await;

        span.record(KEY_OUTCOME, outcome.kind());
        match &outcome {
            StreamOutcome::Completed(res) => {
                tracing::debug!(parent: &span, result = ?res, "stream completed");
            }
            StreamOutcome::Cancelled => {
                tracing::info!(parent: &span, "stream cancelled");
            }
            StreamOutcome::BackendReported(msg) => {
                span.record(KEY_ERROR_MESSAGE, msg.as_str());
                tracing::info!(parent: &span, error = %msg, "backend reported error");
            }
            StreamOutcome::TransportFailure(e) | StreamOutcome::RelayFailure(e) => {
                span.record(KEY_ERROR_MESSAGE, tracing::field::display(e));
                tracing::info!(parent: &span, kind = outcome.kind(), error = %e, "stream failed");
            }
            StreamOutcome::MalformedEvent { reason, .. } => {
                span.record(KEY_ERROR_MESSAGE, reason.as_str());
                tracing::info!(parent: &span, error = %reason, "malformed stream event");
            }
        }
        outcome
    }

    async fn drive(
        &self,
        mut frames: FrameStream,
        mut hooks: RelayHooks<'_>,
        span: &tracing::Span,
    ) -> StreamOutcome {
        let mut state = AggregateResult::new();
        let mut seen: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return StreamOutcome::Cancelled;
            }
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                next = frames.next() => next,
            };
            let frame = match next {
                None => break,
                Some(Err(e)) => return StreamOutcome::TransportFailure(e),
                Some(Ok(frame)) => frame,
            };
            seen += 1;
            span.record(KEY_FRAMES, seen);

            if let Some(sink) = hooks.on_raw_frame.as_deref_mut()
                && let Err(e) = sink.send(&frame).await
            {
                return StreamOutcome::RelayFailure(e);
            }

            if frame.is_heartbeat() {
                continue;
            }

            let event = match Event::parse(&frame.data) {
                Ok(event) => event,
                Err(e) => {
                    return StreamOutcome::MalformedEvent {
                        payload: frame.data,
                        reason: e.to_string(),
                    };
                }
            };

            state.apply(&event);
            if event.conversation_id.is_some() {
                span.record(KEY_CONVERSATION_ID, state.conversation_id.as_str());
            }
            if event.message_id.is_some() {
                span.record(KEY_MESSAGE_ID, state.message_id.as_str());
            }

            if event.kind.carries_answer()
                && let Some(cb) = hooks.on_answer_changed.as_mut()
            {
                cb(&state.answer);
            }
        }

        if state.has_error() {
            StreamOutcome::BackendReported(state.error_message)
        } else {
            StreamOutcome::Completed(state)
        }
    }

    /// Send synthetic frames after the upstream stream has ended. Each send is
    /// best-effort; failures are logged. Returns how many frames were delivered.
    pub async fn append_frames<I>(sink: &mut dyn FrameSink, frames: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut delivered = 0;
        for data in frames {
            match sink.send(&RawFrame::data(data)).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(error = %e, "failed to append synthetic frame"),
            }
        }
        delivered
    }
}
