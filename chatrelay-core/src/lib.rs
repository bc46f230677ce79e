//! Client-side engine for streamed chat replies: reduces an SSE event stream into
//! one aggregate answer and can relay the raw stream to a downstream consumer.

pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod model;
pub mod reducer;
pub mod relay;
pub mod sink;
pub mod stream;
pub mod telemetry;

pub use client::ChatClient;
pub use error::{CoreResult, RelayError, StreamFailure};
pub use reducer::{fold, AggregateResult};
pub use relay::{RelayController, RelayHooks, StreamOutcome};
