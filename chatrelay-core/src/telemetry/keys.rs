/// Span/log field keys for chat streams.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_CONVERSATION_ID: &str = "chat.conversation_id";
pub const KEY_MESSAGE_ID: &str = "chat.message_id";

pub const KEY_FRAMES: &str = "stream.frames";
pub const KEY_OUTCOME: &str = "stream.outcome";

/// Error-related (if applicable)
pub const KEY_ERROR_MESSAGE: &str = "error.message";
