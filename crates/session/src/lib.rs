//! Conversation state, context assembly and streamed replies for one anonymous session.

#![deny(unsafe_code)]

mod accumulator;
mod context;
mod controller;
mod error;
mod ids;
mod message;
mod store;

pub use accumulator::{
    CURSOR, ERROR_FRAGMENT_PREFIX, FENCE, FenceMode, Presented, StreamAccumulator, error_fragment,
};
pub use context::{
    ContextBuilder, ContextConfig, DEFAULT_DOCUMENT_CHAR_LIMIT, DEFAULT_SYSTEM_PROMPT,
    DEFAULT_TRUNCATION_NOTICE,
};
pub use controller::{
    ControllerConfig, ReplyOutcome, ReplyStatus, Session, SessionController, StreamUpdate,
};
pub use error::{SessionError, SessionResult};
pub use ids::{AnonymousId, ConversationId};
pub use message::{
    Conversation, DocumentBinding, Message, TITLE_MAX_CHARS, UNTITLED, title_from_message,
};
pub use store::ConversationStore;
