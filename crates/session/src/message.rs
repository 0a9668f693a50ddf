use guru_llm::{ProviderMessage, Role};
use guru_pdf::Extraction;

use super::ids::ConversationId;

/// Title every conversation carries until its first user message.
pub const UNTITLED: &str = "untitled";
pub const TITLE_MAX_CHARS: usize = 42;
const TITLE_ELLIPSIS: char = '…';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn to_provider(&self) -> ProviderMessage {
        ProviderMessage::new(self.role, self.content.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    id: ConversationId,
    title: String,
    titled: bool,
    messages: Vec<Message>,
}

impl Conversation {
    pub(crate) fn new(id: ConversationId) -> Self {
        Self {
            id,
            title: UNTITLED.to_string(),
            titled: false,
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Whether the one-time title assignment has happened.
    pub fn is_titled(&self) -> bool {
        self.titled
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn push(&mut self, message: Message) {
        if message.role == Role::User && !self.titled {
            self.title = title_from_message(&message.content);
            self.titled = true;
        }
        self.messages.push(message);
    }
}

/// First [`TITLE_MAX_CHARS`] characters of `text`, with an ellipsis when cut.
pub fn title_from_message(text: &str) -> String {
    match text.char_indices().nth(TITLE_MAX_CHARS) {
        Some((cut, _)) => {
            let mut title = text[..cut].to_string();
            title.push(TITLE_ELLIPSIS);
            title
        }
        None => text.to_string(),
    }
}

/// Document text grounding the active conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentBinding {
    pub name: String,
    pub text: String,
    pub extraction_failed: bool,
}

impl DocumentBinding {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            extraction_failed: false,
        }
    }

    /// Failed extractions bind their marker text and are flagged.
    pub fn from_extraction(name: impl Into<String>, extraction: Extraction) -> Self {
        let extraction_failed = extraction.is_failed();
        Self {
            name: name.into(),
            text: extraction.into_context_text(),
            extraction_failed,
        }
    }
}
