use guru_llm::ProviderMessage;
use serde::{Deserialize, Serialize};

use super::message::{Conversation, DocumentBinding};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Guru, a wise, clear and helpful AI assistant. \
Always answer in a well-organized way, in the language the user writes in.";
pub const DEFAULT_DOCUMENT_CHAR_LIMIT: usize = 12_000;
pub const DEFAULT_TRUNCATION_NOTICE: &str = "\n\n[... document truncated to fit the context ...]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub system_prompt: String,
    /// Maximum document characters (Unicode scalar values) sent to the model.
    pub document_char_limit: usize,
    pub truncation_notice: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            document_char_limit: DEFAULT_DOCUMENT_CHAR_LIMIT,
            truncation_notice: DEFAULT_TRUNCATION_NOTICE.to_string(),
        }
    }
}

/// Assembles the outbound message list for one send.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// System message, then the conversation's history, then the new user turn.
    pub fn build(
        &self,
        conversation: &Conversation,
        new_user_text: &str,
        document: Option<&DocumentBinding>,
    ) -> Vec<ProviderMessage> {
        let mut messages = Vec::with_capacity(conversation.messages().len() + 2);
        messages.push(ProviderMessage::system(self.system_message(document)));
        messages.extend(conversation.messages().iter().map(|message| message.to_provider()));
        messages.push(ProviderMessage::user(new_user_text));
        messages
    }

    pub fn system_message(&self, document: Option<&DocumentBinding>) -> String {
        let mut system = self.config.system_prompt.clone();

        let Some(document) = document.filter(|document| !document.text.is_empty()) else {
            return system;
        };

        system.push_str("\n\nThe user attached the following document (");
        system.push_str(&document.name);
        system.push_str(") for context:\n\n");

        match document
            .text
            .char_indices()
            .nth(self.config.document_char_limit)
        {
            Some((cut, _)) => {
                system.push_str(&document.text[..cut]);
                system.push_str(&self.config.truncation_notice);
            }
            None => system.push_str(&document.text),
        }

        system
    }
}
