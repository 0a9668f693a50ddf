use guru_llm::Role;
use snafu::OptionExt;

use super::error::{ConversationNotFoundSnafu, SessionResult};
use super::ids::ConversationId;
use super::message::{Conversation, DocumentBinding, Message};

/// In-memory conversations of one session, in creation order.
///
/// The store always holds at least one conversation and exactly one of them
/// is active. The document binding belongs to the active conversation's visit
/// and is dropped whenever the active pointer moves.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: usize,
    document: Option<DocumentBinding>,
}

impl ConversationStore {
    pub fn new() -> Self {
        let mut store = Self {
            conversations: Vec::new(),
            active: 0,
            document: None,
        };
        store.create_conversation();
        store
    }

    pub fn create_conversation(&mut self) -> ConversationId {
        let id = ConversationId::generate();
        self.conversations.push(Conversation::new(id));
        self.active = self.conversations.len() - 1;
        self.document = None;
        tracing::debug!(conversation_id = %id, "conversation created");
        id
    }

    pub fn set_active(&mut self, id: ConversationId) -> SessionResult<()> {
        let index = self.position(id).context(ConversationNotFoundSnafu {
            stage: "set-active",
            id,
        })?;
        self.active = index;
        self.document = None;
        Ok(())
    }

    /// Removes a conversation; returns the id that is active afterwards.
    pub fn delete(&mut self, id: ConversationId) -> SessionResult<ConversationId> {
        let index = self.position(id).context(ConversationNotFoundSnafu {
            stage: "delete-conversation",
            id,
        })?;
        self.conversations.remove(index);

        if self.conversations.is_empty() {
            return Ok(self.create_conversation());
        }

        if index == self.active {
            self.active = self.conversations.len() - 1;
            self.document = None;
        } else if index < self.active {
            self.active -= 1;
        }

        Ok(self.active_id())
    }

    pub fn append_message(&mut self, role: Role, content: impl Into<String>) {
        let active = self.active;
        self.conversations[active].push(Message::new(role, content));
    }

    pub fn active(&self) -> &Conversation {
        &self.conversations[self.active]
    }

    pub fn active_id(&self) -> ConversationId {
        self.active().id()
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id() == id)
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn bind_document(&mut self, binding: DocumentBinding) -> &DocumentBinding {
        self.document.insert(binding)
    }

    pub fn clear_document(&mut self) -> Option<DocumentBinding> {
        self.document.take()
    }

    pub fn document(&self) -> Option<&DocumentBinding> {
        self.document.as_ref()
    }

    fn position(&self, id: ConversationId) -> Option<usize> {
        self.conversations
            .iter()
            .position(|conversation| conversation.id() == id)
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;

    fn bound(store: &mut ConversationStore) {
        store.bind_document(DocumentBinding::new("paper.pdf", "abstract"));
    }

    fn assert_single_active(store: &ConversationStore) {
        assert!(store.len() >= 1);
        let active_id = store.active_id();
        let matching = store
            .conversations()
            .iter()
            .filter(|conversation| conversation.id() == active_id)
            .count();
        assert_eq!(matching, 1);
    }

    #[test]
    fn new_store_has_one_active_untitled_conversation() {
        let store = ConversationStore::new();
        assert_eq!(store.len(), 1);
        assert_eq!(store.active().title(), crate::message::UNTITLED);
        assert!(store.active().messages().is_empty());
    }

    #[test]
    fn deleting_the_only_conversation_creates_a_fresh_one() {
        let mut store = ConversationStore::new();
        let first = store.active_id();
        store.append_message(Role::User, "hello");

        let active = store.delete(first).unwrap();

        assert_eq!(store.len(), 1);
        assert_ne!(active, first);
        assert_eq!(store.active_id(), active);
        assert!(store.active().messages().is_empty());
        assert!(store.get(first).is_none());
    }

    #[test]
    fn deleting_active_selects_most_recently_created_remaining() {
        let mut store = ConversationStore::new();
        let first = store.active_id();
        let second = store.create_conversation();
        let third = store.create_conversation();
        store.set_active(second).unwrap();
        bound(&mut store);

        assert_eq!(store.delete(second).unwrap(), third);
        assert!(store.document().is_none());

        assert_eq!(store.delete(third).unwrap(), first);
        assert_single_active(&store);
    }

    #[test]
    fn deleting_inactive_keeps_active_and_binding() {
        let mut store = ConversationStore::new();
        let first = store.active_id();
        let second = store.create_conversation();
        bound(&mut store);

        assert_eq!(store.delete(first).unwrap(), second);
        assert_eq!(store.active_id(), second);
        assert_eq!(store.document().map(|doc| doc.name.as_str()), Some("paper.pdf"));
    }

    #[test]
    fn create_and_delete_sequences_keep_exactly_one_active() {
        let mut store = ConversationStore::new();
        for round in 0..12 {
            if round % 3 == 2 {
                let victim = store.conversations()[round % store.len()].id();
                store.delete(victim).unwrap();
            } else {
                store.create_conversation();
            }
            assert_single_active(&store);
        }
        let ids = store
            .conversations()
            .iter()
            .map(|conversation| conversation.id())
            .collect::<Vec<_>>();
        for id in ids {
            store.delete(id).unwrap();
            assert_single_active(&store);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn switching_always_clears_the_binding() {
        let mut store = ConversationStore::new();
        let first = store.active_id();
        let second = store.create_conversation();

        bound(&mut store);
        store.set_active(first).unwrap();
        assert!(store.document().is_none());

        bound(&mut store);
        store.set_active(first).unwrap();
        assert!(store.document().is_none());

        store.set_active(second).unwrap();
        assert!(store.document().is_none());
    }

    #[test]
    fn creating_a_conversation_clears_the_binding() {
        let mut store = ConversationStore::new();
        bound(&mut store);
        store.create_conversation();
        assert!(store.document().is_none());
    }

    #[test]
    fn unknown_ids_are_rejected_without_mutation() {
        let mut store = ConversationStore::new();
        bound(&mut store);
        let stranger = ConversationId::generate();

        assert!(matches!(
            store.set_active(stranger),
            Err(SessionError::ConversationNotFound { id, .. }) if id == stranger
        ));
        assert!(matches!(
            store.delete(stranger),
            Err(SessionError::ConversationNotFound { .. })
        ));
        assert!(store.document().is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn messages_go_to_the_active_conversation() {
        let mut store = ConversationStore::new();
        let first = store.active_id();
        store.create_conversation();
        store.append_message(Role::User, "for the second");
        store.set_active(first).unwrap();
        store.append_message(Role::User, "for the first");

        assert_eq!(store.active().messages().len(), 1);
        assert_eq!(store.active().title(), "for the first");
        assert_eq!(store.conversations()[1].title(), "for the second");
    }
}
