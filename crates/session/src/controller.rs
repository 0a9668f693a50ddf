use std::sync::Arc;

use guru_llm::{
    EventStream, LlmProvider, ModelCatalog, Role, StreamHandle, StreamPayload, StreamRequest,
    StreamTarget,
};
use guru_pdf::{DocumentExtractor, Extraction};
use snafu::{OptionExt, ensure};
use tokio_util::sync::CancellationToken;

use super::accumulator::{FenceMode, Presented, StreamAccumulator, error_fragment};
use super::context::{ContextBuilder, ContextConfig};
use super::error::{EmptyMessageSnafu, NoModelSelectedSnafu, SessionResult, UnknownModelSnafu};
use super::ids::{AnonymousId, ConversationId};
use super::message::DocumentBinding;
use super::store::ConversationStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerConfig {
    /// Preferred model when the current selection disappears from the catalog.
    pub default_model: Option<String>,
    pub temperature: Option<f64>,
    pub fence_mode: FenceMode,
    pub context: ContextConfig,
}

/// State of one anonymous user: an identifier and their conversations.
#[derive(Debug, Clone)]
pub struct Session {
    anonymous_id: AnonymousId,
    store: ConversationStore,
}

impl Session {
    pub fn new() -> Self {
        Self {
            anonymous_id: AnonymousId::generate(),
            store: ConversationStore::new(),
        }
    }

    pub fn anonymous_id(&self) -> AnonymousId {
        self.anonymous_id
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of a streamed reply as seen by the presentation layer.
#[derive(Debug, Clone, Copy)]
pub struct StreamUpdate<'a> {
    /// Text that just arrived; empty for the final update.
    pub fragment: &'a str,
    pub presented: Presented<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub conversation_id: ConversationId,
    pub status: ReplyStatus,
    /// Committed assistant text, or the discarded partial text when cancelled.
    pub content: String,
}

pub struct SessionController {
    session: Session,
    provider: Arc<dyn LlmProvider>,
    extractor: Arc<dyn DocumentExtractor>,
    catalog: ModelCatalog,
    selected_model: Option<String>,
    context: ContextBuilder,
    config: ControllerConfig,
    next_sequence: u64,
}

impl SessionController {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        extractor: Arc<dyn DocumentExtractor>,
        config: ControllerConfig,
    ) -> Self {
        let session = Session::new();
        tracing::info!(
            anonymous_id = %session.anonymous_id.short(),
            provider_id = %provider.id(),
            "session started"
        );

        Self {
            session,
            provider,
            extractor,
            catalog: ModelCatalog::default(),
            selected_model: None,
            context: ContextBuilder::new(config.context.clone()),
            config,
            next_sequence: 0,
        }
    }

    pub fn anonymous_id(&self) -> AnonymousId {
        self.session.anonymous_id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &ConversationStore {
        self.session.store()
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn selected_model(&self) -> Option<&str> {
        self.selected_model.as_deref()
    }

    /// Whether a message could be sent right now.
    pub fn can_send(&self) -> bool {
        self.selected_model.is_some()
    }

    pub fn new_conversation(&mut self) -> ConversationId {
        let id = self.session.store.create_conversation();
        tracing::info!(conversation_id = %id, "new conversation");
        id
    }

    pub fn switch_conversation(&mut self, id: ConversationId) -> SessionResult<()> {
        self.session.store.set_active(id)?;
        tracing::info!(conversation_id = %id, "switched conversation");
        Ok(())
    }

    /// Deletes a conversation and returns the id that is active afterwards.
    pub fn delete_conversation(&mut self, id: ConversationId) -> SessionResult<ConversationId> {
        let active = self.session.store.delete(id)?;
        tracing::info!(
            conversation_id = %id,
            active_conversation_id = %active,
            "deleted conversation"
        );
        Ok(active)
    }

    pub fn bind_document(&mut self, bytes: &[u8], name: impl Into<String>) -> &DocumentBinding {
        let name = name.into();
        let extraction = self.extractor.extract(bytes);
        match &extraction {
            Extraction::Text(text) => tracing::info!(
                document = %name,
                char_count = text.chars().count(),
                "document bound"
            ),
            Extraction::Failed { reason } => tracing::warn!(
                document = %name,
                reason = %reason,
                "document extraction failed; binding error marker"
            ),
        }
        self.session
            .store
            .bind_document(DocumentBinding::from_extraction(name, extraction))
    }

    pub fn unbind_document(&mut self) -> Option<DocumentBinding> {
        self.session.store.clear_document()
    }

    /// Re-queries the registry and reconciles the model selection with it.
    pub async fn refresh_models(&mut self) -> &ModelCatalog {
        self.catalog = ModelCatalog::load(self.provider.as_ref()).await;
        self.selected_model = self.reconcile_selection();
        tracing::info!(
            online = self.catalog.is_online(),
            model_count = self.catalog.models().len(),
            selected_model = ?self.selected_model,
            "model catalog refreshed"
        );
        &self.catalog
    }

    pub fn select_model(&mut self, model_id: &str) -> SessionResult<()> {
        ensure!(
            self.catalog.contains(model_id),
            UnknownModelSnafu {
                stage: "select-model",
                model_id,
            }
        );
        self.selected_model = Some(model_id.to_string());
        Ok(())
    }

    fn reconcile_selection(&self) -> Option<String> {
        let listed = |id: &&str| self.catalog.contains(id);
        self.selected_model
            .as_deref()
            .filter(listed)
            .or_else(|| self.config.default_model.as_deref().filter(listed))
            .or_else(|| self.catalog.first().map(|model| model.id.as_str()))
            .map(str::to_string)
    }

    fn next_target(&mut self, conversation_id: ConversationId) -> StreamTarget {
        self.next_sequence += 1;
        StreamTarget::new(conversation_id.as_uuid(), self.next_sequence)
    }

    /// Sends a user message to the active conversation and streams the reply.
    ///
    /// `on_update` sees every fragment in arrival order and, unless the reply is
    /// cancelled, one final update whose presented value is the committed text.
    /// Cancelling `cancel` stops the provider stream and commits no assistant turn.
    pub async fn send_message<F>(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> SessionResult<ReplyOutcome>
    where
        F: FnMut(StreamUpdate<'_>),
    {
        let model_id = self.selected_model.clone().context(NoModelSelectedSnafu {
            stage: "send-message",
        })?;
        ensure!(
            !text.trim().is_empty(),
            EmptyMessageSnafu {
                stage: "send-message",
            }
        );

        let store = &self.session.store;
        let messages = self.context.build(store.active(), text, store.document());
        let conversation_id = store.active_id();
        self.session.store.append_message(Role::User, text);

        let target = self.next_target(conversation_id);
        let mut request = StreamRequest::new(target, model_id.as_str(), messages);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        tracing::debug!(
            stream_target = ?target,
            model_id = %model_id,
            message_count = request.messages.len(),
            "sending message"
        );

        let mut accumulator = StreamAccumulator::new(self.config.fence_mode);
        let status = match self.provider.stream_chat(request) {
            Ok(handle) => drive_stream(handle, &mut accumulator, cancel, &mut on_update).await,
            Err(error) => {
                tracing::error!(
                    stream_target = ?target,
                    model_id = %model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                let fragment = error_fragment(&error.to_string());
                push_update(&mut accumulator, &fragment, &mut on_update);
                ReplyStatus::Failed
            }
        };

        if status == ReplyStatus::Cancelled {
            tracing::info!(stream_target = ?target, "reply cancelled; nothing committed");
            return Ok(ReplyOutcome {
                conversation_id,
                status,
                content: accumulator.into_content(),
            });
        }

        on_update(StreamUpdate {
            fragment: "",
            presented: accumulator.complete(),
        });
        let content = accumulator.into_content();
        self.session
            .store
            .append_message(Role::Assistant, content.clone());

        tracing::debug!(
            stream_target = ?target,
            status = ?status,
            char_count = content.chars().count(),
            "reply committed"
        );

        Ok(ReplyOutcome {
            conversation_id,
            status,
            content,
        })
    }
}

async fn drive_stream<F>(
    handle: StreamHandle,
    accumulator: &mut StreamAccumulator,
    cancel: &CancellationToken,
    on_update: &mut F,
) -> ReplyStatus
where
    F: FnMut(StreamUpdate<'_>),
{
    let StreamHandle { mut stream, worker } = handle;
    let target = stream.target();
    let worker = tokio::spawn(worker);

    let status = loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stream.cancel();
                break ReplyStatus::Cancelled;
            }
            event = stream.recv() => event,
        };

        let Some(event) = event else {
            tracing::debug!(stream_target = ?target, "provider stream closed without terminal event");
            break ReplyStatus::Completed;
        };

        if event.target != target {
            tracing::debug!(
                stream_target = ?target,
                stale_target = ?event.target,
                "ignoring stale stream event"
            );
            continue;
        }

        match event.payload {
            StreamPayload::Delta(fragment) => push_update(accumulator, &fragment, on_update),
            StreamPayload::Done => break ReplyStatus::Completed,
            StreamPayload::Error(message) => {
                tracing::warn!(stream_target = ?target, error = %message, "provider stream failed");
                push_update(accumulator, &error_fragment(&message), on_update);
                break ReplyStatus::Failed;
            }
        }
    };

    finish_worker(stream, worker, status).await;
    status
}

fn push_update<F>(accumulator: &mut StreamAccumulator, fragment: &str, on_update: &mut F)
where
    F: FnMut(StreamUpdate<'_>),
{
    let presented = accumulator.push(fragment);
    on_update(StreamUpdate {
        fragment,
        presented,
    });
}

async fn finish_worker(
    stream: EventStream,
    worker: tokio::task::JoinHandle<()>,
    status: ReplyStatus,
) {
    // Dropping the stream releases a worker blocked on a full channel.
    drop(stream);
    if status == ReplyStatus::Cancelled {
        return;
    }
    if let Err(error) = worker.await {
        tracing::warn!(error = %error, "provider worker did not finish cleanly");
    }
}
