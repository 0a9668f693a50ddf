use futures::{Stream, StreamExt};
use rig::client::Nothing;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use rig::streaming::{StreamedAssistantContent, StreamingCompletionResponse};
use serde::Deserialize;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::model::Model;
use super::provider::{
    BoxFuture, CompletionsFailedSnafu, EmptyMessageSetSnafu, HttpClientSnafu, LlmProvider,
    ProviderConfig, ProviderError, ProviderMessage, ProviderResult, ProviderWorker,
    RegistryPayloadSnafu, RegistryRequestSnafu, RegistryStatusSnafu, Role, StreamEvent,
    StreamHandle, StreamRequest, StreamTarget, event_channel,
};

const TAGS_PATH: &str = "/api/tags";

/// Body of `GET /api/tags`; unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    model: String,
}

impl TagEntry {
    fn identifier(&self) -> Option<&str> {
        [self.name.trim(), self.model.trim()]
            .into_iter()
            .find(|candidate| !candidate.is_empty())
    }
}

fn models_from_tags(tags: TagList) -> Vec<Model> {
    tags.models
        .iter()
        .filter_map(TagEntry::identifier)
        .map(Model::from_id)
        .collect()
}

/// System turns joined into the single preamble rig accepts.
fn system_preamble(messages: &[ProviderMessage]) -> Option<String> {
    let parts = messages
        .iter()
        .filter(|message| message.role == Role::System && !message.content.trim().is_empty())
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn chat_turns(messages: &[ProviderMessage]) -> Vec<RigMessage> {
    messages
        .iter()
        .filter_map(|message| match message.role {
            Role::System => None,
            Role::User => Some(RigMessage::user(message.content.clone())),
            Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
        })
        .collect()
}

/// Answer text only; reasoning and tool traffic never reach the transcript.
fn answer_text<R>(item: StreamedAssistantContent<R>) -> Option<String>
where
    R: Clone + Unpin,
{
    match item {
        StreamedAssistantContent::Text(text) if !text.text.is_empty() => Some(text.text),
        _ => None,
    }
}

/// Chat provider for a local Ollama server.
///
/// Replies stream through rig's Ollama client. Models are listed with a plain
/// HTTP call to the server's tag endpoint.
pub struct OllamaProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context(RegistryRequestSnafu {
                stage: "build-registry-client",
                url: config.base_url.clone(),
            })?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn list_tags(&self) -> ProviderResult<Vec<Model>> {
        let url = format!("{}{TAGS_PATH}", self.config.base_url);
        let response = self.http.get(&url).send().await.context(RegistryRequestSnafu {
            stage: "request-tags",
            url: url.as_str(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return RegistryStatusSnafu {
                stage: "check-tags-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let tags = response.json::<TagList>().await.context(RegistryPayloadSnafu {
            stage: "decode-tags",
        })?;
        Ok(models_from_tags(tags))
    }
}

fn build_client(config: &ProviderConfig) -> ProviderResult<ollama::Client> {
    ollama::Client::builder()
        .api_key(Nothing)
        .base_url(config.base_url.as_str())
        .build()
        .context(HttpClientSnafu {
            stage: "build-completion-client",
        })
}

/// How a forwarded reply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyEnd {
    Done,
    Failed,
    Cancelled,
    ReaderGone,
}

/// Forwards answer text from `items` until the stream ends, fails or is cancelled.
///
/// Sends exactly one `Done` or `Error` unless cancelled or the reader is gone,
/// in which case nothing terminal is sent.
async fn forward_reply<S>(
    target: StreamTarget,
    mut items: S,
    events: &mpsc::Sender<StreamEvent>,
    cancelled: &mut oneshot::Receiver<()>,
) -> ReplyEnd
where
    S: Stream<Item = ProviderResult<Option<String>>> + Unpin,
{
    loop {
        let item = tokio::select! {
            _ = &mut *cancelled => return ReplyEnd::Cancelled,
            item = items.next() => item,
        };

        match item {
            Some(Ok(Some(text))) => {
                if events.send(StreamEvent::delta(target, text)).await.is_err() {
                    return ReplyEnd::ReaderGone;
                }
            }
            Some(Ok(None)) => {}
            Some(Err(error)) => {
                tracing::warn!(stream_target = ?target, error = %error, "reply broke off");
                let _ = events.send(StreamEvent::error(target, error.to_string())).await;
                return ReplyEnd::Failed;
            }
            None => {
                let _ = events.send(StreamEvent::done(target)).await;
                return ReplyEnd::Done;
            }
        }
    }
}

/// Everything one stream worker needs, moved into its future.
struct ReplyJob {
    config: ProviderConfig,
    request: StreamRequest,
    events: mpsc::Sender<StreamEvent>,
}

impl ReplyJob {
    fn target(&self) -> StreamTarget {
        self.request.target
    }

    async fn start<M>(
        &self,
        model: &M,
    ) -> ProviderResult<StreamingCompletionResponse<M::StreamingResponse>>
    where
        M: CompletionModel,
    {
        let mut history = chat_turns(&self.request.messages);
        let Some(prompt) = history.pop() else {
            tracing::warn!(
                stream_target = ?self.target(),
                model_id = %self.request.model_id,
                message_count = self.request.messages.len(),
                "request holds only system messages"
            );
            return EmptyMessageSetSnafu {
                stage: "split-prompt",
                target: self.target(),
            }
            .fail();
        };

        let mut completion = model.completion_request(prompt).messages(history);
        if let Some(preamble) = system_preamble(&self.request.messages) {
            completion = completion.preamble(preamble);
        }
        if let Some(temperature) = self.request.temperature {
            completion = completion.temperature(temperature);
        }

        completion.stream().await.context(CompletionsFailedSnafu {
            stage: "start-completion",
        })
    }

    async fn report(&self, error: ProviderError) {
        // A closed channel means the reader is gone; there is nobody to tell.
        let _ = self
            .events
            .send(StreamEvent::error(self.target(), error.to_string()))
            .await;
    }

    async fn run(self, mut cancelled: oneshot::Receiver<()>) {
        let target = self.target();
        let client = match build_client(&self.config) {
            Ok(client) => client,
            Err(error) => {
                tracing::error!(stream_target = ?target, error = %error, "ollama client unavailable");
                self.report(error).await;
                return;
            }
        };

        let model = client.completion_model(self.request.model_id.as_str());
        // Loading a model can take long; a cancel must not wait for it.
        let started = tokio::select! {
            _ = &mut cancelled => {
                tracing::debug!(stream_target = ?target, "reply cancelled before it started");
                return;
            }
            started = self.start(&model) => started,
        };
        let mut reply = match started {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(
                    stream_target = ?target,
                    model_id = %self.request.model_id,
                    error = %error,
                    "completion did not start"
                );
                self.report(error).await;
                return;
            }
        };

        let items = reply.by_ref().map(|item| {
            item.map(answer_text).context(CompletionsFailedSnafu {
                stage: "read-reply-chunk",
            })
        });
        let end = forward_reply(target, items, &self.events, &mut cancelled).await;
        if end == ReplyEnd::Cancelled {
            tracing::debug!(stream_target = ?target, "reply cancelled by reader");
            reply.cancel();
        }
    }
}

impl LlmProvider for OllamaProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Ollama"
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<Vec<Model>>> {
        Box::pin(self.list_tags())
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<StreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
                target: request.target,
            }
        );

        let (events, stream, cancelled) =
            event_channel(request.target, self.config.channel_capacity);
        let job = ReplyJob {
            config: self.config.clone(),
            request,
            events,
        };
        let worker: ProviderWorker = Box::pin(job.run(cancelled));

        Ok(StreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StreamPayload;
    use uuid::Uuid;

    fn tag_ids(payload: &str) -> Vec<String> {
        let tags: TagList = serde_json::from_str(payload).unwrap();
        models_from_tags(tags)
            .into_iter()
            .map(|model| model.id)
            .collect()
    }

    #[test]
    fn tag_name_wins_over_model_field() {
        let ids = tag_ids(
            r#"{"models":[
                {"name":"llama3:8b","model":"llama3:8b","size":1},
                {"model":"mistral:latest"},
                {"name":"  ","model":""}
            ]}"#,
        );
        assert_eq!(ids, vec!["llama3:8b", "mistral:latest"]);
    }

    #[test]
    fn missing_models_field_is_an_empty_list() {
        assert!(tag_ids("{}").is_empty());
    }

    #[test]
    fn preamble_joins_non_blank_system_turns() {
        let messages = vec![
            ProviderMessage::system("be brief"),
            ProviderMessage::user("hi"),
            ProviderMessage::system("   "),
            ProviderMessage::system("use markdown"),
        ];
        assert_eq!(
            system_preamble(&messages).as_deref(),
            Some("be brief\n\nuse markdown")
        );
        assert!(system_preamble(&[ProviderMessage::user("hi")]).is_none());
    }

    #[test]
    fn preamble_keeps_system_text_as_built() {
        let messages = vec![
            ProviderMessage::system("  indented rules\n"),
            ProviderMessage::system("\n"),
            ProviderMessage::system("```\ncode\n```  "),
        ];
        assert_eq!(
            system_preamble(&messages).as_deref(),
            Some("  indented rules\n\n\n```\ncode\n```  ")
        );
    }

    const TARGET: StreamTarget = StreamTarget::new(Uuid::nil(), 3);

    fn chunk(text: &str) -> ProviderResult<Option<String>> {
        Ok(Some(text.to_string()))
    }

    async fn drain(mut stream: crate::EventStream) -> Vec<StreamPayload> {
        let mut payloads = Vec::new();
        while let Some(event) = stream.recv().await {
            assert_eq!(event.target, TARGET);
            payloads.push(event.payload);
        }
        payloads
    }

    #[tokio::test]
    async fn finished_reply_ends_with_a_single_done() {
        let (tx, stream, mut cancelled) = event_channel(TARGET, 8);
        let items = futures::stream::iter(vec![chunk("Hel"), Ok(None), chunk("lo")]);

        let end = forward_reply(TARGET, items, &tx, &mut cancelled).await;
        drop(tx);

        assert_eq!(end, ReplyEnd::Done);
        assert_eq!(
            drain(stream).await,
            vec![
                StreamPayload::Delta("Hel".to_string()),
                StreamPayload::Delta("lo".to_string()),
                StreamPayload::Done,
            ]
        );
    }

    #[tokio::test]
    async fn broken_reply_ends_with_a_single_error() {
        let (tx, stream, mut cancelled) = event_channel(TARGET, 8);
        let broken = ProviderError::RegistryStatus {
            stage: "scripted-chunk",
            status: 500,
            body: "lost".to_string(),
        };
        let items = futures::stream::iter(vec![chunk("partial"), Err(broken), chunk("after")]);

        let end = forward_reply(TARGET, items, &tx, &mut cancelled).await;
        drop(tx);

        assert_eq!(end, ReplyEnd::Failed);
        let payloads = drain(stream).await;
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], StreamPayload::Delta("partial".to_string()));
        assert!(matches!(&payloads[1], StreamPayload::Error(message) if message.contains("500")));
    }

    #[tokio::test]
    async fn cancelled_reply_sends_nothing_terminal() {
        let (tx, mut stream, mut cancelled) = event_channel(TARGET, 8);
        assert!(stream.cancel());
        let items = futures::stream::pending::<ProviderResult<Option<String>>>();

        let end = forward_reply(TARGET, items, &tx, &mut cancelled).await;
        drop(tx);

        assert_eq!(end, ReplyEnd::Cancelled);
        assert!(drain(stream).await.is_empty());
    }

    #[tokio::test]
    async fn dropped_reader_stops_forwarding() {
        let (tx, stream, mut cancelled) = event_channel(TARGET, 8);
        drop(stream);
        let items = futures::stream::iter(vec![chunk("unread")]);

        let end = forward_reply(TARGET, items, &tx, &mut cancelled).await;

        assert!(matches!(end, ReplyEnd::Cancelled | ReplyEnd::ReaderGone));
    }

    #[test]
    fn system_turns_are_not_chat_turns() {
        let messages = vec![
            ProviderMessage::system("rules"),
            ProviderMessage::user("hi"),
            ProviderMessage::new(Role::Assistant, "hello"),
        ];
        assert_eq!(chat_turns(&messages).len(), 2);
    }

    #[test]
    fn empty_request_is_refused_before_streaming() {
        let provider = OllamaProvider::new(ProviderConfig::default()).unwrap();
        let request = StreamRequest::new(StreamTarget::new(Uuid::nil(), 7), "llama3", Vec::new());
        let error = match provider.stream_chat(request) {
            Ok(_) => panic!("empty request must be refused"),
            Err(error) => error,
        };
        assert!(matches!(error, ProviderError::EmptyMessageSet { .. }));
    }
}
