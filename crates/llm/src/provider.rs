use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::model::Model;

pub const OLLAMA_PROVIDER_ID: &str = "ollama";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Identifies which send a stream event belongs to.
///
/// The sequence is bumped on every send, so an event carrying an older
/// sequence is stale even when the conversation matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: Uuid,
    pub sequence: u64,
}

impl StreamTarget {
    pub const fn new(conversation_id: Uuid, sequence: u64) -> Self {
        Self {
            conversation_id,
            sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPayload {
    Delta(String),
    Done,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub target: StreamTarget,
    pub payload: StreamPayload,
}

impl StreamEvent {
    pub fn delta(target: StreamTarget, text: impl Into<String>) -> Self {
        Self {
            target,
            payload: StreamPayload::Delta(text.into()),
        }
    }

    pub fn done(target: StreamTarget) -> Self {
        Self {
            target,
            payload: StreamPayload::Done,
        }
    }

    pub fn error(target: StreamTarget, message: impl Into<String>) -> Self {
        Self {
            target,
            payload: StreamPayload::Error(message.into()),
        }
    }
}

/// Where and how to reach a chat provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub request_timeout: Duration,
    /// Events a worker may queue before it waits for the reader.
    pub channel_capacity: usize,
}

impl ProviderConfig {
    pub fn new(provider_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let provider_id = provider_id.into();
        let base_url = base_url.into();
        Self {
            provider_id: provider_id.trim().to_string(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            channel_capacity: DEFAULT_STREAM_CHANNEL_CAPACITY,
        }
    }

    pub fn ollama(base_url: impl Into<String>) -> Self {
        Self::new(OLLAMA_PROVIDER_ID, base_url)
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        // tokio rejects zero-capacity channels.
        self.channel_capacity = channel_capacity.max(1);
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::ollama(DEFAULT_OLLAMA_URL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// One chat completion to stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub target: StreamTarget,
    pub model_id: String,
    pub messages: Vec<ProviderMessage>,
    pub temperature: Option<f64>,
}

impl StreamRequest {
    pub fn new(
        target: StreamTarget,
        model_id: impl Into<String>,
        messages: Vec<ProviderMessage>,
    ) -> Self {
        Self {
            target,
            model_id: model_id.into(),
            messages,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
/// Future that produces a stream's events; the caller decides where it runs.
pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("unsupported provider '{provider_id}'"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("nothing to send for {target:?}: the request has no messages"))]
    EmptyMessageSet {
        stage: &'static str,
        target: StreamTarget,
    },
    #[snafu(display("could not build the provider client on `{stage}`: {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("model registry at {url} is unreachable on `{stage}`: {source}"))]
    RegistryRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("model registry answered with status {status}: {body}"))]
    RegistryStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("model registry sent an unreadable model list on `{stage}`: {source}"))]
    RegistryPayload {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("chat completion failed on `{stage}`: {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

/// Reading side of one streamed reply.
///
/// Cancels the producing worker when cancelled explicitly or dropped.
pub struct EventStream {
    target: StreamTarget,
    events: mpsc::Receiver<StreamEvent>,
    cancel: Option<oneshot::Sender<()>>,
}

impl EventStream {
    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Asks the worker to stop. Only the first call can succeed.
    pub fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(signal) => signal.send(()).is_ok(),
            None => false,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A started stream: the events to read and the worker that produces them.
pub struct StreamHandle {
    pub stream: EventStream,
    pub worker: ProviderWorker,
}

pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<Vec<Model>>>;
    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<StreamHandle>;
}

/// Bounded channel between a worker and its [`EventStream`].
///
/// Returns the event sender and the cancellation receiver for the worker.
pub fn event_channel(
    target: StreamTarget,
    capacity: usize,
) -> (mpsc::Sender<StreamEvent>, EventStream, oneshot::Receiver<()>) {
    let (events_tx, events) = mpsc::channel(capacity.max(1));
    let (cancel, cancelled) = oneshot::channel();
    let stream = EventStream {
        target,
        events,
        cancel: Some(cancel),
    };
    (events_tx, stream, cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: StreamTarget = StreamTarget::new(Uuid::nil(), 1);

    #[tokio::test]
    async fn events_are_read_in_the_order_sent() {
        let (tx, mut stream, _cancelled) = event_channel(TARGET, 4);
        for event in [
            StreamEvent::delta(TARGET, "a"),
            StreamEvent::delta(TARGET, "b"),
            StreamEvent::done(TARGET),
        ] {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let mut payloads = Vec::new();
        while let Some(event) = stream.recv().await {
            payloads.push(event.payload);
        }
        assert_eq!(
            payloads,
            vec![
                StreamPayload::Delta("a".to_string()),
                StreamPayload::Delta("b".to_string()),
                StreamPayload::Done,
            ]
        );
    }

    #[tokio::test]
    async fn full_channel_refuses_more_events() {
        let (tx, mut stream, _cancelled) = event_channel(TARGET, 1);
        tx.send(StreamEvent::delta(TARGET, "first")).await.unwrap();
        assert!(tx.try_send(StreamEvent::delta(TARGET, "second")).is_err());

        assert!(stream.recv().await.is_some());
        assert!(tx.try_send(StreamEvent::done(TARGET)).is_ok());
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_worker() {
        let (_tx, stream, cancelled) = event_channel(TARGET, 1);
        drop(stream);
        assert!(cancelled.await.is_ok());
    }

    #[tokio::test]
    async fn cancel_signals_once() {
        let (_tx, mut stream, cancelled) = event_channel(TARGET, 1);
        assert!(stream.cancel());
        assert!(!stream.cancel());
        assert!(cancelled.await.is_ok());
    }

    #[test]
    fn config_is_normalized() {
        let config = ProviderConfig::ollama(" http://localhost:11434/ ").with_channel_capacity(0);
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.channel_capacity, 1);
        assert_eq!(config.provider_id, OLLAMA_PROVIDER_ID);
    }
}
