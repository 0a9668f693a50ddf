#![deny(unsafe_code)]

use std::sync::Arc;

mod model;
mod ollama;
mod provider;

pub use model::{CatalogStatus, Model, ModelCatalog};
pub use ollama::OllamaProvider;
pub use provider::{
    BoxFuture, DEFAULT_OLLAMA_URL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STREAM_CHANNEL_CAPACITY,
    EventStream, LlmProvider, OLLAMA_PROVIDER_ID, ProviderConfig, ProviderError, ProviderMessage,
    ProviderResult, ProviderWorker, Role, StreamEvent, StreamHandle, StreamPayload,
    StreamRequest, StreamTarget, event_channel,
};

/// Provider for `config.provider_id`; a blank id means Ollama.
pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = OLLAMA_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        OLLAMA_PROVIDER_ID => Ok(Arc::new(OllamaProvider::new(config)?)),
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_provider_id_defaults_to_ollama() {
        let provider = create_provider(ProviderConfig::new("", DEFAULT_OLLAMA_URL)).unwrap();
        assert_eq!(provider.id(), OLLAMA_PROVIDER_ID);
        assert_eq!(provider.name(), "Ollama");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let error = match create_provider(ProviderConfig::new("openai", DEFAULT_OLLAMA_URL)) {
            Ok(_) => panic!("only ollama is supported"),
            Err(error) => error,
        };
        assert!(matches!(
            error,
            ProviderError::UnsupportedProvider { provider_id, .. } if provider_id == "openai"
        ));
    }
}
