use super::provider::LlmProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }
}

/// Whether the registry answered the last catalog query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogStatus {
    Online,
    Offline { reason: String },
}

/// Snapshot of the models a provider currently serves.
///
/// An offline catalog always has an empty model list; absence of models is a
/// normal, displayable state rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    models: Vec<Model>,
    status: CatalogStatus,
}

impl ModelCatalog {
    pub fn online(models: Vec<Model>) -> Self {
        Self {
            models: normalize_models(models),
            status: CatalogStatus::Online,
        }
    }

    pub fn offline(reason: impl Into<String>) -> Self {
        Self {
            models: Vec::new(),
            status: CatalogStatus::Offline {
                reason: reason.into(),
            },
        }
    }

    /// Queries the provider registry, degrading to an offline catalog on any failure.
    pub async fn load(provider: &dyn LlmProvider) -> Self {
        match provider.fetch_models().await {
            Ok(models) => {
                let catalog = Self::online(models);
                tracing::debug!(
                    provider_id = %provider.id(),
                    model_count = catalog.models.len(),
                    "model catalog refreshed"
                );
                catalog
            }
            Err(error) => {
                tracing::warn!(
                    provider_id = %provider.id(),
                    error = %error,
                    "model registry unavailable; serving empty catalog"
                );
                Self::offline(error.to_string())
            }
        }
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn status(&self) -> &CatalogStatus {
        &self.status
    }

    pub fn is_online(&self) -> bool {
        matches!(self.status, CatalogStatus::Online)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|model| model.id == model_id)
    }

    pub fn first(&self) -> Option<&Model> {
        self.models.first()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::offline("model registry not queried yet")
    }
}

// Registry order is preserved; blank and repeated identifiers are dropped.
fn normalize_models(models: Vec<Model>) -> Vec<Model> {
    let mut normalized: Vec<Model> = Vec::with_capacity(models.len());
    for mut model in models {
        let id = model.id.trim();
        if id.is_empty() || normalized.iter().any(|existing| existing.id == id) {
            continue;
        }
        model.id = id.to_string();
        normalized.push(model);
    }
    normalized
}
