use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use guru_llm::{DEFAULT_OLLAMA_URL, DEFAULT_STREAM_CHANNEL_CAPACITY, ProviderConfig};
use guru_session::{ContextConfig, ControllerConfig, FenceMode};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "guru";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
/// Environment overrides, e.g. `GURU_OLLAMA_URL` or `GURU_CONTEXT__DOCUMENT_CHAR_LIMIT`.
pub const ENV_PREFIX: &str = "GURU_";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub ollama_url: String,
    pub default_model: Option<String>,
    pub temperature: Option<f64>,
    pub request_timeout_secs: u64,
    pub stream_channel_capacity: usize,
    pub log_filter: String,
    pub context: ContextConfig,
    pub fence_mode: FenceMode,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            default_model: None,
            temperature: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            stream_channel_capacity: DEFAULT_STREAM_CHANNEL_CAPACITY,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            context: ContextConfig::default(),
            fence_mode: FenceMode::default(),
        }
    }
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        self.ollama_url = if self.ollama_url.trim().is_empty() {
            DEFAULT_OLLAMA_URL.to_string()
        } else {
            self.ollama_url.trim().trim_end_matches('/').to_string()
        };
        self.default_model = self
            .default_model
            .map(|model| model.trim().to_string())
            .filter(|model| !model.is_empty());
        self.temperature = self.temperature.filter(|value| value.is_finite());
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
        self.stream_channel_capacity = self.stream_channel_capacity.max(1);
        self.log_filter = if self.log_filter.trim().is_empty() {
            DEFAULT_LOG_FILTER.to_string()
        } else {
            self.log_filter.trim().to_string()
        };

        self
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::ollama(self.ollama_url.as_str())
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_channel_capacity(self.stream_channel_capacity)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            default_model: self.default_model.clone(),
            temperature: self.temperature,
            fence_mode: self.fence_mode,
            context: self.context.clone(),
        }
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
    load_error: Option<String>,
}

impl SettingsStore {
    /// `<config dir>/guru/settings.json`, or `.guru/settings.json` when the
    /// platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|base| base.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".guru"))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let loaded = Self::load_from_disk(&config_path);
        let load_error = loaded.as_ref().err().map(ToString::to_string);
        let settings = loaded.unwrap_or_default();

        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
            load_error,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_path())
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Why the stored settings could not be read, when defaults are in use instead.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Writes `settings` to disk, then makes them current.
    pub fn update(&self, settings: AppSettings) -> Result<(), SettingsError> {
        let settings = Arc::new(settings.normalized());
        write_settings_file(&self.config_path, &settings)?;
        self.settings.store(settings);
        tracing::info!(path = %self.config_path.display(), "settings saved");
        Ok(())
    }

    // Defaults, then the JSON file when present, then `GURU_` environment variables.
    fn load_from_disk(path: &Path) -> Result<AppSettings, figment::Error> {
        let settings = Figment::from(Serialized::defaults(AppSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract::<AppSettings>()?
            .normalized();
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }
}

// Readers never observe a half-written file: the JSON goes to a sibling
// temporary file that is then renamed over the target.
fn write_settings_file(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    if let Some(directory) = path.parent() {
        std::fs::create_dir_all(directory).context(SettingsDirSnafu {
            stage: "ensure-settings-dir",
            path: directory,
        })?;
    }

    let json = serde_json::to_vec_pretty(settings).context(EncodeSettingsSnafu {
        stage: "encode-settings",
    })?;
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, json).context(StageSettingsSnafu {
        stage: "write-staging-file",
        path: staging.as_path(),
    })?;
    std::fs::rename(&staging, path).context(SwapSettingsSnafu {
        stage: "swap-in-staging-file",
        path,
    })
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot create settings directory {path:?} on `{stage}`: {source}"))]
    SettingsDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode settings as JSON on `{stage}`: {source}"))]
    EncodeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot write {path:?} on `{stage}`: {source}"))]
    StageSettings {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot move new settings into {path:?} on `{stage}`: {source}"))]
    SwapSettings {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}
