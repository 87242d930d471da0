use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use relay_llm::{DEFAULT_MODEL, ResponderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::locale::Locale;

pub const SETTINGS_DIRECTORY_NAME: &str = "relay";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "RELAY_";

pub const DEFAULT_TYPING_TICK_MS: u64 = 30;
pub const DEFAULT_REPLY_DELAY_MIN_MS: u64 = 600;
pub const DEFAULT_REPLY_DELAY_MAX_MS: u64 = 1_400;
pub const DEFAULT_BAN_TICK_MS: u64 = 1_000;

/// Per-device preferences; everything shared between clients lives in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub locale: Locale,
    pub default_model: String,
    pub typing_tick_ms: u64,
    pub reply_delay_min_ms: u64,
    pub reply_delay_max_ms: u64,
    pub ban_tick_ms: u64,
    /// Local operator challenge; empty disables the challenge entirely.
    pub admin_passphrase: String,
    pub responder: String,
    pub response_pool: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            locale: Locale::En,
            default_model: DEFAULT_MODEL.to_string(),
            typing_tick_ms: DEFAULT_TYPING_TICK_MS,
            reply_delay_min_ms: DEFAULT_REPLY_DELAY_MIN_MS,
            reply_delay_max_ms: DEFAULT_REPLY_DELAY_MAX_MS,
            ban_tick_ms: DEFAULT_BAN_TICK_MS,
            admin_passphrase: String::new(),
            responder: String::new(),
            response_pool: Vec::new(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.default_model = self.default_model.trim().to_string();
        if self.default_model.is_empty() {
            self.default_model = DEFAULT_MODEL.to_string();
        }
        self.typing_tick_ms = self.typing_tick_ms.max(1);
        self.ban_tick_ms = self.ban_tick_ms.max(1);
        if self.reply_delay_min_ms > self.reply_delay_max_ms {
            std::mem::swap(&mut self.reply_delay_min_ms, &mut self.reply_delay_max_ms);
        }
        self.admin_passphrase = self.admin_passphrase.trim().to_string();
        self.responder = self.responder.trim().to_string();
        self.response_pool = self
            .response_pool
            .into_iter()
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect();
        self
    }

    pub fn typing_tick(&self) -> Duration {
        Duration::from_millis(self.typing_tick_ms)
    }

    pub fn ban_tick(&self) -> Duration {
        Duration::from_millis(self.ban_tick_ms)
    }

    pub fn reply_delay_window(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.reply_delay_min_ms),
            Duration::from_millis(self.reply_delay_max_ms),
        )
    }

    pub fn responder_config(&self) -> ResponderConfig {
        ResponderConfig {
            kind: self.responder.clone(),
            pool: self.response_pool.clone(),
            seed: None,
        }
    }
}

pub struct ClientSettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl ClientSettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".relay"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    /// Settings that never touch the filesystem.
    pub fn in_memory(settings: ClientSettings) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings.normalized())),
            config_path: PathBuf::new(),
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ClientSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        if !self.config_path.as_os_str().is_empty() {
            self.persist(&normalized_settings)?;
        }
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> ClientSettings {
        if !path.exists() {
            tracing::info!(?path, "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(ClientSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(?path, %error, "failed to parse settings, using defaults");
                ClientSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}
