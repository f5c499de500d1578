use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use ragdesk_transport::{
    BackendConfig, DEFAULT_API_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "ragdesk";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "RAGDESK_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        let api_base_url = self.api_base_url.trim().trim_end_matches('/');
        self.api_base_url = if api_base_url.is_empty() {
            default_api_base_url()
        } else {
            api_base_url.to_string()
        };
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout_secs();
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }

        self
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(&self.api_base_url)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
    }
}

pub struct SettingsStore {
    settings: ClientSettings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".ragdesk"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layers(&config_path, Env::prefixed(ENV_PREFIX));
        Self {
            settings,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update(&mut self, settings: ClientSettings) -> SettingsResult<()> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings = normalized_settings;
        Ok(())
    }

    /// Writes the current settings when no file exists yet, so there is
    /// something to edit.
    pub fn ensure_persisted(&self) -> SettingsResult<bool> {
        if self.config_path.exists() {
            return Ok(false);
        }
        self.persist(&self.settings)?;
        Ok(true)
    }

    fn load_layers(path: &Path, env: Env) -> ClientSettings {
        let mut figment = Figment::from(Serialized::defaults(ClientSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }

        match figment.merge(env).extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = ?path,
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                ClientSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ClientSettings) -> SettingsResult<()> {
        if let Some(parent) = self.config_path.parent() {
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

pub type SettingsResult<T> = Result<T, SettingsError>;

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("ragdesk-settings-{}", Uuid::now_v7()))
            .join(SETTINGS_FILE_NAME)
    }

    fn no_env() -> Env {
        Env::prefixed("RAGDESK_TEST_UNSET_")
    }

    #[test]
    fn normalization_trims_and_restores_defaults() {
        let settings = ClientSettings {
            api_base_url: "  http://host:9000/api/v1/ ".to_string(),
            connect_timeout_secs: 0,
            request_timeout_secs: 0,
        }
        .normalized();

        assert_eq!(settings.api_base_url, "http://host:9000/api/v1");
        assert_eq!(settings.connect_timeout_secs, 10);
        assert_eq!(settings.request_timeout_secs, 30);

        let blank = ClientSettings {
            api_base_url: "   ".to_string(),
            connect_timeout_secs: 3,
            request_timeout_secs: 7,
        }
        .normalized();
        assert_eq!(blank.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(blank.backend_config().connect_timeout, Duration::from_secs(3));
        assert_eq!(blank.backend_config().request_timeout, Duration::from_secs(7));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = SettingsStore::load_layers(&scratch_path(), no_env());

        assert_eq!(settings, ClientSettings::default());
    }

    #[test]
    fn file_layer_overrides_defaults_and_malformed_files_fall_back() {
        let path = scratch_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        std::fs::write(&path, r#"{"api_base_url": "http://remote/api/v1/"}"#).unwrap();
        let settings = SettingsStore::load_layers(&path, no_env());
        assert_eq!(settings.api_base_url, "http://remote/api/v1");
        assert_eq!(settings.connect_timeout_secs, 10);

        std::fs::write(&path, r#"{"connect_timeout_secs": "soon"}"#).unwrap();
        let settings = SettingsStore::load_layers(&path, no_env());
        assert_eq!(settings, ClientSettings::default());

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn update_persists_normalized_settings() {
        let path = scratch_path();
        let mut store = SettingsStore {
            settings: ClientSettings::default(),
            config_path: path.clone(),
        };

        assert!(store.ensure_persisted().unwrap());
        assert!(!store.ensure_persisted().unwrap());

        store
            .update(ClientSettings {
                api_base_url: "http://other/api/v1/".to_string(),
                connect_timeout_secs: 4,
                request_timeout_secs: 12,
            })
            .unwrap();

        let reloaded = SettingsStore::load_layers(&path, no_env());
        assert_eq!(reloaded.api_base_url, "http://other/api/v1");
        assert_eq!(reloaded.connect_timeout_secs, 4);
        assert_eq!(reloaded.request_timeout_secs, 12);
        assert_eq!(store.settings(), &reloaded);

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
