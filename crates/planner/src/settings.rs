use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "chat-tree";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "CHAT_TREE_";
pub const DEFAULT_MAX_BATCH_OPERATIONS: usize = 1024;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Upper bound on create + update + delete records in one batch.
    #[serde(default = "default_max_batch_operations")]
    pub max_batch_operations: usize,
    /// `tracing_subscriber::EnvFilter` directive used by the runner binary.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_batch_operations: default_max_batch_operations(),
            log_filter: default_log_filter(),
        }
    }
}

impl PlannerSettings {
    pub fn normalized(mut self) -> Self {
        if self.max_batch_operations == 0 {
            self.max_batch_operations = default_max_batch_operations();
        }
        self.log_filter = if self.log_filter.trim().is_empty() {
            default_log_filter()
        } else {
            self.log_filter.trim().to_string()
        };
        self
    }
}

pub struct SettingsStore {
    settings: PlannerSettings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".chat-tree"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads settings from `config_path`, falling back to defaults when the
    /// file or environment cannot be parsed.
    pub fn new(config_path: PathBuf) -> Self {
        let settings = match Self::try_load_from(&config_path) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!("{error}. using default planner settings");
                PlannerSettings::default()
            }
        };
        Self {
            settings,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    /// Defaults, then the JSON file (if present), then `CHAT_TREE_*` env vars.
    pub fn try_load_from(path: &Path) -> Result<PlannerSettings, SettingsError> {
        if !path.exists() {
            tracing::debug!("settings file not found at {:?}, using defaults", path);
        }

        let figment = Figment::from(Serialized::defaults(PlannerSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        figment
            .extract::<PlannerSettings>()
            .map(PlannerSettings::normalized)
            .context(ExtractSnafu {
                stage: "extract-planner-settings",
                path: path.to_path_buf(),
            })
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update(&mut self, settings: PlannerSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings = normalized_settings;
        Ok(())
    }

    fn persist(&self, settings: &PlannerSettings) -> Result<(), SettingsError> {
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

        tracing::info!("saved planner settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to read planner settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: PathBuf,
        source: figment::Error,
    },
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

fn default_max_batch_operations() -> usize {
    DEFAULT_MAX_BATCH_OPERATIONS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
