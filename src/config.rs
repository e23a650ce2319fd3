use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::export::encoder::StepsEncoder;

pub const PAT_VAR: &str = "ADO_PAT";
pub const ORGANIZATION_VAR: &str = "ADO_ORGANIZATION";
pub const PROJECT_VAR: &str = "ADO_PROJECT";
pub const API_KEY_VAR: &str = "GOOGLE_API_KEY";

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Per-identity tracker credentials, used when the environment supplies none.
    #[serde(default)]
    pub profiles: BTreeMap<String, TrackerSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Language the generated test cases are written in.
    pub language: String,
    /// Unset means the HTTP client's own defaults.
    pub timeout_secs: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            language: "Spanish".into(),
            timeout_secs: None,
        }
    }
}

impl ModelConfig {
    /// `GOOGLE_API_KEY` wins over the file.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub base_url: String,
    pub steps_format: StepsEncoder,
    /// Create requests in flight at once during a push.
    pub concurrency: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dev.azure.com".into(),
            steps_format: StepsEncoder::default(),
            concurrency: 1,
        }
    }
}

/// Possibly incomplete tracker settings as stored by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSettings {
    pub pat: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
}

impl TrackerSettings {
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let present = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        let pat = present(&self.pat);
        let organization = present(&self.organization);
        let project = present(&self.project);

        let mut missing = Vec::new();
        if pat.is_none() {
            missing.push("pat");
        }
        if organization.is_none() {
            missing.push("organization");
        }
        if project.is_none() {
            missing.push("project");
        }

        match (pat, organization, project) {
            (Some(pat), Some(organization), Some(project)) => Ok(Credentials {
                pat,
                organization,
                project,
            }),
            _ => Err(ConfigError::Incomplete { missing }),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub pat: String,
    pub organization: String,
    pub project: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("pat", &"***")
            .field("organization", &self.organization)
            .field("project", &self.project)
            .finish()
    }
}

/// Where tracker credentials come from.
pub trait ConfigProvider {
    fn name(&self) -> &str;
    fn load(&self) -> Result<TrackerSettings, ConfigError>;

    fn save(&self, _settings: &TrackerSettings) -> Result<(), ConfigError> {
        Err(ConfigError::ReadOnly(self.name().to_string()))
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn credentials(&self) -> Result<Credentials, ConfigError> {
        self.load()?.credentials()
    }
}

/// Read-only settings taken from `ADO_*` variables, shared by every identity.
pub struct EnvConfigProvider {
    settings: TrackerSettings,
}

impl EnvConfigProvider {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            settings: TrackerSettings {
                pat: lookup(PAT_VAR),
                organization: lookup(ORGANIZATION_VAR),
                project: lookup(PROJECT_VAR),
            },
        }
    }

    fn is_present(&self) -> bool {
        let s = &self.settings;
        s.pat.is_some() || s.organization.is_some() || s.project.is_some()
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "environment"
    }

    fn load(&self) -> Result<TrackerSettings, ConfigError> {
        Ok(self.settings.clone())
    }
}

/// Per-identity settings kept in the `[profiles]` table of the config file.
pub struct PersistedConfigProvider {
    path: PathBuf,
    identity: String,
}

impl PersistedConfigProvider {
    pub fn new(path: PathBuf, identity: impl Into<String>) -> Self {
        Self {
            path,
            identity: identity.into(),
        }
    }
}

impl ConfigProvider for PersistedConfigProvider {
    fn name(&self) -> &str {
        "config file"
    }

    fn load(&self) -> Result<TrackerSettings, ConfigError> {
        let config = load_config_from(&self.path)?;
        Ok(config
            .profiles
            .get(&self.identity)
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, settings: &TrackerSettings) -> Result<(), ConfigError> {
        let mut config = load_config_from(&self.path)?;
        config
            .profiles
            .insert(self.identity.clone(), settings.clone());
        let contents = toml::to_string_pretty(&config)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        std::fs::write(&self.path, contents).map_err(|source| ConfigError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn is_writable(&self) -> bool {
        true
    }
}

/// Environment settings take over as soon as any `ADO_*` variable is set.
pub fn select_provider(identity: &str, config_path: PathBuf) -> Box<dyn ConfigProvider> {
    let env = EnvConfigProvider::from_env();
    if env.is_present() {
        tracing::debug!("using tracker settings from the environment");
        Box::new(env)
    } else {
        tracing::debug!(identity, "using tracker settings from {}", config_path.display());
        Box::new(PersistedConfigProvider::new(config_path, identity))
    }
}

/// Opaque key for per-user settings and session state.
pub fn resolve_identity(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("USER").ok())
        .or_else(|| std::env::var("USERNAME").ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "default".to_string())
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".storycase")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
