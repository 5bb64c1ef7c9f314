// Configuration management for the Arbor dispatch engine

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::{DEFAULT_PREFIX, EnvLoader, apply_overrides};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use arbor_core::logging::{LogConfig, LogFormat, LogLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Router settings (`[router]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Segment that short-circuits resolution into help
    pub help_keyword: String,
    /// Bound on nested forwards within one request
    pub max_forwards: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            help_keyword: "help".to_string(),
            max_forwards: 16,
        }
    }
}

/// Deployer settings (`[deploy]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Watch and scan the bundle root at all
    pub enabled: bool,
    /// Directory whose subdirectories are bundles
    pub root: PathBuf,
    /// Descriptor file name inside each bundle
    pub descriptor: String,
    /// Bundle-local library directory
    pub library_dir: String,
    /// Quiet period after a file system event before reconciling
    pub debounce_ms: u64,
    /// Deploy existing bundles when the engine starts
    pub scan_on_start: bool,
}

impl DeploySettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("bundles"),
            descriptor: "bundle.toml".to_string(),
            library_dir: "lib".to_string(),
            debounce_ms: 250,
            scan_on_start: true,
        }
    }
}

/// Logging settings (`[log]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: String,
    /// Directive string; overrides `level` when set
    pub filter: Option<String>,
}

impl LogSettings {
    /// Build the subscriber configuration
    pub fn to_log_config(&self) -> Result<LogConfig> {
        let level: LogLevel = self
            .level
            .parse()
            .map_err(|_| ConfigError::invalid("log.level", format!("unknown level `{}`", self.level)))?;
        let format: LogFormat = self.format.parse().map_err(|_| {
            ConfigError::invalid("log.format", format!("unknown format `{}`", self.format))
        })?;

        let mut config = LogConfig::new().level(level).format(format);
        if let Some(filter) = &self.filter {
            config = config.with_env_filter(filter.clone());
        }
        Ok(config)
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            filter: None,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub router: RouterSettings,
    pub deploy: DeploySettings,
    pub log: LogSettings,
}

impl EngineConfig {
    /// Build from a parsed configuration tree; missing keys take defaults
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }

    /// Parse configuration text in the given format
    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        let parsed = ConfigLoader::new(format).parse(content)?;
        let value = match format {
            FileFormat::Env => env_to_tree(&parsed)?,
            FileFormat::Json | FileFormat::Toml => parsed,
        };
        Self::from_value(value)
    }

    /// Load a file, format chosen from its name
    pub fn from_file(path: &Path) -> Result<Self> {
        let loader = ConfigLoader::auto(path)?;
        let parsed = loader.load_file(path)?;
        let value = match loader.format() {
            FileFormat::Env => env_to_tree(&parsed)?,
            FileFormat::Json | FileFormat::Toml => parsed,
        };
        Self::from_value(value)
    }

    /// Defaults, then `path` (if any), then `ARBOR_*` variables, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(&EnvLoader::default())?;
        config.validate()?;
        tracing::debug!(?path, "configuration loaded");
        Ok(config)
    }

    /// Apply the variables `loader` finds in the process environment
    pub fn with_overrides(self, loader: &EnvLoader) -> Result<Self> {
        self.with_pairs(loader.load())
    }

    /// Apply `section.key` overrides
    pub fn with_pairs(
        self,
        overrides: std::collections::BTreeMap<String, String>,
    ) -> Result<Self> {
        if overrides.is_empty() {
            return Ok(self);
        }
        let mut value =
            serde_json::to_value(&self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        apply_overrides(&mut value, &overrides)?;
        Self::from_value(value)
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_segment(&self.router.help_keyword, "router.help_keyword")?;
        ConfigValidator::in_range(self.router.max_forwards, 1, 1024, "router.max_forwards")?;
        ConfigValidator::is_segment(&self.deploy.descriptor, "deploy.descriptor")?;
        ConfigValidator::is_segment(&self.deploy.library_dir, "deploy.library_dir")?;
        if self.deploy.debounce_ms == 0 {
            return Err(ConfigError::invalid("deploy.debounce_ms", "must be positive"));
        }
        ConfigValidator::one_of(
            &self.log.format,
            &["json", "plain", "text", "pretty", "compact"],
            "log.format",
        )?;
        self.log.to_log_config().map(|_| ())
    }
}

fn env_to_tree(flat: &Value) -> Result<Value> {
    let loader = EnvLoader::default();
    let pairs = flat
        .as_object()
        .map(|map| {
            loader.collect(
                map.iter()
                    .filter_map(|(k, v)| Some((k.as_str(), v.as_str()?.to_string()))),
            )
        })
        .unwrap_or_default();

    let mut tree = serde_json::to_value(EngineConfig::default())
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;
    apply_overrides(&mut tree, &pairs)?;
    Ok(tree)
}
