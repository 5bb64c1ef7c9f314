// Environment variable overrides

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::env;

/// Default prefix of engine variables (`ARBOR_DEPLOY_ROOT`, ...)
pub const DEFAULT_PREFIX: &str = "ARBOR";

/// Maps prefixed environment variables onto configuration keys.
///
/// `ARBOR_ROUTER_HELP_KEYWORD=info` overrides `router.help_keyword`: the first
/// token after the prefix names the section, the rest is the key.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().to_uppercase(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Load every prefixed variable of the process, keyed `section.key`
    pub fn load(&self) -> BTreeMap<String, String> {
        self.collect(env::vars())
    }

    /// Load `.env` into the process environment, then [`load`](Self::load)
    pub fn load_dotenv(&self, path: Option<&str>) -> Result<BTreeMap<String, String>> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                // A missing .env is not an error
                dotenvy::dotenv().ok();
            }
        }
        Ok(self.load())
    }

    /// Filter and map arbitrary `(NAME, value)` pairs
    pub fn collect<I, K, V>(&self, vars: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        vars.into_iter()
            .filter_map(|(name, value)| Some((self.key_for(name.as_ref())?, value.into())))
            .collect()
    }

    /// `ARBOR_DEPLOY_DEBOUNCE_MS` -> `deploy.debounce_ms`
    pub fn key_for(&self, name: &str) -> Option<String> {
        let rest = name
            .to_uppercase()
            .strip_prefix(&self.prefix)?
            .strip_prefix('_')?
            .to_lowercase();
        let (section, key) = rest.split_once('_')?;
        if section.is_empty() || key.is_empty() {
            return None;
        }
        Some(format!("{}.{}", section, key))
    }

    /// Look up one variable by its configuration key
    pub fn load_var(&self, key: &str) -> Result<String> {
        let name = format!("{}_{}", self.prefix, key.replace('.', "_").to_uppercase());
        env::var(&name).map_err(ConfigError::EnvError)
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

/// Write `section.key = raw` overrides into a configuration object.
///
/// Raw strings are coerced to booleans or integers when they parse as such.
pub fn apply_overrides(target: &mut Value, overrides: &BTreeMap<String, String>) -> Result<()> {
    let root = object_mut(target, "<root>")?;

    for (path, raw) in overrides {
        let Some((section, key)) = path.split_once('.') else {
            continue;
        };
        let section_value = root
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        object_mut(section_value, section)?.insert(key.to_string(), coerce(raw));
        tracing::debug!(setting = %path, "configuration overridden from environment");
    }
    Ok(())
}

fn object_mut<'a>(value: &'a mut Value, name: &str) -> Result<&'a mut Map<String, Value>> {
    value
        .as_object_mut()
        .ok_or_else(|| ConfigError::invalid(name, "expected a table"))
}

fn coerce(raw: &str) -> Value {
    match raw.trim() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        trimmed => trimmed
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}
