// Bundle descriptor (`bundle.toml`)

use arbor_core::{Error, Result, codes};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;

/// Contents of a bundle's descriptor file.
///
/// ```toml
/// initializer = "reports.bundle"
/// name = "reports"
///
/// [settings]
/// mount = "/reports"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BundleDescriptor {
    /// Fully-qualified name of the one-shot initializer
    pub initializer: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Free-form values the initializer can read through its context
    #[serde(default)]
    pub settings: toml::Table,
}

impl BundleDescriptor {
    /// Read `file_name` inside the bundle directory `dir`
    pub fn load(dir: &Path, file_name: &str) -> Result<Self> {
        let path = dir.join(file_name);
        let content = fs::read_to_string(&path).map_err(|e| {
            let code = match e.kind() {
                io::ErrorKind::NotFound => codes::DESCRIPTOR_MISSING,
                _ => codes::DESCRIPTOR_INVALID,
            };
            Error::new(code, format!("cannot read {}: {}", path.display(), e))
                .with_data("path", path.display().to_string())
                .with_source(e)
        })?;

        Self::parse(&content).map_err(|e| e.with_data("path", path.display().to_string()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let descriptor: Self = toml::from_str(content).map_err(|e| {
            Error::new(codes::DESCRIPTOR_INVALID, format!("malformed descriptor: {}", e))
                .with_source(e)
        })?;

        if descriptor.initializer.trim().is_empty() {
            return Err(Error::new(
                codes::DESCRIPTOR_INVALID,
                "descriptor names no initializer",
            ));
        }
        Ok(descriptor)
    }

    /// Display name; falls back to the initializer name
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.initializer)
    }
}
