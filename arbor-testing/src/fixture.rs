// Bundle directory fixtures

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary bundle root; removed when dropped
pub struct BundleFixture {
    _dir: TempDir,
    root: PathBuf,
}

impl BundleFixture {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        // the deployer keys bundles by canonical path
        let root = fs::canonicalize(dir.path())?;
        Ok(Self { _dir: dir, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start describing a bundle directory named `name`
    pub fn bundle(&self, name: &str, initializer: &str) -> BundleSpec {
        BundleSpec {
            dir: self.root.join(name),
            initializer: initializer.to_string(),
            settings: Vec::new(),
            libraries: Vec::new(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_dir_all(self.root.join(name))
    }
}

/// Bundle directory contents, written by [`BundleSpec::write`]
pub struct BundleSpec {
    dir: PathBuf,
    initializer: String,
    settings: Vec<(String, String)>,
    libraries: Vec<(String, Vec<u8>)>,
}

impl BundleSpec {
    /// String setting under `[settings]`
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.push((key.into(), value.into()));
        self
    }

    /// File under the bundle's `lib/` directory
    pub fn library(mut self, file_name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.libraries.push((file_name.into(), contents.into()));
        self
    }

    pub fn descriptor(&self) -> String {
        let mut text = format!("initializer = {:?}\n", self.initializer);
        if !self.settings.is_empty() {
            text.push_str("\n[settings]\n");
            for (key, value) in &self.settings {
                let _ = writeln!(text, "{} = {:?}", key, value);
            }
        }
        text
    }

    /// Write the directory; returns its path
    pub fn write(self) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        if !self.libraries.is_empty() {
            let lib = self.dir.join("lib");
            fs::create_dir_all(&lib)?;
            for (name, contents) in &self.libraries {
                fs::write(lib.join(name), contents)?;
            }
        }
        fs::write(self.dir.join("bundle.toml"), self.descriptor())?;
        Ok(self.dir)
    }
}
