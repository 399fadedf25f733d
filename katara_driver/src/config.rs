//! Driver-wide configuration, optionally loaded from a `katara.toml` in the
//! current directory. The stdlib path and the runtime `malloc`/`free` func
//! numbers the translator links calls against are read from here rather
//! than hard-coded, since a compiler driver has no business guessing where
//! its own runtime lives.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default func number the translator resolves `RUNTIME_MALLOC_FUNC` to
/// when no `katara.toml` overrides it.
const DEFAULT_MALLOC_FUNC: i64 = -1;
const DEFAULT_FREE_FUNC: i64 = -2;

#[derive(Debug, Serialize, Deserialize)]
pub struct KataraConfig {
    /// Directory containing standard-library IR sources, required for any
    /// program that references them by path rather than inlining everything.
    #[serde(default)]
    pub stdlib_path: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_malloc_func")]
    pub malloc_func: i64,
    #[serde(default = "default_free_func")]
    pub free_func: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { malloc_func: default_malloc_func(), free_func: default_free_func() }
    }
}

fn default_malloc_func() -> i64 {
    DEFAULT_MALLOC_FUNC
}

fn default_free_func() -> i64 {
    DEFAULT_FREE_FUNC
}

impl Default for KataraConfig {
    fn default() -> Self {
        Self { stdlib_path: None, runtime: RuntimeConfig::default() }
    }
}

impl KataraConfig {
    /// Loads configuration from a file, falling back to defaults when the
    /// file does not exist at all (a missing `katara.toml` is not an error;
    /// a malformed one is).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file: {}", path.display()))?;
        let config: KataraConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse configuration file: {}", path.display()))?;
        Ok(config)
    }
}

/// The path to `katara.toml` in the given project directory.
pub fn get_config_path(project_dir: &Path) -> std::path::PathBuf {
    project_dir.join("katara.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = KataraConfig::load(Path::new("/nonexistent/katara.toml")).unwrap();
        assert_eq!(config.runtime.malloc_func, DEFAULT_MALLOC_FUNC);
        assert!(config.stdlib_path.is_none());
    }

    #[test]
    fn parses_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = get_config_path(dir.path());
        fs::write(&path, "stdlib_path = \"/opt/katara/std\"\n\n[runtime]\nmalloc_func = 100\nfree_func = 101\n").unwrap();
        let config = KataraConfig::load(&path).unwrap();
        assert_eq!(config.stdlib_path.as_deref(), Some("/opt/katara/std"));
        assert_eq!(config.runtime.malloc_func, 100);
        assert_eq!(config.runtime.free_func, 101);
    }
}
