// Engine configuration
// Defaults, environment overrides and JSON file loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::languages::LanguageTable;

pub const DEFAULT_SANDBOX_URL: &str = "http://localhost:2358";
pub const DEFAULT_API_KEY_HEADER: &str = "X-Auth-Token";
pub const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_NOTEBOOK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub request_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SANDBOX_URL.to_string(),
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            request_timeout_secs: DEFAULT_SANDBOX_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// File-backed datasets are resolved under this directory
    pub root: PathBuf,
    /// Named connection strings
    pub named: BTreeMap<String, String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("datasets"),
            named: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotebookConfig {
    /// Ordered kernel preference list
    pub kernel_preferences: Vec<String>,
    pub timeout_secs: u64,
    pub jupyter_command: String,
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            kernel_preferences: vec!["python3".to_string(), "python".to_string()],
            timeout_secs: DEFAULT_NOTEBOOK_TIMEOUT_SECS,
            jupyter_command: "jupyter".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sandbox: SandboxConfig,
    pub datasets: DatasetConfig,
    pub notebook: NotebookConfig,
    /// Extra word list (one word per line) for spelling checks
    pub dictionary_path: Option<PathBuf>,
    /// Sandbox language table override (languages.json format)
    pub languages_path: Option<PathBuf>,
    #[serde(skip)]
    pub languages: LanguageTable,
}

impl EngineConfig {
    /// Defaults overridden by `ASSAY_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(&lookup);
        config
    }

    fn apply_overrides<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ASSAY_SANDBOX_URL") {
            self.sandbox.url = url;
        }
        if let Some(key) = lookup("ASSAY_SANDBOX_API_KEY") {
            self.sandbox.api_key = Some(key);
        }
        if let Some(header) = lookup("ASSAY_SANDBOX_API_KEY_HEADER") {
            self.sandbox.api_key_header = header;
        }
        if let Some(secs) = lookup("ASSAY_SANDBOX_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.sandbox.request_timeout_secs = secs;
        }
        if let Some(root) = lookup("ASSAY_DATASETS_ROOT") {
            self.datasets.root = PathBuf::from(root);
        }
        if let Some(named) = lookup("ASSAY_DATASETS") {
            self.datasets.named.extend(parse_named_datasets(&named));
        }
        if let Some(kernels) = lookup("ASSAY_NOTEBOOK_KERNELS") {
            let prefs: Vec<String> = kernels
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if !prefs.is_empty() {
                self.notebook.kernel_preferences = prefs;
            }
        }
        if let Some(secs) = lookup("ASSAY_NOTEBOOK_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.notebook.timeout_secs = secs;
        }
        if let Some(cmd) = lookup("ASSAY_JUPYTER") {
            self.notebook.jupyter_command = cmd;
        }
        if let Some(path) = lookup("ASSAY_DICTIONARY") {
            self.dictionary_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("ASSAY_LANGUAGES") {
            self.languages_path = Some(PathBuf::from(path));
        }
    }

    /// Environment configuration plus the language table file, if any
    pub fn load() -> Result<Self> {
        let mut config = Self::from_env();
        config.load_languages()?;
        Ok(config)
    }

    /// Load a JSON config file, then apply environment overrides on top
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_overrides(&|key: &str| std::env::var(key).ok());
        config.load_languages()?;
        Ok(config)
    }

    fn load_languages(&mut self) -> Result<()> {
        if let Some(path) = &self.languages_path {
            self.languages = LanguageTable::load(path)
                .with_context(|| format!("Failed to load language table {}", path.display()))?;
        }
        Ok(())
    }
}

/// Parse `name=url;name=url`
fn parse_named_datasets(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|entry| {
            let (name, url) = entry.split_once('=')?;
            let (name, url) = (name.trim(), url.trim());
            if name.is_empty() || url.is_empty() {
                None
            } else {
                Some((name.to_string(), url.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config.sandbox.url, DEFAULT_SANDBOX_URL);
        assert_eq!(config.sandbox.api_key_header, DEFAULT_API_KEY_HEADER);
        assert_eq!(config.notebook.timeout_secs, 300);
        assert_eq!(config.notebook.kernel_preferences, vec!["python3", "python"]);
        assert!(config.languages.get("python").is_some());
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ASSAY_SANDBOX_URL", "http://judge:2358"),
            ("ASSAY_SANDBOX_API_KEY", "secret"),
            ("ASSAY_SANDBOX_TIMEOUT_SECS", "12"),
            ("ASSAY_DATASETS", "sales=postgres://db/sales; hr = mysql://db/hr ;broken"),
            ("ASSAY_NOTEBOOK_KERNELS", "ir, python3"),
            ("ASSAY_NOTEBOOK_TIMEOUT_SECS", "not-a-number"),
        ]));

        assert_eq!(config.sandbox.url, "http://judge:2358");
        assert_eq!(config.sandbox.api_key.as_deref(), Some("secret"));
        assert_eq!(config.sandbox.request_timeout_secs, 12);
        assert_eq!(config.datasets.named.get("sales").map(String::as_str), Some("postgres://db/sales"));
        assert_eq!(config.datasets.named.get("hr").map(String::as_str), Some("mysql://db/hr"));
        assert_eq!(config.datasets.named.len(), 2);
        assert_eq!(config.notebook.kernel_preferences, vec!["ir", "python3"]);
        // Unparseable values keep the default
        assert_eq!(config.notebook.timeout_secs, DEFAULT_NOTEBOOK_TIMEOUT_SECS);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sandbox": {{"url": "http://sandbox.internal"}}, "datasets": {{"root": "/srv/datasets"}}}}"#
        )
        .unwrap();

        let config = EngineConfig::load_file(file.path()).unwrap();
        assert_eq!(config.datasets.root, PathBuf::from("/srv/datasets"));
        assert_eq!(config.sandbox.request_timeout_secs, DEFAULT_SANDBOX_TIMEOUT_SECS);
    }

    #[test]
    fn test_load_file_missing() {
        let err = EngineConfig::load_file(Path::new("/nonexistent/assay.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
