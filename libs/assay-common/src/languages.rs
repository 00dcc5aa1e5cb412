// Sandbox language table
// Maps language tags to the remote backend's numeric language ids

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_MEMORY_LIMIT_MB: u32 = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub language_id: u32,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
}

fn default_memory_limit_mb() -> u32 {
    DEFAULT_MEMORY_LIMIT_MB
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Registry of languages the sandbox backend accepts
#[derive(Debug, Clone)]
pub struct LanguageTable {
    configs: HashMap<String, LanguageConfig>,
    aliases: HashMap<String, String>,
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LanguageTable {
    /// Built-in ids of the standard sandbox deployment
    pub fn builtin() -> Self {
        let entries: [(&str, u32, &[&str]); 15] = [
            ("python", 71, &["python3", "py"]),
            ("javascript", 63, &["js", "node"]),
            ("typescript", 74, &["ts"]),
            ("java", 62, &[]),
            ("c", 50, &[]),
            ("cpp", 54, &["c++"]),
            ("csharp", 51, &["c#", "cs"]),
            ("go", 60, &["golang"]),
            ("rust", 73, &["rs"]),
            ("ruby", 72, &["rb"]),
            ("php", 68, &[]),
            ("kotlin", 78, &["kt"]),
            ("bash", 46, &["sh", "shell"]),
            ("r", 80, &[]),
            ("sql", 82, &["sqlite"]),
        ];

        let mut table = Self {
            configs: HashMap::new(),
            aliases: HashMap::new(),
        };
        for (name, language_id, aliases) in entries {
            table.insert(LanguageConfig {
                name: name.to_string(),
                language_id,
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            });
        }
        table
    }

    /// Load language configurations from a languages.json file.
    /// Entries override the built-in table by name.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .context("Failed to read languages.json")?;

        let languages_json: LanguagesJson = serde_json::from_str(&content)
            .context("Failed to parse languages.json")?;

        let mut table = Self::builtin();
        for lang in languages_json.languages {
            table.insert(lang);
        }
        Ok(table)
    }

    pub fn insert(&mut self, config: LanguageConfig) {
        let name = config.name.to_lowercase();
        for alias in &config.aliases {
            self.aliases.insert(alias.to_lowercase(), name.clone());
        }
        self.configs.insert(name, config);
    }

    /// Look up a language by name or alias (case-insensitive)
    pub fn get(&self, tag: &str) -> Option<&LanguageConfig> {
        let tag = tag.trim().to_lowercase();
        self.configs.get(&tag).or_else(|| {
            self.aliases
                .get(&tag)
                .and_then(|name| self.configs.get(name))
        })
    }

    /// List all supported languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}
