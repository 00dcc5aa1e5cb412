//! Kernel discovery and selection.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::EngineError;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSpec {
    pub name: String,
    pub language: Option<String>,
    pub display_name: Option<String>,
}

impl KernelSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: None,
            display_name: None,
        }
    }

    fn serves(&self, interpreter: &str) -> bool {
        self.name.to_lowercase().contains(interpreter)
            || self
                .language
                .as_deref()
                .is_some_and(|lang| lang.eq_ignore_ascii_case(interpreter))
    }
}

/// Source of installed kernels
#[async_trait]
pub trait KernelCatalog: Send + Sync {
    async fn installed(&self) -> Result<Vec<KernelSpec>, EngineError>;
}

/// Locate the `jupyter` executable, distinguishing "not installed" from
/// execution failures
pub fn locate_jupyter(command: &str) -> Result<PathBuf, EngineError> {
    which::which(command).map_err(|e| EngineError::MissingDependency {
        dependency: command.to_string(),
        message: e.to_string(),
    })
}

/// Installed kernels as reported by `jupyter kernelspec list --json`
pub struct JupyterKernels {
    command: String,
}

impl JupyterKernels {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KernelspecList {
    kernelspecs: BTreeMap<String, KernelspecEntry>,
}

#[derive(Debug, Deserialize)]
struct KernelspecEntry {
    #[serde(default)]
    spec: Option<KernelspecBody>,
}

#[derive(Debug, Deserialize)]
struct KernelspecBody {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

/// Parse the JSON printed by `jupyter kernelspec list --json`
pub fn parse_kernelspec_list(json: &str) -> Result<Vec<KernelSpec>, EngineError> {
    let list: KernelspecList = serde_json::from_str(json)
        .map_err(|e| EngineError::Backend(format!("unreadable kernelspec list: {}", e)))?;

    Ok(list
        .kernelspecs
        .into_iter()
        .map(|(name, entry)| {
            let (language, display_name) = match entry.spec {
                Some(spec) => (spec.language, spec.display_name),
                None => (None, None),
            };
            KernelSpec {
                name,
                language,
                display_name,
            }
        })
        .collect())
}

#[async_trait]
impl KernelCatalog for JupyterKernels {
    async fn installed(&self) -> Result<Vec<KernelSpec>, EngineError> {
        let jupyter = locate_jupyter(&self.command)?;

        let child = Command::new(&jupyter)
            .args(["kernelspec", "list", "--json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(DISCOVERY_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| EngineError::Timeout(DISCOVERY_TIMEOUT.as_secs()))??;

        if !output.status.success() {
            return Err(EngineError::Backend(format!(
                "kernelspec list exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let kernels = parse_kernelspec_list(&String::from_utf8_lossy(&output.stdout))?;
        debug!(count = kernels.len(), "Discovered kernels");
        Ok(kernels)
    }
}

/// Pick the kernel for `interpreter`.
///
/// Preferences are honored in order when installed and able to serve the
/// interpreter; otherwise the first installed kernel serving it wins.
pub fn select_kernel(
    installed: &[KernelSpec],
    preferences: &[String],
    interpreter: &str,
) -> Result<String, EngineError> {
    let interpreter = interpreter.trim().to_lowercase();

    let preferred = preferences.iter().find_map(|pref| {
        installed
            .iter()
            .find(|k| k.name.eq_ignore_ascii_case(pref) && k.serves(&interpreter))
    });

    preferred
        .or_else(|| installed.iter().find(|k| k.serves(&interpreter)))
        .map(|k| k.name.clone())
        .ok_or_else(|| EngineError::NoKernelAvailable {
            interpreter,
            installed: installed.iter().map(|k| k.name.clone()).collect(),
        })
}
