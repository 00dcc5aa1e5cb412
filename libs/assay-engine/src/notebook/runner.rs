//! Notebook execution backends.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::kernel::locate_jupyter;
use crate::error::EngineError;

const INPUT_FILE: &str = "submission.ipynb";
const OUTPUT_STEM: &str = "executed";

/// Executes an nbformat document and returns the executed document
#[async_trait]
pub trait NotebookRunner: Send + Sync {
    async fn execute(
        &self,
        notebook: &Value,
        kernel: &str,
        timeout: Duration,
    ) -> Result<Value, EngineError>;
}

/// `jupyter nbconvert --execute` in a scratch directory.
///
/// Cell errors do not abort the run (`--allow-errors`); they show up as
/// error outputs. nbconvert runs in its own process group so the kernel it
/// starts dies with it; the group is killed and the scratch directory removed
/// on every return path.
pub struct NbconvertRunner {
    command: String,
}

impl NbconvertRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// Kills a whole process group when dropped
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    leader: Option<u32>,
}

impl ProcessGroup {
    fn led_by(leader: Option<u32>) -> Self {
        Self { leader }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(leader) = self.leader {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // ESRCH once everything has already exited
            if let Err(e) = killpg(Pid::from_raw(leader as i32), Signal::SIGKILL) {
                debug!(pgid = leader, error = %e, "Process group already gone");
            }
        }
    }
}

#[async_trait]
impl NotebookRunner for NbconvertRunner {
    #[instrument(skip(self, notebook), fields(kernel = %kernel))]
    async fn execute(
        &self,
        notebook: &Value,
        kernel: &str,
        timeout: Duration,
    ) -> Result<Value, EngineError> {
        let jupyter = locate_jupyter(&self.command)?;

        let workdir = TempDir::new()?;
        let input = workdir.path().join(INPUT_FILE);
        tokio::fs::write(&input, serde_json::to_vec(notebook)?).await?;

        let mut command = Command::new(&jupyter);
        command
            .arg("nbconvert")
            .args(["--to", "notebook", "--execute", "--allow-errors"])
            .arg(format!("--ExecutePreprocessor.timeout={}", timeout.as_secs()))
            .arg(format!("--ExecutePreprocessor.kernel_name={}", kernel))
            .arg("--output")
            .arg(OUTPUT_STEM)
            .arg("--output-dir")
            .arg(workdir.path())
            .arg(&input)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        let _group = ProcessGroup::led_by(child.id());

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Notebook execution timed out");
                return Err(EngineError::Timeout(timeout.as_secs()));
            }
        };

        if !output.status.success() {
            return Err(EngineError::Backend(format!(
                "nbconvert exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let executed_path = workdir.path().join(format!("{}.ipynb", OUTPUT_STEM));
        let executed = tokio::fs::read(&executed_path).await?;
        debug!(bytes = executed.len(), "Read executed notebook");

        serde_json::from_slice(&executed)
            .map_err(|e| EngineError::Backend(format!("unreadable executed notebook: {}", e)))
    }
}
