/// Interactive Notebook Service - Kernel-Backed Notebook Grading
///
/// **Core Responsibility:**
/// Turn a loosely-shaped submission into an executable notebook, run it on a
/// suitable kernel, and check the captured outputs against the testcase.
///
/// **Pipeline:**
/// 1. Criteria parsed once from `expected_output` (invalid criteria fail
///    before anything runs)
/// 2. Document construction (`document`)
/// 3. Kernel selection (`kernel`)
/// 4. Execution under a wall-clock limit (`runner`)
/// 5. Output extraction (`outputs`) and evaluation (`criteria`)
///
/// A missing `jupyter` installation surfaces as `MissingDependency`, distinct
/// from a notebook that ran and failed.

pub mod criteria;
pub mod document;
pub mod kernel;
pub mod outputs;
pub mod runner;

use assay_common::config::EngineConfig;
use assay_common::types::{
    ExecutionEnvironment, ExecutionRequest, ExecutionResult, NotebookPayload, ResultPayload,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::equivalence::DEFAULT_TOLERANCE;
use crate::error::EngineError;
use crate::service::ExecutionService;

use self::criteria::ExpectedCriteria;
use self::document::NotebookDocument;
use self::kernel::{select_kernel, JupyterKernels, KernelCatalog, KernelSpec};
use self::runner::{NbconvertRunner, NotebookRunner};

const DEFAULT_INTERPRETER: &str = "python";

pub struct NotebookService {
    catalog: Arc<dyn KernelCatalog>,
    runner: Arc<dyn NotebookRunner>,
    kernel_preferences: Vec<String>,
    default_timeout_secs: u64,
}

impl NotebookService {
    pub fn new(config: &EngineConfig) -> Self {
        let command = config.notebook.jupyter_command.clone();
        Self::with_backends(
            config,
            Arc::new(JupyterKernels::new(command.clone())),
            Arc::new(NbconvertRunner::new(command)),
        )
    }

    /// Service over custom kernel discovery and execution backends
    pub fn with_backends(
        config: &EngineConfig,
        catalog: Arc<dyn KernelCatalog>,
        runner: Arc<dyn NotebookRunner>,
    ) -> Self {
        Self {
            catalog,
            runner,
            kernel_preferences: config.notebook.kernel_preferences.clone(),
            default_timeout_secs: config.notebook.timeout_secs,
        }
    }

    pub async fn installed_kernels(&self) -> Result<Vec<KernelSpec>, EngineError> {
        self.catalog.installed().await
    }

    /// Kernel that would run a notebook for `interpreter`
    pub async fn select_kernel(&self, interpreter: &str) -> Result<String, EngineError> {
        let installed = self.catalog.installed().await?;
        select_kernel(&installed, &self.kernel_preferences, interpreter)
    }
}

#[async_trait]
impl ExecutionService for NotebookService {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Notebook
    }

    #[instrument(skip(self, request))]
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        let criteria = ExpectedCriteria::parse(request.testcase.expected_output.as_ref())?;
        let document = NotebookDocument::parse(&request.content)?;

        let interpreter = request.language(DEFAULT_INTERPRETER);
        let kernel = self.select_kernel(&interpreter).await?;

        let timeout_secs = request.options.timeout.unwrap_or(self.default_timeout_secs).max(1);
        info!(
            kernel = %kernel,
            cells = document.cells.len(),
            code_cells = document.code_cell_count(),
            timeout_secs = timeout_secs,
            "Executing notebook"
        );

        let executed = self
            .runner
            .execute(
                &document.to_nbformat(&kernel),
                &kernel,
                Duration::from_secs(timeout_secs),
            )
            .await?;

        let extracted = outputs::extract(&executed);
        let passed = criteria.evaluate(&extracted, request.tolerance(DEFAULT_TOLERANCE));

        let payload = NotebookPayload {
            kernel,
            cell_count: document.cells.len(),
            outputs: extracted.outputs.clone(),
            prints: extracted.prints.clone(),
            final_result: extracted.final_result.clone(),
            errors: extracted.errors.clone(),
        };

        Ok(ExecutionResult::graded(passed, ResultPayload::Notebook(payload))
            .with_stdout(extracted.stdout)
            .with_stderr(extracted.stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_common::types::{ExecutionOptions, SubmissionContent, Testcase};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct FixedCatalog(Vec<&'static str>);

    #[async_trait]
    impl KernelCatalog for FixedCatalog {
        async fn installed(&self) -> Result<Vec<KernelSpec>, EngineError> {
            Ok(self.0.iter().map(|name| KernelSpec::named(*name)).collect())
        }
    }

    /// Replays canned outputs for each code cell and records what it ran
    struct ScriptedRunner {
        outputs: Vec<Value>,
        seen: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                outputs,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotebookRunner for ScriptedRunner {
        async fn execute(
            &self,
            notebook: &Value,
            kernel: &str,
            _timeout: Duration,
        ) -> Result<Value, EngineError> {
            self.seen
                .lock()
                .unwrap()
                .push((kernel.to_string(), notebook.clone()));
            let mut executed = notebook.clone();
            executed["cells"][0]["outputs"] = Value::Array(self.outputs.clone());
            Ok(executed)
        }
    }

    struct FailingRunner(EngineError);

    #[async_trait]
    impl NotebookRunner for FailingRunner {
        async fn execute(&self, _: &Value, _: &str, _: Duration) -> Result<Value, EngineError> {
            Err(self.0.clone())
        }
    }

    fn service(kernels: Vec<&'static str>, runner: Arc<dyn NotebookRunner>) -> NotebookService {
        NotebookService::with_backends(
            &EngineConfig::default(),
            Arc::new(FixedCatalog(kernels)),
            runner,
        )
    }

    fn stdout(text: &str) -> Value {
        json!({"output_type": "stream", "name": "stdout", "text": text})
    }

    fn execute_result(text: &str) -> Value {
        json!({"output_type": "execute_result", "data": {"text/plain": text}, "metadata": {}})
    }

    fn request(content: impl Into<SubmissionContent>, expected: Value) -> ExecutionRequest {
        ExecutionRequest::new(
            content,
            Testcase {
                expected_output: Some(expected),
                ..Testcase::default()
            },
        )
    }

    #[tokio::test]
    async fn test_checks_conjunction_passes() {
        let runner = ScriptedRunner::new(vec![stdout("hello\n"), stdout("done\n"), execute_result("42")]);
        let service = service(vec!["python3"], runner.clone());

        let result = service
            .execute(&request(
                "print('hello')\nprint('done')\n6 * 7",
                json!({
                    "expected_final_result": "42",
                    "expected_prints": ["hello"],
                    "must_contain": ["done"]
                }),
            ))
            .await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.passed);
        assert_eq!(result.stdout.as_deref(), Some("hello\ndone\n"));
        match &result.payload {
            ResultPayload::Notebook(payload) => {
                assert_eq!(payload.kernel, "python3");
                assert_eq!(payload.final_result.as_deref(), Some("42"));
                assert_eq!(payload.prints, vec!["hello", "done"]);
                assert_eq!(payload.cell_count, 1);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].0, "python3");
        assert_eq!(seen[0].1["metadata"]["kernelspec"]["name"], "python3");
    }

    #[tokio::test]
    async fn test_checks_conjunction_fails_on_one_miss() {
        let runner = ScriptedRunner::new(vec![stdout("hello\n"), execute_result("42")]);
        let service = service(vec!["python3"], runner);

        let result = service
            .execute(&request(
                "print('hello')\n6 * 7",
                json!({
                    "expected_final_result": "42",
                    "expected_prints": ["computing..."]
                }),
            ))
            .await;

        assert!(result.success);
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn test_printed_value_satisfies_result_expectation() {
        let runner = ScriptedRunner::new(vec![stdout("8\n")]);
        let service = service(vec!["python3"], runner);

        let result = service
            .execute(&request(
                "print(5 + 3)",
                json!({"output_type": "execute_result", "data": {"text/plain": "8"}}),
            ))
            .await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_no_kernel_is_configuration_failure() {
        let service = service(vec!["julia-1.10"], ScriptedRunner::new(vec![]));
        let result = service.execute(&request("1 + 1", json!(2))).await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("No kernel available"));
    }

    #[tokio::test]
    async fn test_invalid_criteria_fails_before_running() {
        let runner = ScriptedRunner::new(vec![stdout("8\n")]);
        let service = service(vec!["python3"], runner.clone());

        let result = service
            .execute(&request("print(8)", json!({"output_type": "hologram"})))
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("hologram"));
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runner_timeout_is_failure() {
        let service = service(
            vec!["python3"],
            Arc::new(FailingRunner(EngineError::Timeout(300))),
        );
        let result = service.execute(&request("while True: pass", json!("x"))).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Execution timed out after 300s"));
    }

    #[tokio::test]
    async fn test_language_option_selects_kernel() {
        let runner = ScriptedRunner::new(vec![stdout("[1] 3\n")]);
        let service = service(vec!["python3", "ir"], runner.clone());

        let request = request("cat(1 + 2)", json!("[1] 3")).with_options(ExecutionOptions {
            language: Some("ir".to_string()),
            ..ExecutionOptions::default()
        });
        let result = service.execute(&request).await;

        assert!(result.passed, "{:?}", result);
        assert_eq!(runner.seen.lock().unwrap()[0].0, "ir");
    }

    #[tokio::test]
    async fn test_empty_submission_is_invalid() {
        let service = service(vec!["python3"], ScriptedRunner::new(vec![]));
        let result = service.execute(&request("   ", json!("x"))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Invalid content"));
    }

    #[tokio::test]
    #[ignore] // Requires a local Jupyter installation with a python3 kernel
    async fn test_real_jupyter_round_trip() {
        let service = NotebookService::new(&EngineConfig::default());
        let result = service
            .execute(&request(
                json!({"cells": [{"cell_type": "code", "source": "x = 5 + 3\nx"}]}),
                json!({"output_type": "stream", "text": "8"}),
            ))
            .await;
        assert!(result.passed, "{:?}", result);
    }
}
