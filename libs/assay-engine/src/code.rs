/// Code Execution Service - Remote Sandbox Orchestration
///
/// **Core Responsibility:**
/// Submit source code to the external sandboxed execution backend and judge
/// its stdout against the expected output.
///
/// **Architecture:**
/// 1. Resolve the language tag to a backend language id (no network on failure)
/// 2. Base64-encode source, stdin and expected output
/// 3. POST one synchronous submission with a bounded wait
/// 4. Decode stdout/stderr/compile output
/// 5. Compare normalized stdout with normalized expected output
///
/// **Comparison Rules:**
/// - Trim leading/trailing whitespace: YES
/// - Case sensitivity: YES (exact match required)
/// - Floating-point tolerance: NO (stdout is judged as text)
///
/// **Failure Semantics:**
/// No retries. Non-2xx responses, transport errors and timeouts are
/// reported as failure results; the caller owns resubmission.

use assay_common::config::{EngineConfig, SandboxConfig};
use assay_common::languages::LanguageTable;
use assay_common::types::{
    CodePayload, ExecutionEnvironment, ExecutionRequest, ExecutionResult, ResultPayload,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::service::ExecutionService;

/// Safety limits to prevent pathological inputs from reaching the sandbox
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Extra HTTP wait on top of the CPU limit (queueing, compilation)
const REQUEST_SLACK_SECS: u64 = 10;

/// Backend status ids that mean the sandbox itself failed
const STATUS_INTERNAL_ERROR: u32 = 13;
const STATUS_EXEC_FORMAT_ERROR: u32 = 14;

#[derive(Debug, Serialize)]
struct SubmissionRequest {
    source_code: String,
    language_id: u32,
    stdin: String,
    expected_output: String,
    cpu_time_limit: f64,
    /// Kilobytes
    memory_limit: u64,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionResponse {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    compile_output: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    time: Option<Value>,
    #[serde(default)]
    memory: Option<u64>,
    #[serde(default)]
    status: Option<SubmissionStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionStatus {
    #[serde(default)]
    id: Option<u32>,
    #[serde(default)]
    description: Option<String>,
}

/// Normalize program output for comparison
fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Trimmed exact comparison of stdout against the expected output
pub fn stdout_matches(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

fn encode(text: &str) -> String {
    general_purpose::STANDARD.encode(text)
}

/// Decode a base64 field; the backend wraps long payloads with newlines
fn decode_field(field: &str, value: Option<&str>) -> Result<String, EngineError> {
    let Some(value) = value else {
        return Ok(String::new());
    };
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| EngineError::Backend(format!("invalid base64 in {}: {}", field, e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub struct CodeExecutionService {
    sandbox: SandboxConfig,
    languages: LanguageTable,
}

impl CodeExecutionService {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            sandbox: config.sandbox.clone(),
            languages: config.languages.clone(),
        }
    }

    fn submissions_url(&self) -> String {
        format!("{}/submissions", self.sandbox.url.trim_end_matches('/'))
    }

    #[instrument(skip(self, submission), fields(language_id = submission.language_id))]
    async fn submit(
        &self,
        submission: &SubmissionRequest,
        wait: Duration,
    ) -> Result<SubmissionResponse, EngineError> {
        let client = reqwest::Client::builder().timeout(wait).build()?;

        let mut request = client
            .post(self.submissions_url())
            .query(&[("base64_encoded", "true"), ("wait", "true")])
            .json(submission);
        if let Some(key) = &self.sandbox.api_key {
            request = request.header(self.sandbox.api_key_header.as_str(), key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout(wait.as_secs())
            } else {
                EngineError::Backend(format!("sandbox request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Sandbox rejected submission");
            return Err(EngineError::Backend(format!(
                "sandbox returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let body = response.json::<SubmissionResponse>().await?;
        Ok(body)
    }
}

#[async_trait]
impl ExecutionService for CodeExecutionService {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Code
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        let source_code = request.content.as_text().ok_or_else(|| {
            EngineError::InvalidContent("code submissions must be source text".to_string())
        })?;

        let language = request.language("python");
        let config = self
            .languages
            .get(&language)
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.clone()))?;

        let stdin = request
            .options
            .stdin
            .clone()
            .or_else(|| request.testcase.input_text())
            .unwrap_or_default();
        let expected = request.testcase.expected_text().unwrap_or_default();

        // GUARDRAIL: validate input sizes before anything leaves the process
        if source_code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(EngineError::InvalidContent(format!(
                "source code exceeds maximum size of {} bytes",
                MAX_SOURCE_CODE_BYTES
            )));
        }
        if stdin.len() > MAX_STDIN_BYTES {
            return Err(EngineError::InvalidContent(format!(
                "stdin exceeds maximum size of {} bytes",
                MAX_STDIN_BYTES
            )));
        }

        let cpu_seconds = request
            .options
            .timeout
            .unwrap_or(request.testcase.timeout_seconds)
            .max(1);
        let memory_mb = request
            .testcase
            .memory_limit_mb
            .unwrap_or(config.memory_limit_mb);

        let submission = SubmissionRequest {
            source_code: encode(source_code),
            language_id: config.language_id,
            stdin: encode(&stdin),
            expected_output: encode(&expected),
            cpu_time_limit: cpu_seconds as f64,
            memory_limit: u64::from(memory_mb) * 1024,
        };

        let wait = Duration::from_secs(
            self.sandbox
                .request_timeout_secs
                .max(cpu_seconds + REQUEST_SLACK_SECS),
        );

        info!(
            language = %config.name,
            language_id = config.language_id,
            cpu_seconds = cpu_seconds,
            memory_mb = memory_mb,
            source_size = source_code.len(),
            "Submitting code to sandbox"
        );

        let response = self.submit(&submission, wait).await?;

        let status_id = response.status.as_ref().and_then(|s| s.id);
        let status = response.status.as_ref().and_then(|s| s.description.clone());
        if matches!(status_id, Some(STATUS_INTERNAL_ERROR) | Some(STATUS_EXEC_FORMAT_ERROR)) {
            let detail = decode_field("message", response.message.as_deref())?;
            return Err(EngineError::Backend(format!(
                "sandbox reported {}: {}",
                status.unwrap_or_else(|| "internal error".to_string()),
                detail.trim()
            )));
        }

        let stdout = decode_field("stdout", response.stdout.as_deref())?;
        let stderr = decode_field("stderr", response.stderr.as_deref())?;
        let compile_output = decode_field("compile_output", response.compile_output.as_deref())?;

        let passed = stdout_matches(&stdout, &expected);
        if !passed {
            debug!(
                expected = %normalize_output(&expected),
                actual = %normalize_output(&stdout),
                "Output mismatch"
            );
        }

        let payload = CodePayload {
            language: config.name.clone(),
            language_id: config.language_id,
            status,
            time: response.time.as_ref().map(assay_common::types::value_to_text),
            memory: response.memory,
            compile_output: (!compile_output.is_empty()).then_some(compile_output),
        };

        Ok(ExecutionResult::graded(passed, ResultPayload::Code(payload))
            .with_stdout(stdout)
            .with_stderr(stderr))
    }
}
