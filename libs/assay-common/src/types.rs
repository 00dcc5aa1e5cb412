use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default per-testcase time budget when the author does not set one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Execution/validation backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEnvironment {
    #[serde(alias = "judge", alias = "programming", alias = "python")]
    Code,
    #[serde(alias = "query", alias = "relational")]
    Sql,
    #[serde(alias = "jupyter", alias = "ipynb")]
    Notebook,
    #[serde(alias = "chart", alias = "dataviz")]
    Visualization,
    #[serde(alias = "stats", alias = "statistical")]
    Statistics,
    #[serde(alias = "uml")]
    Diagram,
    #[serde(alias = "text", alias = "writing")]
    Document,
    #[serde(alias = "accounting", alias = "excel")]
    Spreadsheet,
}

impl ExecutionEnvironment {
    pub const ALL: [ExecutionEnvironment; 8] = [
        ExecutionEnvironment::Code,
        ExecutionEnvironment::Sql,
        ExecutionEnvironment::Notebook,
        ExecutionEnvironment::Visualization,
        ExecutionEnvironment::Statistics,
        ExecutionEnvironment::Diagram,
        ExecutionEnvironment::Document,
        ExecutionEnvironment::Spreadsheet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionEnvironment::Code => "code",
            ExecutionEnvironment::Sql => "sql",
            ExecutionEnvironment::Notebook => "notebook",
            ExecutionEnvironment::Visualization => "visualization",
            ExecutionEnvironment::Statistics => "statistics",
            ExecutionEnvironment::Diagram => "diagram",
            ExecutionEnvironment::Document => "document",
            ExecutionEnvironment::Spreadsheet => "spreadsheet",
        }
    }

    /// Parse an environment tag as stored on testcase records (case-insensitive)
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "code" | "judge" | "programming" | "python" => Some(ExecutionEnvironment::Code),
            "sql" | "query" | "relational" => Some(ExecutionEnvironment::Sql),
            "notebook" | "jupyter" | "ipynb" => Some(ExecutionEnvironment::Notebook),
            "visualization" | "chart" | "dataviz" => Some(ExecutionEnvironment::Visualization),
            "statistics" | "stats" | "statistical" => Some(ExecutionEnvironment::Statistics),
            "diagram" | "uml" => Some(ExecutionEnvironment::Diagram),
            "document" | "text" | "writing" => Some(ExecutionEnvironment::Document),
            "spreadsheet" | "accounting" | "excel" => Some(ExecutionEnvironment::Spreadsheet),
            _ => None,
        }
    }
}

impl FromStr for ExecutionEnvironment {
    type Err = String;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Self::from_tag(tag).ok_or_else(|| format!("unknown environment '{}'", tag))
    }
}

impl fmt::Display for ExecutionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a JSON value as the text a candidate would have produced.
///
/// Strings are taken verbatim, `null` renders as `null`, everything else as
/// its compact JSON form.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Exercise testcase as authored upstream. Read-only for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Testcase {
    #[serde(default)]
    pub testcase_type: Option<String>,
    #[serde(default)]
    pub input_data: Option<Value>,
    #[serde(default)]
    pub expected_output: Option<Value>,
    #[serde(default)]
    pub dataset_reference: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub memory_limit_mb: Option<u32>,
    #[serde(default)]
    pub numerical_tolerance: Option<f64>,
    #[serde(default)]
    pub expected_visualization: Option<Value>,
    #[serde(default)]
    pub statistical_assertions: Option<Map<String, Value>>,
    #[serde(default)]
    pub expected_document_structure: Option<Value>,
    #[serde(default)]
    pub expected_financial_result: Option<Value>,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Default for Testcase {
    fn default() -> Self {
        Self {
            testcase_type: None,
            input_data: None,
            expected_output: None,
            dataset_reference: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            memory_limit_mb: None,
            numerical_tolerance: None,
            expected_visualization: None,
            statistical_assertions: None,
            expected_document_structure: None,
            expected_financial_result: None,
        }
    }
}

impl Testcase {
    /// Testcase subtype, lower-cased, if the author declared one
    pub fn subtype(&self) -> Option<String> {
        self.testcase_type
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
    }

    /// `input_data` as text, when it is textual input (stdin-like)
    pub fn input_text(&self) -> Option<String> {
        match &self.input_data {
            None | Some(Value::Null) => None,
            Some(Value::Object(_)) => None,
            Some(v) => Some(value_to_text(v)),
        }
    }

    pub fn expected_text(&self) -> Option<String> {
        match &self.expected_output {
            None | Some(Value::Null) => None,
            Some(v) => Some(value_to_text(v)),
        }
    }
}

/// The candidate's artifact under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmissionContent {
    Text(String),
    Structured(Value),
}

impl SubmissionContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SubmissionContent::Text(s) => Some(s),
            SubmissionContent::Structured(Value::String(s)) => Some(s),
            SubmissionContent::Structured(_) => None,
        }
    }

    /// Text form of the content; structured content is serialized
    pub fn to_text(&self) -> String {
        match self {
            SubmissionContent::Text(s) => s.clone(),
            SubmissionContent::Structured(v) => value_to_text(v),
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            SubmissionContent::Text(s) => s.len(),
            SubmissionContent::Structured(v) => v.to_string().len(),
        }
    }
}

impl From<&str> for SubmissionContent {
    fn from(s: &str) -> Self {
        SubmissionContent::Text(s.to_string())
    }
}

impl From<String> for SubmissionContent {
    fn from(s: String) -> Self {
        SubmissionContent::Text(s)
    }
}

impl From<Value> for SubmissionContent {
    fn from(v: Value) -> Self {
        SubmissionContent::Structured(v)
    }
}

/// Per-call knobs supplied by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOptions {
    #[serde(default)]
    pub language: Option<String>,
    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub numerical_tolerance: Option<f64>,
    #[serde(default)]
    pub stdin: Option<String>,
}

/// Caller contract: one submission graded against one testcase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub content: SubmissionContent,
    #[serde(default)]
    pub testcase: Testcase,
    #[serde(default)]
    pub options: ExecutionOptions,
}

impl ExecutionRequest {
    pub fn new(content: impl Into<SubmissionContent>, testcase: Testcase) -> Self {
        Self {
            content: content.into(),
            testcase,
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Tolerance precedence: call options, then testcase, then `default`
    pub fn tolerance(&self, default: f64) -> f64 {
        let valid = |t: &f64| t.is_finite() && *t >= 0.0;
        self.options
            .numerical_tolerance
            .filter(valid)
            .or(self.testcase.numerical_tolerance.filter(valid))
            .unwrap_or(default)
    }

    pub fn language(&self, default: &str) -> String {
        self.options
            .language
            .clone()
            .unwrap_or_else(|| default.to_string())
            .to_lowercase()
    }
}

/// Uniform result envelope returned by every environment
///
/// `success=false` means the engine could not grade the submission;
/// `success=true, passed=false` means the submission is wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub payload: ResultPayload,
    pub metadata: ResultMetadata,
}

impl ExecutionResult {
    /// The submission was evaluated; `passed` carries the verdict
    pub fn graded(passed: bool, payload: ResultPayload) -> Self {
        Self {
            success: true,
            passed,
            error: None,
            stdout: None,
            stderr: None,
            payload,
            metadata: ResultMetadata::default(),
        }
    }

    /// The engine could not evaluate the submission
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            passed: false,
            error: Some(error.into()),
            stdout: None,
            stderr: None,
            payload: ResultPayload::None,
            metadata: ResultMetadata::default(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        if !stderr.is_empty() {
            self.stderr = Some(stderr);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(default)]
    pub environment: Option<ExecutionEnvironment>,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Default for ResultMetadata {
    fn default() -> Self {
        Self {
            environment: None,
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

/// Environment-specific diagnostic payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPayload {
    None,
    Code(CodePayload),
    Query(QueryPayload),
    Notebook(NotebookPayload),
    Visualization(ChecksPayload),
    Statistics(ChecksPayload),
    Diagram(DiagramPayload),
    Document(DocumentPayload),
    Spreadsheet(SpreadsheetPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodePayload {
    pub language: String,
    pub language_id: u32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    /// Kilobytes, as reported by the sandbox
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookPayload {
    pub kernel: String,
    pub cell_count: usize,
    pub outputs: Vec<OutputItem>,
    pub prints: Vec<String>,
    #[serde(default)]
    pub final_result: Option<String>,
    pub errors: Vec<String>,
}

/// Outcome of one named assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl CheckOutcome {
    pub fn new(name: impl Into<String>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
            expected: None,
            actual: None,
        }
    }

    pub fn compared(
        name: impl Into<String>,
        passed: bool,
        expected: impl Into<String>,
        actual: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed,
            expected: Some(expected.into()),
            actual,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChecksPayload {
    pub checks: Vec<CheckOutcome>,
}

impl ChecksPayload {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramPayload {
    pub requires_manual_review: bool,
    pub element_count: usize,
    pub has_title: bool,
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meets_minimum_elements: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub check: String,
    pub word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub found_elements: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_elements: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpreadsheetPayload {
    pub check: String,
    pub checks: Vec<CheckOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_rate: Option<f64>,
}

/// One notebook cell output, in execution order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum OutputItem {
    Stream {
        name: String,
        text: String,
    },
    Result {
        data: BTreeMap<String, String>,
    },
    Display {
        data: BTreeMap<String, String>,
    },
    Error {
        name: String,
        message: String,
        trace: Vec<String>,
    },
}

impl OutputItem {
    /// `text/plain` representation of a result/display output
    pub fn plain_text(&self) -> Option<&str> {
        match self {
            OutputItem::Result { data } | OutputItem::Display { data } => {
                data.get("text/plain").map(String::as_str)
            }
            _ => None,
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self, OutputItem::Stream { name, .. } if name == "stdout")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_environment_tags() {
        assert_eq!(ExecutionEnvironment::from_tag("SQL"), Some(ExecutionEnvironment::Sql));
        assert_eq!(ExecutionEnvironment::from_tag(" jupyter "), Some(ExecutionEnvironment::Notebook));
        assert_eq!(ExecutionEnvironment::from_tag("accounting"), Some(ExecutionEnvironment::Spreadsheet));
        assert_eq!(ExecutionEnvironment::from_tag("cobol"), None);

        for env in ExecutionEnvironment::ALL {
            assert_eq!(ExecutionEnvironment::from_tag(&env.to_string()), Some(env));
        }
        assert_eq!("stats".parse::<ExecutionEnvironment>(), Ok(ExecutionEnvironment::Statistics));
        assert!("cobol".parse::<ExecutionEnvironment>().is_err());
    }

    #[test]
    fn test_environment_serde_aliases() {
        let env: ExecutionEnvironment = serde_json::from_value(json!("chart")).unwrap();
        assert_eq!(env, ExecutionEnvironment::Visualization);
        assert_eq!(serde_json::to_value(ExecutionEnvironment::Sql).unwrap(), json!("sql"));
    }

    #[test]
    fn test_testcase_defaults() {
        let tc: Testcase = serde_json::from_value(json!({"expected_output": 8})).unwrap();
        assert_eq!(tc.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(tc.expected_text().as_deref(), Some("8"));
        assert!(tc.input_text().is_none());
    }

    #[test]
    fn test_request_content_untagged() {
        let req: ExecutionRequest = serde_json::from_value(json!({
            "content": "print(5+3)",
            "testcase": {"expected_output": "8"}
        }))
        .unwrap();
        assert_eq!(req.content.as_text(), Some("print(5+3)"));

        let req: ExecutionRequest = serde_json::from_value(json!({
            "content": {"cells": []}
        }))
        .unwrap();
        assert!(matches!(req.content, SubmissionContent::Structured(_)));
    }

    #[test]
    fn test_tolerance_precedence() {
        let mut req = ExecutionRequest::new("x", Testcase::default());
        assert_eq!(req.tolerance(0.001), 0.001);
        req.testcase.numerical_tolerance = Some(0.5);
        assert_eq!(req.tolerance(0.001), 0.5);
        req.options.numerical_tolerance = Some(0.1);
        assert_eq!(req.tolerance(0.001), 0.1);
        req.options.numerical_tolerance = Some(-1.0);
        assert_eq!(req.tolerance(0.001), 0.5);
    }

    #[test]
    fn test_output_item_serialization() {
        let item = OutputItem::Stream {
            name: "stdout".to_string(),
            text: "8\n".to_string(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["output_type"], "stream");
        assert!(item.is_stdout());
    }

    #[test]
    fn test_failure_is_not_success() {
        let result = ExecutionResult::failure("backend down");
        assert!(!result.success);
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("backend down"));
    }
}
