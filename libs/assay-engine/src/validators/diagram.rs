/// Diagram Validator - Structural Metadata for Human Review
///
/// **Critical Properties:**
/// - Never fails a submission automatically: `passed = true` on every
///   readable artifact
/// - Always sets `requires_manual_review`
/// - Records element count, title presence and size so reviewers can triage
///
/// A declared `min_elements` is reported as advisory only.

use assay_common::types::{
    DiagramPayload, ExecutionEnvironment, ExecutionRequest, ExecutionResult, ResultPayload,
    SubmissionContent,
};
use async_trait::async_trait;
use serde_json::Value;

use super::{numeric, parse_structured};
use crate::error::EngineError;
use crate::service::ExecutionService;

const ELEMENT_KEYS: [&str; 4] = ["elements", "nodes", "shapes", "edges"];

#[derive(Debug, Default, Clone, Copy)]
pub struct DiagramValidator;

impl DiagramValidator {
    pub fn new() -> Self {
        Self
    }
}

fn structured_elements(diagram: &Value) -> usize {
    match diagram {
        Value::Array(items) => items.len(),
        Value::Object(map) => ELEMENT_KEYS
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_array))
            .map(Vec::len)
            .sum(),
        _ => 0,
    }
}

fn structured_title(diagram: &Value) -> bool {
    diagram
        .get("title")
        .and_then(Value::as_str)
        .is_some_and(|title| !title.trim().is_empty())
}

fn text_title(text: &str) -> bool {
    text.lines().map(str::trim).any(|line| {
        let lower = line.to_lowercase();
        lower.starts_with("title ") || lower.starts_with("title:") || line.starts_with("# ")
    })
}

/// Element count and title presence of a diagram submission
pub fn describe(content: &SubmissionContent) -> (usize, bool) {
    match parse_structured(content) {
        Some(diagram) => (structured_elements(&diagram), structured_title(&diagram)),
        None => {
            let text = content.to_text();
            let elements = text.lines().filter(|line| !line.trim().is_empty()).count();
            (elements, text_title(&text))
        }
    }
}

#[async_trait]
impl ExecutionService for DiagramValidator {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Diagram
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        let (element_count, has_title) = describe(&request.content);

        let meets_minimum_elements = request
            .testcase
            .expected_document_structure
            .as_ref()
            .and_then(|rules| rules.get("min_elements"))
            .and_then(numeric)
            .map(|minimum| element_count as f64 >= minimum);

        let payload = DiagramPayload {
            requires_manual_review: true,
            element_count,
            has_title,
            size_bytes: request.content.size_bytes(),
            meets_minimum_elements,
        };
        Ok(ExecutionResult::graded(true, ResultPayload::Diagram(payload)))
    }
}
