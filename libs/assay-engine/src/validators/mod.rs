//! Non-executing validators for declarative artifacts.
//!
//! Submissions may arrive as structured JSON or as text. Text is tried as
//! JSON first; each validator then falls back to its own raw-text strategy.

pub mod diagram;
pub mod document;
pub mod spreadsheet;
pub mod statistics;
pub mod visualization;

use assay_common::types::SubmissionContent;
use serde_json::{Map, Value};

use crate::equivalence::parse_number;

/// Structured form of the submission, if it has one
pub fn parse_structured(content: &SubmissionContent) -> Option<Value> {
    match content {
        SubmissionContent::Structured(Value::String(text)) | SubmissionContent::Text(text) => {
            serde_json::from_str::<Value>(text.trim())
                .ok()
                .filter(|v| v.is_object() || v.is_array())
        }
        SubmissionContent::Structured(value) => Some(value.clone()),
    }
}

/// `name: value` / `name = value` lines. Numeric values become numbers.
pub fn parse_key_values(text: &str) -> Map<String, Value> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let split = line.find([':', '='])?;
            let (key, value) = (line[..split].trim(), line[split + 1..].trim());
            if key.is_empty() {
                return None;
            }
            let value = match parse_number(value) {
                Some(n) => serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(value.to_string())),
                None => Value::String(value.to_string()),
            };
            Some((key.to_string(), value))
        })
        .collect()
}

type FieldStrategy = fn(&SubmissionContent) -> Option<Map<String, Value>>;

fn json_object(content: &SubmissionContent) -> Option<Map<String, Value>> {
    match parse_structured(content)? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn key_value_lines(content: &SubmissionContent) -> Option<Map<String, Value>> {
    let fields = parse_key_values(content.as_text()?);
    (!fields.is_empty()).then_some(fields)
}

const FIELD_STRATEGIES: [FieldStrategy; 2] = [json_object, key_value_lines];

/// Flat named fields from the submission, first successful strategy wins
pub fn parse_fields(content: &SubmissionContent) -> Option<Map<String, Value>> {
    FIELD_STRATEGIES.iter().find_map(|strategy| strategy(content))
}

/// First present, non-null expectation
pub fn expectation<'a>(primary: Option<&'a Value>, fallback: Option<&'a Value>) -> Option<&'a Value> {
    primary
        .filter(|v| !v.is_null())
        .or_else(|| fallback.filter(|v| !v.is_null()))
}

/// Number or numeric string
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}
