/// Notebook Criteria - Expected-Output Forms and Their Evaluation
///
/// **Forms (parsed once from `expected_output`):**
/// - Absent: passes when the notebook produced any output
/// - Literal (string/number/bool): final result, then each print, then raw
///   stdout; first match wins
/// - Output shape (`{"output_type": ...}`): one expected output, matched
///   across representations
/// - Checks: conjunction of declared assertions
///
/// **Cross-Representation Matching:**
/// An expected execution result is satisfied by stdout stream text with the
/// same content, and an expected stdout stream by an execution result. So
/// `print(8)` and a trailing `8` expression satisfy each other. Display
/// outputs match display outputs only, mime type by mime type.

use assay_common::types::{value_to_text, OutputItem};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::document::multiline_text;
use super::outputs::ExtractedOutputs;
use crate::equivalence::values_match;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedOutput {
    Result(String),
    Stream { name: String, text: String },
    Display(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotebookChecks {
    pub expected_final_result: Option<String>,
    pub expected_prints: Vec<String>,
    pub must_contain: Vec<String>,
    pub must_have_result: bool,
}

impl NotebookChecks {
    fn is_empty(&self) -> bool {
        self.expected_final_result.is_none()
            && self.expected_prints.is_empty()
            && self.must_contain.is_empty()
            && !self.must_have_result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedCriteria {
    Absent,
    Literal(String),
    OutputShape(ExpectedOutput),
    Checks(NotebookChecks),
}

fn scalar_list(value: &Value, field: &str) -> Result<Vec<String>, EngineError> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Array(_) | Value::Object(_) | Value::Null => Err(EngineError::InvalidCriteria(
                    format!("{} entries must be scalar values", field),
                )),
                scalar => Ok(value_to_text(scalar)),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        Value::Object(_) => Err(EngineError::InvalidCriteria(format!(
            "{} must be a value or a list of values",
            field
        ))),
        scalar => Ok(vec![value_to_text(scalar)]),
    }
}

fn parse_shape(map: &Map<String, Value>, output_type: &str) -> Result<ExpectedOutput, EngineError> {
    let text_of = |key: &str| map.get(key).and_then(multiline_text);

    match output_type {
        "result" | "execute_result" => {
            let text = map
                .get("data")
                .and_then(|data| data.get("text/plain"))
                .and_then(multiline_text)
                .or_else(|| text_of("text"))
                .or_else(|| map.get("value").map(value_to_text))
                .ok_or_else(|| {
                    EngineError::InvalidCriteria("expected result has no text/plain".to_string())
                })?;
            Ok(ExpectedOutput::Result(text))
        }
        "stream" => {
            let text = text_of("text").ok_or_else(|| {
                EngineError::InvalidCriteria("expected stream has no text".to_string())
            })?;
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("stdout")
                .to_string();
            Ok(ExpectedOutput::Stream { name, text })
        }
        "display" | "display_data" => {
            let data = map
                .get("data")
                .and_then(Value::as_object)
                .filter(|data| !data.is_empty())
                .ok_or_else(|| {
                    EngineError::InvalidCriteria("expected display has no data".to_string())
                })?;
            let data = data
                .iter()
                .map(|(mime, content)| {
                    let text = multiline_text(content).unwrap_or_else(|| content.to_string());
                    (mime.clone(), text)
                })
                .collect();
            Ok(ExpectedOutput::Display(data))
        }
        other => Err(EngineError::InvalidCriteria(format!(
            "unknown output_type '{}'",
            other
        ))),
    }
}

fn parse_checks(map: &Map<String, Value>) -> Result<NotebookChecks, EngineError> {
    let expected_final_result = match map.get("expected_final_result") {
        None | Some(Value::Null) => None,
        Some(Value::Array(_)) | Some(Value::Object(_)) => {
            return Err(EngineError::InvalidCriteria(
                "expected_final_result must be a scalar value".to_string(),
            ))
        }
        Some(value) => Some(value_to_text(value)),
    };

    let list = |field: &str| match map.get(field) {
        Some(value) => scalar_list(value, field),
        None => Ok(Vec::new()),
    };

    let must_have_result = match map.get("must_have_result") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(other) => {
            return Err(EngineError::InvalidCriteria(format!(
                "must_have_result must be a boolean, got {}",
                other
            )))
        }
    };

    Ok(NotebookChecks {
        expected_final_result,
        expected_prints: list("expected_prints")?,
        must_contain: list("must_contain")?,
        must_have_result,
    })
}

impl ExpectedCriteria {
    pub fn parse(expected: Option<&Value>) -> Result<Self, EngineError> {
        match expected {
            None | Some(Value::Null) => Ok(ExpectedCriteria::Absent),
            Some(list @ Value::Array(_)) => Ok(ExpectedCriteria::Checks(NotebookChecks {
                expected_prints: scalar_list(list, "expected_prints")?,
                ..NotebookChecks::default()
            })),
            Some(Value::Object(map)) => match map.get("output_type") {
                Some(Value::String(output_type)) => Ok(ExpectedCriteria::OutputShape(parse_shape(
                    map,
                    &output_type.to_lowercase(),
                )?)),
                Some(other) => Err(EngineError::InvalidCriteria(format!(
                    "output_type must be a string, got {}",
                    other
                ))),
                None => Ok(ExpectedCriteria::Checks(parse_checks(map)?)),
            },
            Some(scalar) => Ok(ExpectedCriteria::Literal(value_to_text(scalar))),
        }
    }

    pub fn evaluate(&self, actual: &ExtractedOutputs, tolerance: f64) -> bool {
        match self {
            ExpectedCriteria::Absent => !actual.outputs.is_empty(),
            ExpectedCriteria::Literal(expected) => literal_matches(actual, expected, tolerance),
            ExpectedCriteria::OutputShape(shape) => shape_matches(actual, shape, tolerance),
            ExpectedCriteria::Checks(checks) if checks.is_empty() => !actual.outputs.is_empty(),
            ExpectedCriteria::Checks(checks) => checks_hold(actual, checks, tolerance),
        }
    }
}

fn literal_matches(actual: &ExtractedOutputs, expected: &str, tolerance: f64) -> bool {
    actual
        .final_result
        .iter()
        .chain(actual.prints.iter())
        .any(|candidate| values_match(candidate, expected, tolerance))
        || values_match(&actual.stdout, expected, tolerance)
}

fn result_texts(actual: &ExtractedOutputs) -> impl Iterator<Item = &str> {
    actual.outputs.iter().filter_map(|item| match item {
        OutputItem::Result { .. } => item.plain_text(),
        _ => None,
    })
}

/// Stream outputs one by one, in cell order
fn stream_items<'a>(actual: &'a ExtractedOutputs, stream: &'a str) -> impl Iterator<Item = &'a str> {
    actual.outputs.iter().filter_map(move |item| match item {
        OutputItem::Stream { name, text } if name == stream => Some(text.as_str()),
        _ => None,
    })
}

fn shape_matches(actual: &ExtractedOutputs, shape: &ExpectedOutput, tolerance: f64) -> bool {
    match shape {
        ExpectedOutput::Result(expected) => {
            result_texts(actual).any(|text| values_match(text, expected, tolerance))
                || stream_items(actual, "stdout").any(|text| {
                    values_match(text, expected, tolerance)
                        || text
                            .lines()
                            .map(str::trim)
                            .filter(|line| !line.is_empty())
                            .any(|line| values_match(line, expected, tolerance))
                })
                || values_match(&actual.stream_text("stdout"), expected, tolerance)
        }
        ExpectedOutput::Stream { name, text } => {
            let stream = actual.stream_text(name);
            stream_items(actual, name)
                .any(|item| !item.trim().is_empty() && values_match(item, text, tolerance))
                || (!stream.is_empty() && values_match(&stream, text, tolerance))
                || (name == "stdout"
                    && result_texts(actual).any(|result| values_match(result, text, tolerance)))
        }
        ExpectedOutput::Display(expected) => actual.outputs.iter().any(|item| match item {
            OutputItem::Display { data } => expected.iter().all(|(mime, text)| {
                data.get(mime)
                    .is_some_and(|shown| values_match(shown, text, tolerance))
            }),
            _ => false,
        }),
    }
}

fn checks_hold(actual: &ExtractedOutputs, checks: &NotebookChecks, tolerance: f64) -> bool {
    let final_result_ok = checks.expected_final_result.as_ref().map_or(true, |expected| {
        actual
            .final_result
            .as_ref()
            .is_some_and(|result| values_match(result, expected, tolerance))
    });

    let prints_ok = checks.expected_prints.iter().all(|expected| {
        actual
            .prints
            .iter()
            .any(|print| values_match(print, expected, tolerance))
    });

    let haystack: Vec<&str> = std::iter::once(actual.stdout.as_str())
        .chain(actual.outputs.iter().filter_map(OutputItem::plain_text))
        .collect();
    let contains_ok = checks
        .must_contain
        .iter()
        .all(|needle| haystack.iter().any(|text| text.contains(needle.as_str())));

    let result_ok = !checks.must_have_result || actual.final_result.is_some();

    final_result_ok && prints_ok && contains_ok && result_ok
}
