/// Visualization Validator - Declarative Chart Specification Checks
///
/// **Checks (each only when declared by the testcase):**
/// - `type` / `chart_type`: chart kind, case-insensitive; the submission may
///   use `type`, `chart_type` or a Vega-Lite style `mark`
/// - `required_axes` / `axes`: axis-to-field bindings, `{x: "field"}` or
///   `{x: {field}}`; a list of axis names only requires the axis to be bound
/// - `min_data_points`: rows in `data` or `data.values`
///
/// Nothing is rendered or executed.

use assay_common::types::{
    CheckOutcome, ChecksPayload, ExecutionEnvironment, ExecutionRequest, ExecutionResult,
    ResultPayload,
};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{expectation, numeric, parse_structured};
use crate::error::EngineError;
use crate::service::ExecutionService;

#[derive(Debug, Default, Clone, Copy)]
pub struct VisualizationValidator;

impl VisualizationValidator {
    pub fn new() -> Self {
        Self
    }
}

fn text_field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) => Some(s.as_str()),
        Value::Object(inner) => inner.get("type").and_then(Value::as_str),
        _ => None,
    })
}

fn binding_field(binding: &Value) -> Option<&str> {
    match binding {
        Value::String(field) => Some(field),
        Value::Object(map) => map.get("field").and_then(Value::as_str),
        _ => None,
    }
}

fn axis_binding<'a>(chart: &'a Map<String, Value>, axis: &str) -> Option<&'a Value> {
    ["encoding", "axes"]
        .iter()
        .filter_map(|key| chart.get(*key).and_then(Value::as_object))
        .find_map(|bindings| bindings.get(axis))
}

fn data_points(chart: &Map<String, Value>) -> usize {
    match chart.get("data") {
        Some(Value::Array(rows)) => rows.len(),
        Some(Value::Object(data)) => data
            .get("values")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        _ => 0,
    }
}

fn type_check(chart: &Map<String, Value>, expected: &Map<String, Value>) -> Option<CheckOutcome> {
    let expected_type = text_field(expected, &["type", "chart_type"])?;
    let actual = text_field(chart, &["type", "chart_type", "mark"]);
    let passed = actual.is_some_and(|t| t.trim().eq_ignore_ascii_case(expected_type.trim()));
    Some(CheckOutcome::compared(
        "type",
        passed,
        expected_type,
        actual.map(String::from),
    ))
}

fn axis_checks(chart: &Map<String, Value>, expected: &Map<String, Value>) -> Vec<CheckOutcome> {
    let required = match expected.get("required_axes").or_else(|| expected.get("axes")) {
        Some(required) => required,
        None => return Vec::new(),
    };

    let bound_field = |axis: &str| axis_binding(chart, axis).and_then(binding_field).map(String::from);

    match required {
        Value::Object(bindings) => bindings
            .iter()
            .map(|(axis, field)| {
                let actual = bound_field(axis);
                let expected_field = binding_field(field).unwrap_or_default();
                let passed = actual.as_deref() == Some(expected_field);
                CheckOutcome::compared(format!("axis:{}", axis), passed, expected_field, actual)
            })
            .collect(),
        Value::Array(axes) => axes
            .iter()
            .filter_map(Value::as_str)
            .map(|axis| {
                let actual = bound_field(axis);
                CheckOutcome::compared(format!("axis:{}", axis), actual.is_some(), "bound", actual)
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn data_point_check(chart: &Map<String, Value>, expected: &Map<String, Value>) -> Option<CheckOutcome> {
    let minimum = expected.get("min_data_points").and_then(numeric)?;
    let actual = data_points(chart);
    Some(CheckOutcome::compared(
        "min_data_points",
        actual as f64 >= minimum,
        format!(">= {}", minimum),
        Some(actual.to_string()),
    ))
}

/// Every declared check, in a stable order
pub fn check_chart(chart: &Map<String, Value>, expected: &Map<String, Value>) -> ChecksPayload {
    let mut checks: Vec<CheckOutcome> = type_check(chart, expected).into_iter().collect();
    checks.extend(axis_checks(chart, expected));
    checks.extend(data_point_check(chart, expected));
    ChecksPayload { checks }
}

#[async_trait]
impl ExecutionService for VisualizationValidator {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Visualization
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        let chart = match parse_structured(&request.content) {
            Some(Value::Object(chart)) => chart,
            _ => {
                return Err(EngineError::InvalidContent(
                    "visualization must be a JSON chart specification".to_string(),
                ))
            }
        };

        let testcase = &request.testcase;
        let expected = match expectation(
            testcase.expected_visualization.as_ref(),
            testcase.expected_output.as_ref(),
        ) {
            Some(Value::Object(expected)) => expected.clone(),
            Some(other) => {
                return Err(EngineError::InvalidCriteria(format!(
                    "visualization expectation must be an object, got {}",
                    other
                )))
            }
            None => Map::new(),
        };

        let payload = check_chart(&chart, &expected);
        Ok(ExecutionResult::graded(
            payload.all_passed(),
            ResultPayload::Visualization(payload),
        ))
    }
}
