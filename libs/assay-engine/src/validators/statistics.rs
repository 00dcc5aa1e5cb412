// Statistical result validator
// Named statistics compared one by one; a missing statistic fails its check

use assay_common::types::{
    value_to_text, CheckOutcome, ChecksPayload, ExecutionEnvironment, ExecutionRequest,
    ExecutionResult, ResultPayload,
};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{expectation, parse_fields};
use crate::equivalence::{json_values_match, DEFAULT_TOLERANCE};
use crate::error::EngineError;
use crate::service::ExecutionService;

#[derive(Debug, Default, Clone, Copy)]
pub struct StatisticsValidator;

impl StatisticsValidator {
    pub fn new() -> Self {
        Self
    }
}

/// Compare every expected statistic against the reported ones
pub fn check_statistics(
    actual: &Map<String, Value>,
    expected: &Map<String, Value>,
    tolerance: f64,
) -> ChecksPayload {
    let checks = expected
        .iter()
        .map(|(name, expected_value)| {
            let reported = actual.get(name);
            let passed =
                reported.is_some_and(|value| json_values_match(value, expected_value, tolerance));
            CheckOutcome::compared(
                name.clone(),
                passed,
                value_to_text(expected_value),
                reported.map(value_to_text),
            )
        })
        .collect();
    ChecksPayload { checks }
}

#[async_trait]
impl ExecutionService for StatisticsValidator {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Statistics
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        let actual = parse_fields(&request.content).ok_or_else(|| {
            EngineError::InvalidContent(
                "statistics must be a JSON object or `name: value` lines".to_string(),
            )
        })?;

        let testcase = &request.testcase;
        let assertions = testcase.statistical_assertions.clone().map(Value::Object);
        let expected = match expectation(assertions.as_ref(), testcase.expected_output.as_ref()) {
            Some(Value::Object(expected)) if !expected.is_empty() => expected,
            _ => {
                return Err(EngineError::InvalidCriteria(
                    "no statistical assertions declared".to_string(),
                ))
            }
        };

        let payload = check_statistics(&actual, expected, request.tolerance(DEFAULT_TOLERANCE));
        Ok(ExecutionResult::graded(
            payload.all_passed(),
            ResultPayload::Statistics(payload),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_common::types::{ExecutionOptions, Testcase};
    use serde_json::json;

    fn testcase(assertions: Value) -> Testcase {
        Testcase {
            statistical_assertions: assertions.as_object().cloned(),
            ..Testcase::default()
        }
    }

    #[tokio::test]
    async fn test_within_tolerance() {
        let request = ExecutionRequest::new(
            json!({"mean": 5.0004, "std_dev": "1.41", "n": 10}),
            testcase(json!({"mean": 5, "n": 10})),
        );
        let result = StatisticsValidator::new().execute(&request).await;
        assert!(result.passed, "{:?}", result.payload);
    }

    #[tokio::test]
    async fn test_missing_statistic_fails() {
        let request = ExecutionRequest::new(
            "mean: 5\nmedian = 4",
            testcase(json!({"mean": 5, "p_value": 0.05})),
        );
        let result = StatisticsValidator::new().execute(&request).await;

        assert!(result.success);
        assert!(!result.passed);
        match result.payload {
            ResultPayload::Statistics(payload) => {
                let missing = payload.checks.iter().find(|c| c.name == "p_value").unwrap();
                assert!(!missing.passed);
                assert!(missing.actual.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tolerance_override_and_fallback_expectation() {
        let tc = Testcase {
            expected_output: Some(json!({"r_squared": 0.8})),
            ..Testcase::default()
        };
        let request = ExecutionRequest::new("r_squared = 0.83", tc);
        assert!(!StatisticsValidator::new().execute(&request).await.passed);

        let request = request.with_options(ExecutionOptions {
            numerical_tolerance: Some(0.05),
            ..ExecutionOptions::default()
        });
        assert!(StatisticsValidator::new().execute(&request).await.passed);
    }

    #[tokio::test]
    async fn test_no_assertions_is_invalid() {
        let request = ExecutionRequest::new("mean: 1", Testcase::default());
        let result = StatisticsValidator::new().execute(&request).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_repeatable() {
        let request = ExecutionRequest::new("mean: 3", testcase(json!({"mean": 3.5})));
        let validator = StatisticsValidator::new();
        let first = validator.execute(&request).await;
        assert_eq!(first.passed, validator.execute(&request).await.passed);
        assert!(!first.passed);
    }
}
