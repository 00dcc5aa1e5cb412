/// Execution Service - Uniform Contract Over All Environments
///
/// **Core Responsibility:**
/// One `execute(request) -> ExecutionResult` entry point, implemented once per
/// environment.
///
/// **Critical Properties:**
/// - `execute` never fails: every `EngineError` and every panic raised by an
///   implementation is turned into a `success=false` result with the
///   diagnostic text attached
/// - Implementations are stateless between calls and `Send + Sync`
/// - Result metadata (environment, run id, timing) is stamped here, not by
///   the implementations

use assay_common::types::{ExecutionEnvironment, ExecutionRequest, ExecutionResult, ResultMetadata};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::equivalence::json_values_match;
use crate::error::EngineError;

#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Environment tag this service grades
    fn environment(&self) -> ExecutionEnvironment;

    /// Run and grade one submission. Errors are reported, not raised, by
    /// [`ExecutionService::execute`].
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError>;

    /// Compare one actual value against one expected value
    fn validate_output(&self, actual: &Value, expected: &Value, tolerance: f64) -> bool {
        json_values_match(actual, expected, tolerance)
    }

    /// Grade one submission; always returns a structured result
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        execute_guarded(self, request).await
    }
}

/// Outer boundary of every `execute` call
pub async fn execute_guarded<S>(service: &S, request: &ExecutionRequest) -> ExecutionResult
where
    S: ExecutionService + ?Sized,
{
    let environment = service.environment();
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let clock = Instant::now();

    let span = tracing::info_span!("execute", environment = %environment, run_id = %run_id);
    let outcome = AssertUnwindSafe(service.run(request))
        .catch_unwind()
        .instrument(span)
        .await;

    let mut result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!(
                environment = %environment,
                run_id = %run_id,
                configuration = err.is_configuration(),
                error = %err,
                "Execution could not be graded"
            );
            ExecutionResult::failure(err.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(
                environment = %environment,
                run_id = %run_id,
                panic = %message,
                "Service panicked during execution"
            );
            ExecutionResult::failure(EngineError::Internal(message).to_string())
        }
    };

    let duration_ms = clock.elapsed().as_millis() as u64;
    result.metadata = ResultMetadata {
        environment: Some(environment),
        run_id,
        started_at,
        duration_ms,
    };

    info!(
        environment = %environment,
        run_id = %run_id,
        success = result.success,
        passed = result.passed,
        duration_ms = duration_ms,
        "Execution completed"
    );

    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_common::types::{ResultPayload, Testcase};

    struct Scripted {
        outcome: fn() -> Result<ExecutionResult, EngineError>,
    }

    #[async_trait]
    impl ExecutionService for Scripted {
        fn environment(&self) -> ExecutionEnvironment {
            ExecutionEnvironment::Statistics
        }

        async fn run(&self, _request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
            (self.outcome)()
        }
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest::new("content", Testcase::default())
    }

    #[tokio::test]
    async fn test_success_is_stamped() {
        let service = Scripted {
            outcome: || Ok(ExecutionResult::graded(true, ResultPayload::None)),
        };
        let result = service.execute(&request()).await;

        assert!(result.success);
        assert!(result.passed);
        assert_eq!(result.metadata.environment, Some(ExecutionEnvironment::Statistics));
        assert!(!result.metadata.run_id.is_nil());
    }

    #[tokio::test]
    async fn test_error_becomes_failure_result() {
        let service = Scripted {
            outcome: || Err(EngineError::UnsupportedLanguage("cobol".into())),
        };
        let result = service.execute(&request()).await;

        assert!(!result.success);
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("Unsupported language: cobol"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let service = Scripted {
            outcome: || panic!("index out of bounds"),
        };
        let result = service.execute(&request()).await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.starts_with("Internal error"));
        assert!(error.contains("index out of bounds"));
    }

    #[test]
    fn test_default_validate_output() {
        let service = Scripted {
            outcome: || Ok(ExecutionResult::graded(true, ResultPayload::None)),
        };
        assert!(service.validate_output(&Value::from(1.0005), &Value::from(1), 0.001));
        assert!(!service.validate_output(&Value::from("no"), &Value::from("yes"), 0.001));
    }
}
