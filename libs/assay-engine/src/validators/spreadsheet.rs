/// Spreadsheet Validator - Bounded Numeric and Accounting Checks
///
/// **Check Selection (from `testcase_type`):**
/// - `calculations` → named fields against expected values, passing when
///   the share of correct fields reaches `min_pass_rate`
/// - `budget` → `revenues - expenses == total`
/// - `balance_sheet` → `assets == liabilities + equity`
/// - `tax` → expected tax amount plus completion of named steps
/// - no subtype → `calculations` over the whole expectation
///
/// **Amounts:**
/// Numbers, numeric strings (`$1,200.50`, `(300)` for negatives), or nested
/// objects/arrays whose numeric leaves are summed.

use assay_common::types::{
    value_to_text, CheckOutcome, ExecutionEnvironment, ExecutionRequest, ExecutionResult,
    ResultPayload, SpreadsheetPayload, Testcase,
};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{expectation, numeric, parse_fields};
use crate::equivalence::{json_values_match, numbers_match, parse_number};
use crate::error::EngineError;
use crate::service::ExecutionService;

/// Tolerance for currency amounts when none is configured
pub const ACCOUNTING_TOLERANCE: f64 = 0.01;
pub const DEFAULT_MIN_PASS_RATE: f64 = 0.8;

const REVENUE_KEYS: [&str; 4] = ["revenues", "revenue", "income", "total_revenue"];
const EXPENSE_KEYS: [&str; 4] = ["expenses", "expense", "costs", "total_expenses"];
const TOTAL_KEYS: [&str; 5] = ["total", "net", "net_income", "balance", "surplus"];
const ASSET_KEYS: [&str; 2] = ["assets", "total_assets"];
const LIABILITY_KEYS: [&str; 2] = ["liabilities", "total_liabilities"];
const EQUITY_KEYS: [&str; 4] = ["equity", "total_equity", "owners_equity", "shareholders_equity"];
const TAX_KEYS: [&str; 4] = ["tax", "tax_due", "tax_amount", "total_tax"];

#[derive(Debug, Clone, PartialEq)]
pub enum SpreadsheetCheck {
    Calculations {
        expected: Map<String, Value>,
        min_pass_rate: f64,
    },
    Budget,
    BalanceSheet,
    Tax {
        expected_tax: Option<f64>,
        required_steps: Vec<String>,
    },
}

impl SpreadsheetCheck {
    pub fn from_testcase(testcase: &Testcase) -> Result<Self, EngineError> {
        let declared = expectation(
            testcase.expected_financial_result.as_ref(),
            testcase.expected_output.as_ref(),
        );
        let rules = match declared {
            Some(Value::Object(rules)) => rules.clone(),
            _ => Map::new(),
        };
        let require_object = || match declared {
            Some(other) if !other.is_object() => Err(EngineError::InvalidCriteria(format!(
                "financial expectation must be an object, got {}",
                other
            ))),
            _ => Ok(()),
        };

        let check = match testcase.subtype().as_deref() {
            Some("budget") => SpreadsheetCheck::Budget,
            Some("balance_sheet" | "balance" | "balancesheet") => SpreadsheetCheck::BalanceSheet,
            Some("tax" | "tax_calculation") => {
                require_object()?;
                SpreadsheetCheck::Tax {
                    expected_tax: rules
                        .get("expected_tax")
                        .or_else(|| find_field(&rules, &TAX_KEYS))
                        .and_then(amount),
                    required_steps: rules
                        .get("required_steps")
                        .and_then(Value::as_array)
                        .map(|steps| {
                            steps
                                .iter()
                                .filter_map(Value::as_str)
                                .map(String::from)
                                .collect()
                        })
                        .unwrap_or_default(),
                }
            }
            _ => {
                require_object()?;
                let min_pass_rate = rules
                    .get("min_pass_rate")
                    .and_then(numeric)
                    .unwrap_or(DEFAULT_MIN_PASS_RATE);
                let expected = match rules.get("expected") {
                    Some(Value::Object(expected)) => expected.clone(),
                    _ => {
                        let mut expected = rules;
                        expected.remove("min_pass_rate");
                        expected
                    }
                };
                if expected.is_empty() {
                    return Err(EngineError::InvalidCriteria(
                        "no expected calculations declared".to_string(),
                    ));
                }
                SpreadsheetCheck::Calculations {
                    expected,
                    min_pass_rate,
                }
            }
        };
        Ok(check)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpreadsheetCheck::Calculations { .. } => "calculations",
            SpreadsheetCheck::Budget => "budget",
            SpreadsheetCheck::BalanceSheet => "balance_sheet",
            SpreadsheetCheck::Tax { .. } => "tax",
        }
    }
}

/// Parse an accounting-formatted amount
pub fn parse_amount(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let (negative, inner) = match trimmed.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = inner
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();
    let value = parse_number(&cleaned)?;
    Some(if negative { -value } else { value })
}

/// Amount held by a cell: number, amount string, or sum of numeric leaves
pub fn amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s),
        Value::Array(items) => sum_leaves(items.iter()),
        Value::Object(map) => sum_leaves(map.values()),
        _ => None,
    }
}

fn sum_leaves<'a>(values: impl Iterator<Item = &'a Value>) -> Option<f64> {
    let amounts: Vec<f64> = values.filter_map(amount).collect();
    (!amounts.is_empty()).then(|| amounts.iter().sum())
}

fn find_field<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| {
        fields.get(*key).or_else(|| {
            fields
                .iter()
                .find(|(name, _)| name.trim().eq_ignore_ascii_case(key))
                .map(|(_, value)| value)
        })
    })
}

fn amount_of(fields: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    find_field(fields, keys).and_then(amount)
}

fn identity_check(
    name: &str,
    lhs: Option<f64>,
    rhs: Option<f64>,
    tolerance: f64,
) -> CheckOutcome {
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => CheckOutcome::compared(
            name,
            numbers_match(lhs, rhs, tolerance),
            format!("{}", rhs),
            Some(format!("{}", lhs)),
        ),
        _ => CheckOutcome::compared(name, false, "all components present", None),
    }
}

fn calculation_checks(
    actual: &Map<String, Value>,
    expected: &Map<String, Value>,
    tolerance: f64,
) -> Vec<CheckOutcome> {
    expected
        .iter()
        .map(|(field, expected_value)| {
            let reported = find_field(actual, &[field.as_str()]);
            let passed = match (reported.and_then(amount), amount(expected_value)) {
                (Some(a), Some(e)) => numbers_match(a, e, tolerance),
                _ => reported.is_some_and(|r| json_values_match(r, expected_value, tolerance)),
            };
            CheckOutcome::compared(
                field.clone(),
                passed,
                value_to_text(expected_value),
                reported.map(value_to_text),
            )
        })
        .collect()
}

fn step_completed(actual: &Map<String, Value>, step: &str) -> bool {
    let in_fields = find_field(actual, &[step]).is_some_and(|v| !v.is_null());
    let in_steps = match find_field(actual, &["steps"]) {
        Some(Value::Array(steps)) => steps
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s.trim().eq_ignore_ascii_case(step)),
        Some(Value::Object(steps)) => steps
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case(step) && !value.is_null()),
        _ => false,
    };
    in_fields || in_steps
}

/// Grade `actual` under `check`; the verdict plus per-check detail
pub fn evaluate(
    check: &SpreadsheetCheck,
    actual: &Map<String, Value>,
    tolerance: f64,
) -> (bool, SpreadsheetPayload) {
    let mut payload = SpreadsheetPayload {
        check: check.name().to_string(),
        ..SpreadsheetPayload::default()
    };

    let passed = match check {
        SpreadsheetCheck::Calculations {
            expected,
            min_pass_rate,
        } => {
            payload.checks = calculation_checks(actual, expected, tolerance);
            let correct = payload.checks.iter().filter(|c| c.passed).count();
            let rate = correct as f64 / payload.checks.len().max(1) as f64;
            payload.pass_rate = Some(rate);
            rate >= *min_pass_rate
        }
        SpreadsheetCheck::Budget => {
            let revenues = amount_of(actual, &REVENUE_KEYS);
            let expenses = amount_of(actual, &EXPENSE_KEYS);
            let total = amount_of(actual, &TOTAL_KEYS);
            let net = revenues.zip(expenses).map(|(r, e)| r - e);
            payload
                .checks
                .push(identity_check("revenues - expenses == total", net, total, tolerance));
            payload.checks[0].passed
        }
        SpreadsheetCheck::BalanceSheet => {
            let assets = amount_of(actual, &ASSET_KEYS);
            let liabilities = amount_of(actual, &LIABILITY_KEYS);
            let equity = amount_of(actual, &EQUITY_KEYS);
            let claims = liabilities.zip(equity).map(|(l, e)| l + e);
            payload.checks.push(identity_check(
                "assets == liabilities + equity",
                assets,
                claims,
                tolerance,
            ));
            payload.checks[0].passed
        }
        SpreadsheetCheck::Tax {
            expected_tax,
            required_steps,
        } => {
            if let Some(expected_tax) = expected_tax {
                let reported = amount_of(actual, &TAX_KEYS);
                payload.checks.push(CheckOutcome::compared(
                    "tax",
                    reported.is_some_and(|t| numbers_match(t, *expected_tax, tolerance)),
                    format!("{}", expected_tax),
                    reported.map(|t| format!("{}", t)),
                ));
            }
            for step in required_steps {
                payload.checks.push(CheckOutcome::new(
                    format!("step:{}", step),
                    step_completed(actual, step),
                ));
            }
            !payload.checks.is_empty() && payload.checks.iter().all(|c| c.passed)
        }
    };

    (passed, payload)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SpreadsheetValidator;

impl SpreadsheetValidator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionService for SpreadsheetValidator {
    fn environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment::Spreadsheet
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        let check = SpreadsheetCheck::from_testcase(&request.testcase)?;
        let actual = parse_fields(&request.content).ok_or_else(|| {
            EngineError::InvalidContent(
                "spreadsheet must be a JSON object or `name: value` lines".to_string(),
            )
        })?;

        let (passed, payload) = evaluate(&check, &actual, request.tolerance(ACCOUNTING_TOLERANCE));
        Ok(ExecutionResult::graded(passed, ResultPayload::Spreadsheet(payload)))
    }

    fn validate_output(&self, actual: &Value, expected: &Value, tolerance: f64) -> bool {
        match (amount(actual), amount(expected)) {
            (Some(a), Some(e)) => numbers_match(a, e, tolerance),
            _ => json_values_match(actual, expected, tolerance),
        }
    }
}
