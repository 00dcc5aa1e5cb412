/// Equivalence Utility - Tolerance-Aware Value Comparison
///
/// **Core Responsibility:**
/// Decide whether one actual value satisfies one expected value.
///
/// **Critical Properties:**
/// - Pure function: (actual, expected, tolerance) → bool
/// - Knows nothing about environments, kernels or databases
/// - Used by every validator; no validator compares values on its own
///
/// **Matching Policy (ordered, first applicable rule decides):**
/// 1. Trimmed exact string equality → match
/// 2. Both sides numeric → `|a - b| <= tolerance`, no fall-through
/// 3. Exactly one side numeric → no match
/// 4. Both non-numeric and longer than 3 chars → containment either way
/// 5. Otherwise → no match
///
/// Short strings need an exact match so that `"1"`, `"a"`, `"yes"` do not
/// match inside arbitrary text.

use assay_common::types::value_to_text;
use serde_json::Value;

/// Tolerance used when neither the caller nor the testcase sets one
pub const DEFAULT_TOLERANCE: f64 = 0.001;

/// Shortest length (in chars) eligible for containment matching
const CONTAINMENT_MIN_CHARS: usize = 4;

/// Normalize a value for comparison
///
/// **Normalization Rules:**
/// - Trim leading/trailing whitespace (covers `\r\n` vs `\n` at the ends)
///
/// **Preserves:**
/// - Internal whitespace
/// - Case sensitivity
fn normalize(value: &str) -> &str {
    value.trim()
}

/// Parse a finite number. `NaN`/`inf` spellings are treated as text.
pub fn parse_number(value: &str) -> Option<f64> {
    let n: f64 = normalize(value).parse().ok()?;
    n.is_finite().then_some(n)
}

/// Compare two numbers within an absolute tolerance
pub fn numbers_match(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= tolerance
}

/// Compare one actual textual value against one expected textual value
pub fn values_match(actual: &str, expected: &str, tolerance: f64) -> bool {
    let actual = normalize(actual);
    let expected = normalize(expected);

    if actual == expected {
        return true;
    }

    match (parse_number(actual), parse_number(expected)) {
        (Some(a), Some(e)) => return numbers_match(a, e, tolerance),
        (Some(_), None) | (None, Some(_)) => return false,
        (None, None) => {}
    }

    if actual.chars().count() < CONTAINMENT_MIN_CHARS
        || expected.chars().count() < CONTAINMENT_MIN_CHARS
    {
        return false;
    }

    actual.contains(expected) || expected.contains(actual)
}

/// [`values_match`] over JSON values, rendered to text first
pub fn json_values_match(actual: &Value, expected: &Value, tolerance: f64) -> bool {
    values_match(&value_to_text(actual), &value_to_text(expected), tolerance)
}
