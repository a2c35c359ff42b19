use serde_json::Value;

use super::normalize::{normalize_order, round_numbers};
use super::{Judge, JudgeInput, JudgeKind, Verdict};

/// In-place array problems: the function returns a count `k` and leaves
/// the answer in the first `k` slots of its first argument. Slots at index
/// `k` and beyond are not inspected.
pub struct MutatingArrayJudge;

impl Judge for MutatingArrayJudge {
    fn kind(&self) -> JudgeKind {
        JudgeKind::MutatingArrayWithK
    }

    fn judge(&self, input: &JudgeInput<'_>) -> Verdict {
        let mut expected = round_numbers(input.expected);
        let Some(expected_len) = expected.as_array().map(Vec::len) else {
            return Verdict::failed(
                input.actual.clone(),
                expected,
                "Expected output for mutating-array-with-k must be an array",
            );
        };

        let k = match as_count(input.actual) {
            Some(k) => k,
            None => {
                return Verdict::failed(
                    input.actual.clone(),
                    expected,
                    format!("Expected the function to return an integer count, got {}", input.actual),
                )
            }
        };
        if k != expected_len {
            return Verdict::failed(
                input.actual.clone(),
                expected,
                format!("Returned k = {}, expected {}", k, expected_len),
            );
        }

        let Some(mutated) = input.mutated_input.and_then(Value::as_array) else {
            return Verdict::failed(
                input.actual.clone(),
                expected,
                "The first argument is not an array after the call",
            );
        };
        if mutated.len() < k {
            return Verdict::failed(
                Value::Array(mutated.clone()),
                expected,
                format!("Returned k = {} but the array only has {} elements", k, mutated.len()),
            );
        }

        let mut actual = round_numbers(&Value::Array(mutated[..k].to_vec()));
        if input.order_independent {
            actual = normalize_order(&actual);
            expected = normalize_order(&expected);
        }
        Verdict {
            passed: actual == expected,
            actual,
            expected,
            message: None,
        }
    }
}

fn as_count(value: &Value) -> Option<usize> {
    if let Some(k) = value.as_u64() {
        return usize::try_from(k).ok();
    }
    let f = value.as_f64()?;
    (f >= 0.0 && f.fract() == 0.0).then_some(f as usize)
}
