use super::normalize::{normalize_order, round_numbers};
use super::{Judge, JudgeInput, JudgeKind, Verdict};

/// Deep equality between the return value and the expected output.
pub struct ReturnValueJudge;

impl Judge for ReturnValueJudge {
    fn kind(&self) -> JudgeKind {
        JudgeKind::ReturnValue
    }

    fn judge(&self, input: &JudgeInput<'_>) -> Verdict {
        let mut actual = round_numbers(input.actual);
        let mut expected = round_numbers(input.expected);
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
