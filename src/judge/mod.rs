//! Judges comparing a function's output with the expected output.
//!
//! Test content picks a comparison strategy by [`JudgeKind`]; the
//! [`JudgeRegistry`] maps each kind to a [`Judge`] implementation.

mod mutating;
pub mod normalize;
mod return_value;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use mutating::MutatingArrayJudge;
pub use return_value::ReturnValueJudge;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JudgeKind {
    #[default]
    ReturnValue,
    MutatingArrayWithK,
}

impl fmt::Display for JudgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JudgeKind::ReturnValue => write!(f, "return-value"),
            JudgeKind::MutatingArrayWithK => write!(f, "mutating-array-with-k"),
        }
    }
}

/// Everything a judge may look at for one test case. Values are already in
/// wire format.
#[derive(Debug, Clone, Copy)]
pub struct JudgeInput<'a> {
    pub actual: &'a Value,
    /// First argument as it looked after the call returned
    pub mutated_input: Option<&'a Value>,
    pub expected: &'a Value,
    pub order_independent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    /// Normalized actual value, as compared
    pub actual: Value,
    /// Normalized expected value, as compared
    pub expected: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Verdict {
    pub fn failed(actual: Value, expected: Value, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            actual,
            expected,
            message: Some(message.into()),
        }
    }
}

/// A comparison strategy.
pub trait Judge: Send + Sync {
    /// The kind this judge is registered under
    fn kind(&self) -> JudgeKind;

    fn judge(&self, input: &JudgeInput<'_>) -> Verdict;
}

/// Judges by kind. `JudgeRegistry::default()` holds every built-in judge.
pub struct JudgeRegistry {
    judges: HashMap<JudgeKind, Arc<dyn Judge>>,
}

impl JudgeRegistry {
    /// A registry with no judges
    pub fn empty() -> Self {
        Self {
            judges: HashMap::new(),
        }
    }

    /// Registers `judge`, replacing any judge of the same kind.
    pub fn register(&mut self, judge: Arc<dyn Judge>) {
        self.judges.insert(judge.kind(), judge);
    }

    pub fn get(&self, kind: JudgeKind) -> Option<&dyn Judge> {
        self.judges.get(&kind).map(|j| j.as_ref())
    }

    /// Runs the judge registered for `kind`. A missing judge fails the case.
    pub fn judge(&self, kind: JudgeKind, input: &JudgeInput<'_>) -> Verdict {
        match self.get(kind) {
            Some(judge) => judge.judge(input),
            None => Verdict::failed(
                input.actual.clone(),
                input.expected.clone(),
                format!("No judge registered for '{}'", kind),
            ),
        }
    }
}

impl Default for JudgeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ReturnValueJudge));
        registry.register(Arc::new(MutatingArrayJudge));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input<'a>(actual: &'a Value, expected: &'a Value) -> JudgeInput<'a> {
        JudgeInput {
            actual,
            mutated_input: None,
            expected,
            order_independent: false,
        }
    }

    #[test]
    fn test_kind_serde() {
        let kind: JudgeKind = serde_json::from_value(json!("mutating-array-with-k")).unwrap();
        assert_eq!(kind, JudgeKind::MutatingArrayWithK);
        assert_eq!(serde_json::to_value(JudgeKind::default()).unwrap(), json!("return-value"));
        assert!(serde_json::from_value::<JudgeKind>(json!("fuzzy")).is_err());
    }

    #[test]
    fn test_default_registry_dispatches_by_kind() {
        let registry = JudgeRegistry::default();
        let actual = json!([0, 1]);
        let expected = json!([0, 1]);
        assert!(registry.judge(JudgeKind::ReturnValue, &input(&actual, &expected)).passed);
    }

    #[test]
    fn test_missing_judge_fails_case() {
        let registry = JudgeRegistry::empty();
        let value = json!(1);
        let verdict = registry.judge(JudgeKind::ReturnValue, &input(&value, &value));
        assert!(!verdict.passed);
        assert!(verdict.message.unwrap().contains("return-value"));
    }

    struct AlwaysPass;

    impl Judge for AlwaysPass {
        fn kind(&self) -> JudgeKind {
            JudgeKind::ReturnValue
        }

        fn judge(&self, input: &JudgeInput<'_>) -> Verdict {
            Verdict {
                passed: true,
                actual: input.actual.clone(),
                expected: input.expected.clone(),
                message: None,
            }
        }
    }

    #[test]
    fn test_register_replaces_existing_kind() {
        let mut registry = JudgeRegistry::default();
        registry.register(Arc::new(AlwaysPass));
        let (a, b) = (json!(1), json!(2));
        assert!(registry.judge(JudgeKind::ReturnValue, &input(&a, &b)).passed);
    }
}
