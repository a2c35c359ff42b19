//! Algorithmic test suites: run a learner's function against declarative
//! test cases and judge every case.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::convert::{self, ConversionError, TypeTag};
use crate::error::Result;
use crate::instrument::{self, InstrumentOptions, TransformError};
use crate::judge::{JudgeInput, JudgeKind, JudgeRegistry};
use crate::sandbox::{ErrorKind, ExecutionController, ExecutionResult};

/// Declared shape of the function under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<TypeTag>,
    #[serde(default)]
    pub returns: TypeTag,
}

impl FunctionSignature {
    pub fn param(&self, index: usize) -> TypeTag {
        self.params.get(index).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: Vec<Value>,
    pub output: Value,
    #[serde(default)]
    pub judge_kind: JudgeKind,
    #[serde(default)]
    pub order_independent: bool,
}

/// A signature plus its cases, as stored in suite files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    pub signature: FunctionSignature,
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Zero-based case index
    pub case: usize,
    pub passed: bool,
    pub input: Vec<Value>,
    pub expected: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Judge explanation for a mismatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub runtime_ms: f64,
}

/// Equality ignores `runtime_ms`.
impl PartialEq for TestResult {
    fn eq(&self, other: &Self) -> bool {
        self.case == other.case
            && self.passed == other.passed
            && self.input == other.input
            && self.expected == other.expected
            && self.actual == other.actual
            && self.error == other.error
            && self.message == other.message
    }
}

impl TestResult {
    fn failed(case: usize, test: &TestCase, error: impl Into<String>) -> Self {
        Self {
            case,
            passed: false,
            input: test.input.clone(),
            expected: test.output.clone(),
            actual: None,
            error: Some(error.into()),
            message: None,
            runtime_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub results: Vec<TestResult>,
    pub execution: ExecutionResult,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}

/// The generated script for one suite run.
#[derive(Debug, Clone)]
pub struct TestScript {
    pub source: String,
    /// Per case: the position of its record in the harness output, or the
    /// reason it could not be built.
    pub slots: Vec<std::result::Result<usize, ConversionError>>,
}

/// Builds the script run in place of the learner's program: the program
/// with cancellation checkpoints only, followed by `__cases`.
pub fn build_test_script(
    code: &str,
    signature: &FunctionSignature,
    cases: &[TestCase],
) -> std::result::Result<TestScript, TransformError> {
    let program = instrument::instrument(code, &InstrumentOptions::yields_only())?;
    let fn_name = convert::js_literal(&Value::String(signature.name.clone()));

    let mut source = program.code;
    source.push_str("const __cases = [\n");
    let mut slots = Vec::with_capacity(cases.len());
    let mut emitted = 0;
    for case in cases {
        let args: std::result::Result<Vec<String>, ConversionError> = case
            .input
            .iter()
            .enumerate()
            .map(|(i, value)| convert::to_js_argument(&signature.param(i), value))
            .collect();
        match args {
            Ok(args) => {
                source.push_str(&format!(
                    "  {{ fn: {}, args: () => [{}] }},\n",
                    fn_name,
                    args.join(", ")
                ));
                slots.push(Ok(emitted));
                emitted += 1;
            }
            Err(e) => slots.push(Err(e)),
        }
    }
    source.push_str("];\n");

    Ok(TestScript { source, slots })
}

/// Runs `cases` against `code` and judges every case. Every case yields a
/// result; failures of the whole run fail every case with the same error.
pub async fn run_suite(
    controller: &ExecutionController,
    registry: &JudgeRegistry,
    code: &str,
    signature: &FunctionSignature,
    cases: &[TestCase],
) -> Result<SuiteReport> {
    let script = match build_test_script(code, signature, cases) {
        Ok(script) => script,
        Err(err) => {
            let execution = ExecutionResult::syntax_error(&err);
            let message = err.to_string();
            let results = cases
                .iter()
                .enumerate()
                .map(|(i, case)| TestResult::failed(i, case, message.clone()))
                .collect();
            return Ok(SuiteReport { results, execution });
        }
    };

    let timeout = controller.options().test_timeout;
    let execution = controller.execute(code, timeout, Some(&script.source)).await?;

    let run_failed = execution.cancelled
        || (!execution.success && execution.error_kind != Some(ErrorKind::Environment));
    let records: &[Value] = execution
        .result
        .as_ref()
        .and_then(|r| r.get("cases"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut results = Vec::with_capacity(cases.len());
    for (i, (case, slot)) in cases.iter().zip(&script.slots).enumerate() {
        let result = match slot {
            Err(e) => TestResult::failed(i, case, e.to_string()),
            Ok(_) if run_failed => TestResult::failed(
                i,
                case,
                execution
                    .error
                    .clone()
                    .unwrap_or_else(|| "Execution failed".to_string()),
            ),
            Ok(position) => match records.get(*position) {
                Some(record) => judge_case(registry, signature, i, case, record),
                None => TestResult::failed(i, case, "No result was reported for this case"),
            },
        };
        debug!(case = i, passed = result.passed, "Case judged");
        results.push(result);
    }

    let report = SuiteReport { results, execution };
    info!(
        function = %signature.name,
        cases = cases.len(),
        passed = report.passed_count(),
        "Suite finished"
    );
    Ok(report)
}

fn judge_case(
    registry: &JudgeRegistry,
    signature: &FunctionSignature,
    index: usize,
    case: &TestCase,
    record: &Value,
) -> TestResult {
    let runtime_ms = record.get("runtimeMs").and_then(Value::as_f64).unwrap_or(0.0);
    if let Some(error) = record.get("error").and_then(Value::as_str) {
        return TestResult {
            runtime_ms,
            ..TestResult::failed(index, case, error)
        };
    }

    let null = Value::Null;
    let actual = match convert::from_snapshot(&signature.returns, record.get("actual").unwrap_or(&null)) {
        Ok(actual) => actual,
        Err(e) => {
            return TestResult {
                runtime_ms,
                ..TestResult::failed(index, case, e.to_string())
            }
        }
    };
    let mutated = match record.get("mutated") {
        Some(snapshot) => match convert::from_snapshot(&signature.param(0), snapshot) {
            Ok(value) => Some(value),
            Err(e) => {
                return TestResult {
                    runtime_ms,
                    ..TestResult::failed(index, case, e.to_string())
                }
            }
        },
        None => None,
    };

    let verdict = registry.judge(
        case.judge_kind,
        &JudgeInput {
            actual: &actual,
            mutated_input: mutated.as_ref(),
            expected: &case.output,
            order_independent: case.order_independent,
        },
    );
    TestResult {
        case: index,
        passed: verdict.passed,
        input: case.input.clone(),
        expected: case.output.clone(),
        actual: Some(verdict.actual),
        error: None,
        message: verdict.message,
        runtime_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::NodeKind;
    use serde_json::json;

    fn signature(params: &[&str], returns: &str) -> FunctionSignature {
        FunctionSignature {
            name: "solve".to_string(),
            params: params.iter().map(|p| TypeTag::from(*p)).collect(),
            returns: TypeTag::from(returns),
        }
    }

    fn case(input: Value, output: Value) -> TestCase {
        serde_json::from_value(json!({"input": input, "output": output})).unwrap()
    }

    #[test]
    fn test_case_defaults() {
        let case = case(json!([[2, 7, 11, 15], 9]), json!([0, 1]));
        assert_eq!(case.judge_kind, JudgeKind::ReturnValue);
        assert!(!case.order_independent);
    }

    #[test]
    fn test_suite_file_format() {
        let suite: TestSuite = serde_json::from_value(json!({
            "signature": {"name": "reverseList", "params": ["ListNode"], "returns": "ListNode"},
            "cases": [{"input": [[1, 2]], "output": [2, 1], "judgeKind": "return-value"}]
        }))
        .unwrap();
        assert_eq!(suite.signature.params[0], TypeTag::Node(NodeKind::List));
        assert_eq!(suite.signature.param(3), TypeTag::default());
    }

    #[test]
    fn test_script_declares_program_and_cases() {
        let script = build_test_script(
            "function solve(head) { let n = 0; while (head) { n++; head = head.next } return n }",
            &signature(&["ListNode"], "number"),
            &[case(json!([[1, 2, 3]]), json!(3))],
        )
        .unwrap();
        assert!(script.source.starts_with("async function __program(__expose) {"));
        assert!(script.source.contains("const __cases = ["));
        assert!(script.source.contains("fn: \"solve\""));
        assert!(script.source.contains("new ListNode(1)"));
        assert!(script.source.contains("__shouldCancel()"));
        assert!(!script.source.contains("__trackVariable"));
        assert_eq!(script.slots.len(), 1);
    }

    #[test]
    fn test_conversion_failure_only_skips_its_case() {
        let script = build_test_script(
            "function solve(root) { return root }",
            &signature(&["TreeNode"], "TreeNode"),
            &[
                case(json!([[[1], 2]]), json!([])),
                case(json!([[1, 2, 3]]), json!([1, 2, 3])),
            ],
        )
        .unwrap();
        assert!(matches!(script.slots[0], Err(ConversionError::NestedArray { .. })));
        assert_eq!(script.slots[1].as_ref().ok(), Some(&0));
    }

    #[test]
    fn test_judge_case_converts_return_value() {
        let registry = JudgeRegistry::default();
        let sig = signature(&["TreeNode"], "TreeNode");
        let test = case(json!([[1, 2, 3]]), json!([1, 2, 3]));
        let record = json!({
            "actual": {
                "$class": "TreeNode", "val": 1,
                "left": {"val": 2, "left": null, "right": null},
                "right": {"val": 3, "left": null, "right": null}
            },
            "mutated": {"val": 1, "left": null, "right": null},
            "error": null,
            "runtimeMs": 0.25
        });
        let result = judge_case(&registry, &sig, 0, &test, &record);
        assert!(result.passed);
        assert_eq!(result.actual, Some(json!([1, 2, 3])));
        assert_eq!(result.runtime_ms, 0.25);
    }

    #[test]
    fn test_judge_case_reports_thrown_error() {
        let registry = JudgeRegistry::default();
        let record = json!({"actual": {"$undefined": true}, "error": "TypeError: boom", "runtimeMs": 1});
        let result = judge_case(&registry, &signature(&[], "any"), 2, &case(json!([]), json!(1)), &record);
        assert!(!result.passed);
        assert_eq!(result.case, 2);
        assert_eq!(result.error.as_deref(), Some("TypeError: boom"));
    }

    #[test]
    fn test_mutating_case_uses_first_argument() {
        let registry = JudgeRegistry::default();
        let mut test = case(json!([[1, 1, 2]]), json!([1, 2]));
        test.judge_kind = JudgeKind::MutatingArrayWithK;
        let record = json!({"actual": 2, "mutated": [1, 2, 2], "error": null, "runtimeMs": 0});
        let result = judge_case(&registry, &signature(&["number[]"], "number"), 0, &test, &record);
        assert!(result.passed);
    }

    #[test]
    fn test_results_equal_regardless_of_runtime() {
        let test = case(json!([1]), json!(1));
        let a = TestResult::failed(0, &test, "x");
        let b = TestResult {
            runtime_ms: 9.0,
            ..a.clone()
        };
        assert_eq!(a, b);
    }
}
