//! Structural tests for guided lesson steps.
//!
//! A step passes when every one of its tests passes. Tests look at the
//! recorded variable history and calls, the console output, and the raw
//! source text; each is evaluated on its own, so a broken pattern in one
//! test only fails that test.

pub mod pattern;
pub mod source;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::convert::snapshot;
use crate::error::Result;
use crate::judge::normalize::values_equal;
use crate::sandbox::{ErrorKind, ExecutionController, ExecutionResult, TrackedData};

pub use pattern::{PatternComposer, PatternError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationStyle {
    /// `function name(...) {}` or `const name = function (...) {}`
    Function,
    /// `const name = (...) => ...`
    Arrow,
    #[default]
    Either,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElseIfClause {
    pub condition: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StructuralTest {
    #[serde(rename_all = "camelCase")]
    ConsoleOutput {
        patterns: Vec<String>,
        #[serde(default)]
        negate: bool,
        #[serde(default)]
        in_order: bool,
    },
    VariableAssignment {
        name: String,
        expected: Value,
    },
    VariableReassignment {
        name: String,
        #[serde(default)]
        expected: Option<Value>,
    },
    FunctionDeclaration {
        name: String,
        #[serde(default)]
        params: Option<Vec<String>>,
        #[serde(default)]
        style: DeclarationStyle,
    },
    #[serde(rename_all = "camelCase")]
    FunctionCall {
        name: String,
        #[serde(default)]
        count: Option<usize>,
        #[serde(default)]
        min_count: Option<usize>,
        #[serde(default)]
        args: Option<Vec<Value>>,
        #[serde(default)]
        negate: bool,
    },
    CodeContains {
        pattern: String,
        #[serde(default)]
        negate: bool,
    },
    #[serde(rename_all = "camelCase")]
    IfStatement {
        condition: String,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        else_ifs: Vec<ElseIfClause>,
        #[serde(default)]
        else_body: Option<String>,
    },
    ForLoop {
        #[serde(default)]
        init: Option<String>,
        #[serde(default)]
        condition: Option<String>,
        #[serde(default)]
        update: Option<String>,
        #[serde(default)]
        body: Option<String>,
    },
    WhileLoop {
        condition: String,
        #[serde(default)]
        body: Option<String>,
    },
    ConsoleLogPattern {
        pattern: String,
    },
    ConsoleLogVariable {
        name: String,
        #[serde(default)]
        expected: Option<Value>,
    },
}

impl StructuralTest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConsoleOutput { .. } => "console-output",
            Self::VariableAssignment { .. } => "variable-assignment",
            Self::VariableReassignment { .. } => "variable-reassignment",
            Self::FunctionDeclaration { .. } => "function-declaration",
            Self::FunctionCall { .. } => "function-call",
            Self::CodeContains { .. } => "code-contains",
            Self::IfStatement { .. } => "if-statement",
            Self::ForLoop { .. } => "for-loop",
            Self::WhileLoop { .. } => "while-loop",
            Self::ConsoleLogPattern { .. } => "console-log-pattern",
            Self::ConsoleLogVariable { .. } => "console-log-variable",
        }
    }

    /// Index-based tests are paired with `console.log` calls by position.
    pub fn is_index_based(&self) -> bool {
        matches!(
            self,
            Self::ConsoleLogPattern { .. } | Self::ConsoleLogVariable { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestOutcome {
    pub index: usize,
    pub kind: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub passed: bool,
    pub outcomes: Vec<TestOutcome>,
}

/// What one execution left behind.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    /// Source as written, before instrumentation
    pub source: &'a str,
    pub logs: &'a [String],
    pub tracked: Option<&'a TrackedData>,
}

impl<'a> StepInput<'a> {
    pub fn new(source: &'a str, execution: &'a ExecutionResult) -> Self {
        Self {
            source,
            logs: &execution.logs,
            tracked: execution.tracked.as_ref(),
        }
    }
}

type Check = std::result::Result<(), String>;

fn require(condition: bool, message: impl FnOnce() -> String) -> Check {
    if condition {
        Ok(())
    } else {
        Err(message())
    }
}

/// Evaluates every test against one execution.
pub fn evaluate_step(tests: &[StructuralTest], input: &StepInput<'_>) -> StepReport {
    let code = source::strip_comments(input.source);
    let log_calls = source::console_log_arguments(input.source);
    let mut next_log_call = 0;

    let outcomes: Vec<TestOutcome> = tests
        .iter()
        .enumerate()
        .map(|(index, test)| {
            let log_call = if test.is_index_based() {
                next_log_call += 1;
                Some((next_log_call - 1, log_calls.get(next_log_call - 1)))
            } else {
                None
            };
            let check = evaluate(test, input, &code, log_call);
            debug!(index = index, kind = test.kind(), passed = check.is_ok(), "Structural test evaluated");
            TestOutcome {
                index,
                kind: test.kind(),
                passed: check.is_ok(),
                message: check.err(),
            }
        })
        .collect();

    StepReport {
        passed: outcomes.iter().all(|o| o.passed),
        outcomes,
    }
}

/// Runs `code` and evaluates `tests` against it. A syntax error fails
/// every test.
pub async fn check_step(
    controller: &ExecutionController,
    code: &str,
    tests: &[StructuralTest],
    timeout: Duration,
) -> Result<(ExecutionResult, StepReport)> {
    let execution = controller.execute(code, timeout, None).await?;
    if execution.error_kind == Some(ErrorKind::Syntax) {
        let message = execution.error.clone().unwrap_or_default();
        let outcomes = tests
            .iter()
            .enumerate()
            .map(|(index, test)| TestOutcome {
                index,
                kind: test.kind(),
                passed: false,
                message: Some(message.clone()),
            })
            .collect();
        return Ok((
            execution,
            StepReport {
                passed: false,
                outcomes,
            },
        ));
    }
    let report = evaluate_step(tests, &StepInput::new(code, &execution));
    Ok((execution, report))
}

fn evaluate(
    test: &StructuralTest,
    input: &StepInput<'_>,
    code: &str,
    log_call: Option<(usize, Option<&String>)>,
) -> Check {
    match test {
        StructuralTest::ConsoleOutput {
            patterns,
            negate,
            in_order,
        } => console_output(input.logs, patterns, *negate, *in_order),

        StructuralTest::VariableAssignment { name, expected } => {
            let first = trace(input, name)?
                .first()
                .map(snapshot::to_plain)
                .ok_or_else(|| never_assigned(name))?;
            require(values_equal(&first, expected, false), || {
                format!("Expected `{}` to be assigned {}, found {}", name, expected, first)
            })
        }

        StructuralTest::VariableReassignment { name, expected } => {
            let trace = trace(input, name)?;
            require(trace.len() >= 2, || {
                format!("Expected `{}` to be reassigned after its first assignment", name)
            })?;
            let Some(expected) = expected else {
                return Ok(());
            };
            let last = input
                .tracked
                .and_then(|t| t.variables.get(name))
                .or_else(|| trace.last())
                .map(snapshot::to_plain)
                .unwrap_or(Value::Null);
            require(values_equal(&last, expected, false), || {
                format!("Expected `{}` to end up as {}, found {}", name, expected, last)
            })
        }

        StructuralTest::FunctionDeclaration {
            name,
            params,
            style,
        } => {
            let declared = source::declared_params(code, name, *style)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| match style {
                    DeclarationStyle::Function => {
                        format!("Declare `{}` with the `function` keyword", name)
                    }
                    DeclarationStyle::Arrow => format!("Declare `{}` as an arrow function", name),
                    DeclarationStyle::Either => format!("Declare a function named `{}`", name),
                })?;
            match params {
                Some(params) => require(&declared == params, || {
                    format!(
                        "Expected `{}` to take ({}), found ({})",
                        name,
                        params.join(", "),
                        declared.join(", ")
                    )
                }),
                None => Ok(()),
            }
        }

        StructuralTest::FunctionCall {
            name,
            count,
            min_count,
            args,
            negate,
        } => function_call(input.tracked, name, *count, *min_count, args.as_deref(), *negate),

        StructuralTest::CodeContains { pattern, negate } => {
            let regex = pattern::compile(pattern).map_err(|e| e.to_string())?;
            let found = pattern::is_match(&regex, input.source).map_err(|e| e.to_string())?;
            if *negate {
                require(!found, || format!("Code should not contain /{}/", pattern))
            } else {
                require(found, || format!("Code should contain /{}/", pattern))
            }
        }

        StructuralTest::IfStatement {
            condition,
            body,
            else_ifs,
            else_body,
        } => {
            let mut composer = PatternComposer::new()
                .fixed(r"\bif\s*\(\s*")
                .user(condition)
                .fixed(r"\s*\)\s*");
            composer = with_body(composer, body.as_deref());
            for clause in else_ifs {
                composer = composer
                    .fixed(r"\s*else\s+if\s*\(\s*")
                    .user(&clause.condition)
                    .fixed(r"\s*\)\s*");
                composer = with_body(composer, clause.body.as_deref());
            }
            if let Some(else_body) = else_body {
                composer = with_body(composer.fixed(r"\s*else\s*"), Some(else_body.as_str()));
            }
            structure_present(&composer, code, "if statement")
        }

        StructuralTest::ForLoop {
            init,
            condition,
            update,
            body,
        } => {
            let composer = PatternComposer::new()
                .fixed(r"\bfor\s*\(\s*")
                .user_or(init.as_deref(), r"[^;]*?")
                .fixed(r"\s*;\s*")
                .user_or(condition.as_deref(), r"[^;]*?")
                .fixed(r"\s*;\s*")
                .user_or(update.as_deref(), r"[^)]*?")
                .fixed(r"\s*\)\s*");
            structure_present(&with_body(composer, body.as_deref()), code, "for loop")
        }

        StructuralTest::WhileLoop { condition, body } => {
            let composer = PatternComposer::new()
                .fixed(r"\bwhile\s*\(\s*")
                .user(condition)
                .fixed(r"\s*\)\s*");
            structure_present(&with_body(composer, body.as_deref()), code, "while loop")
        }

        StructuralTest::ConsoleLogPattern { pattern } => {
            let (position, call) = log_call.unwrap_or((0, None));
            let args = call.ok_or_else(|| missing_log_call(position))?;
            let regex = pattern::compile(pattern).map_err(|e| e.to_string())?;
            let found = pattern::is_match(&regex, args).map_err(|e| e.to_string())?;
            require(found, || {
                format!(
                    "console.log call #{} logs `{}`, which does not match /{}/",
                    position + 1,
                    args,
                    pattern
                )
            })
        }

        StructuralTest::ConsoleLogVariable { name, expected } => {
            let (position, call) = log_call.unwrap_or((0, None));
            let args = call.ok_or_else(|| missing_log_call(position))?;
            let logs_variable = source::split_top_level(args).iter().any(|arg| arg == name);
            require(logs_variable, || {
                format!("console.log call #{} should log `{}`", position + 1, name)
            })?;
            let Some(expected) = expected else {
                return Ok(());
            };
            let seen = trace(input, name)?
                .iter()
                .any(|value| values_equal(&snapshot::to_plain(value), expected, false));
            require(seen, || format!("Expected `{}` to hold {} when logged", name, expected))
        }
    }
}

fn never_assigned(name: &str) -> String {
    format!("Variable `{}` was never assigned", name)
}

fn missing_log_call(position: usize) -> String {
    format!("Expected at least {} console.log call(s)", position + 1)
}

fn trace<'a>(input: &StepInput<'a>, name: &str) -> std::result::Result<&'a [Value], String> {
    input
        .tracked
        .and_then(|t| t.variable_trace.get(name))
        .map(Vec::as_slice)
        .filter(|trace| !trace.is_empty())
        .ok_or_else(|| never_assigned(name))
}

fn with_body(composer: PatternComposer, body: Option<&str>) -> PatternComposer {
    match body {
        Some(body) => composer
            .fixed(r"\{[\s\S]*?")
            .user(body)
            .fixed(r"[\s\S]*?\}"),
        None => composer.fixed(r"(?:\{[\s\S]*?\}|[^;{}]*;)"),
    }
}

fn structure_present(composer: &PatternComposer, code: &str, what: &str) -> Check {
    let regex = composer.build().map_err(|e| e.to_string())?;
    let found = pattern::is_match(&regex, code).map_err(|e| e.to_string())?;
    require(found, || format!("No {} matches the expected structure", what))
}

fn console_output(logs: &[String], patterns: &[String], negate: bool, in_order: bool) -> Check {
    let regexes = patterns
        .iter()
        .map(|p| pattern::compile(p))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    if negate {
        for (regex, source) in regexes.iter().zip(patterns) {
            for line in logs {
                if pattern::is_match(regex, line).map_err(|e| e.to_string())? {
                    return Err(format!("Console output should not match /{}/ (found `{}`)", source, line));
                }
            }
        }
        return Ok(());
    }

    let mut consumed = vec![false; logs.len()];
    let mut cursor = 0;
    for (regex, source) in regexes.iter().zip(patterns) {
        let start = if in_order { cursor } else { 0 };
        let mut matched = None;
        for (i, line) in logs.iter().enumerate().skip(start) {
            if !consumed[i] && pattern::is_match(regex, line).map_err(|e| e.to_string())? {
                matched = Some(i);
                break;
            }
        }
        let i = matched.ok_or_else(|| format!("No console output matches /{}/", source))?;
        consumed[i] = true;
        cursor = i + 1;
    }
    Ok(())
}

fn function_call(
    tracked: Option<&TrackedData>,
    name: &str,
    count: Option<usize>,
    min_count: Option<usize>,
    args: Option<&[Value]>,
    negate: bool,
) -> Check {
    let calls: Vec<_> = tracked.map(|t| t.calls_to(name).collect()).unwrap_or_default();
    if negate {
        return require(calls.is_empty(), || {
            format!("`{}` should not be called (called {} time(s))", name, calls.len())
        });
    }
    if let Some(count) = count {
        require(calls.len() == count, || {
            format!("Expected `{}` to be called {} time(s), found {}", name, count, calls.len())
        })?;
    }
    let min = min_count.unwrap_or(if count.is_some() { 0 } else { 1 });
    require(calls.len() >= min, || {
        format!("Expected `{}` to be called at least {} time(s), found {}", name, min, calls.len())
    })?;
    if let Some(expected) = args {
        let expected = Value::Array(expected.to_vec());
        let matched = calls.iter().any(|call| {
            let actual = Value::Array(call.args.iter().map(snapshot::to_plain).collect());
            values_equal(&actual, &expected, false)
        });
        require(matched, || format!("No call to `{}` was made with arguments {}", name, expected))?;
    }
    Ok(())
}
