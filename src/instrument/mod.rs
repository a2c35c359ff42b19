//! Source-to-source instrumentation of learner JavaScript.
//!
//! The output is the user's program wrapped as
//! `async function __program(__expose) { ... }`. The first statement of the
//! body hands the harness one getter per top-level function so it can
//! capture them after the run, regardless of block scoping.

pub mod parse;
pub mod transform;

use oxc_allocator::Allocator;
use oxc_ast::ast::{Expression, FunctionBody, Statement};
use oxc_ast_visit::Visit;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use transform::Rewriter;

/// A syntax error found while instrumenting, with a 1-based position.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("SyntaxError: {message} ({line}:{column})")]
pub struct TransformError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl TransformError {
    pub fn new(message: &str, line: usize, column: usize) -> Self {
        Self {
            message: message.to_string(),
            line,
            column,
        }
    }
}

/// Which rewrite passes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentOptions {
    pub track_variables: bool,
    pub track_calls: bool,
    pub inject_yields: bool,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            track_variables: true,
            track_calls: true,
            inject_yields: true,
        }
    }
}

impl InstrumentOptions {
    /// Only cancellation checkpoints; used for generated test scripts.
    pub fn yields_only() -> Self {
        Self {
            track_variables: false,
            track_calls: false,
            inject_yields: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instrumented {
    /// The `__program` function declaration.
    pub code: String,
    /// Top-level function names, in declaration order.
    pub function_names: Vec<String>,
}

pub fn instrument(source: &str, options: &InstrumentOptions) -> Result<Instrumented, TransformError> {
    let text = parse::wrap(source);
    let allocator = Allocator::default();
    let program = parse::parse(&allocator, &text, source)?;
    let body = parse::wrapper_body(&program)
        .ok_or_else(|| TransformError::new("Unexpected end of input", 1, 1))?;
    let function_names = detect_function_names(body);

    let mut rewriter = Rewriter::new(&text, options);
    rewriter.expose(body, &function_names);
    rewriter.visit_program(&program);
    let code = rewriter.finish();

    debug!(
        functions = function_names.len(),
        bytes = code.len(),
        "Instrumented program"
    );
    Ok(Instrumented {
        code,
        function_names,
    })
}

/// Parses without transforming, for syntax validation.
pub fn check_syntax(source: &str) -> Result<(), TransformError> {
    let text = parse::wrap(source);
    let allocator = Allocator::default();
    parse::parse(&allocator, &text, source).map(|_| ())
}

/// Parses `source` and returns its top-level function names.
pub fn function_names(source: &str) -> Result<Vec<String>, TransformError> {
    let text = parse::wrap(source);
    let allocator = Allocator::default();
    let program = parse::parse(&allocator, &text, source)?;
    Ok(parse::wrapper_body(&program)
        .map(detect_function_names)
        .unwrap_or_default())
}

/// Names of top-level function declarations and of top-level variables
/// initialized with a function or arrow expression.
pub fn detect_function_names(body: &FunctionBody<'_>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !name.starts_with("__") && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };

    for stmt in &body.statements {
        match stmt {
            Statement::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    push(id.name.as_str());
                }
            }
            Statement::VariableDeclaration(decl) => {
                for declarator in &decl.declarations {
                    let (Some(name), Some(init)) = (declarator.id.get_identifier_name(), &declarator.init)
                    else {
                        continue;
                    };
                    if matches!(
                        init.without_parentheses(),
                        Expression::FunctionExpression(_) | Expression::ArrowFunctionExpression(_)
                    ) {
                        push(name.as_str());
                    }
                }
            }
            _ => {}
        }
    }
    names
}
