//! Parsing learner programs with `oxc_parser`.
//!
//! Programs are parsed inside the `__program` wrapper they will run in, so
//! top-level `await` and `return` are accepted exactly as they run. Every
//! span in the parsed tree indexes the wrapped text.

use oxc_allocator::Allocator;
use oxc_ast::ast::{FunctionBody, Program, Statement};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};

use super::TransformError;

pub const WRAP_OPEN: &str = "async function __program(__expose) {\n";
pub const WRAP_CLOSE: &str = "\n}\n";

pub fn wrap(source: &str) -> String {
    let mut text = String::with_capacity(WRAP_OPEN.len() + source.len() + WRAP_CLOSE.len());
    text.push_str(WRAP_OPEN);
    text.push_str(source);
    text.push_str(WRAP_CLOSE);
    text
}

/// Parses `text`, the output of [`wrap`] for `source`. Errors carry
/// positions in `source`.
pub fn parse<'a>(
    allocator: &'a Allocator,
    text: &'a str,
    source: &str,
) -> Result<Program<'a>, TransformError> {
    let ret = Parser::new(allocator, text, SourceType::script()).parse();
    if let Some(error) = ret.errors.first() {
        let offset = error
            .labels
            .as_ref()
            .and_then(|labels| labels.first())
            .map(|label| label.offset())
            .unwrap_or(text.len());
        return Err(error_at(&error.message, source, offset));
    }

    // A stray `}` closes the wrapper early and leaves statements after it
    if ret.program.body.len() != 1 {
        let offset = ret
            .program
            .body
            .first()
            .map(|wrapper| wrapper.span().end as usize)
            .unwrap_or(text.len())
            .saturating_sub(1);
        return Err(error_at("Unexpected token `}`", source, offset));
    }
    Ok(ret.program)
}

/// The body of the `__program` wrapper.
pub fn wrapper_body<'p, 'a>(program: &'p Program<'a>) -> Option<&'p FunctionBody<'a>> {
    match program.body.first()? {
        Statement::FunctionDeclaration(func) => func.body.as_deref(),
        _ => None,
    }
}

fn error_at(message: &str, source: &str, offset: usize) -> TransformError {
    let user = offset.saturating_sub(WRAP_OPEN.len()).min(source.len());
    let before = source.get(..user).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    TransformError::new(message, line, column)
}

/// Offset of the first byte at or after `from` that is neither whitespace
/// nor inside a comment.
pub fn skip_trivia(text: &str, from: usize) -> usize {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = text[i..].find('\n').map_or(bytes.len(), |n| i + n);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = text[i + 2..].find("*/").map_or(bytes.len(), |n| i + n + 4);
            }
            _ => break,
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_err(source: &str) -> TransformError {
        let text = wrap(source);
        let allocator = Allocator::default();
        parse(&allocator, &text, source).unwrap_err()
    }

    #[test]
    fn test_accepts_top_level_await_and_return() {
        let source = "const v = await Promise.resolve(1);\nif (v) return;";
        let text = wrap(source);
        let allocator = Allocator::default();
        let program = parse(&allocator, &text, source).unwrap();
        assert_eq!(wrapper_body(&program).unwrap().statements.len(), 2);
    }

    #[test]
    fn test_error_positions_are_in_user_source() {
        let err = parse_err("let a = 1;\nlet b = ;");
        assert_eq!(err.line, 2);
        assert!(err.column > 1);
    }

    #[test]
    fn test_stray_brace_cannot_escape_the_wrapper() {
        let err = parse_err("} function g() {");
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 1);
    }

    #[test]
    fn test_skip_trivia() {
        let text = "f /* ( */ // x\n  (1)";
        assert_eq!(&text[skip_trivia(text, 1)..], "(1)");
        assert_eq!(skip_trivia("  ", 0), 2);
    }
}
