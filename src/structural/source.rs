//! Source-text facts used by structural tests.

use oxc_allocator::Allocator;
use oxc_ast::ast::{CallExpression, Expression};
use oxc_ast_visit::{walk, Visit};

use crate::instrument::parse;

use super::pattern::{self, PatternError};
use super::DeclarationStyle;

/// `source` with every comment blanked out. Line structure is preserved.
/// Text that does not parse is returned unchanged.
pub fn strip_comments(source: &str) -> String {
    let text = parse::wrap(source);
    let allocator = Allocator::default();
    let Ok(program) = parse::parse(&allocator, &text, source) else {
        return source.to_string();
    };

    let offset = parse::WRAP_OPEN.len();
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for comment in &program.comments {
        let start = (comment.span.start as usize).saturating_sub(offset).min(source.len());
        let end = (comment.span.end as usize).saturating_sub(offset).min(source.len());
        if start < last {
            continue;
        }
        out.push_str(&source[last..start]);
        blank(&source[start..end], &mut out);
        last = end;
    }
    out.push_str(&source[last..]);
    out
}

fn blank(comment: &str, out: &mut String) {
    for c in comment.chars() {
        out.push(if c.is_whitespace() { c } else { ' ' });
    }
}

/// Argument text of every `console.log(...)` call, in source order.
pub fn console_log_arguments(source: &str) -> Vec<String> {
    let text = parse::wrap(source);
    let allocator = Allocator::default();
    let Ok(program) = parse::parse(&allocator, &text, source) else {
        return Vec::new();
    };
    let mut finder = ConsoleLogs {
        text: &text,
        calls: Vec::new(),
    };
    finder.visit_program(&program);
    finder.calls.sort_by_key(|(start, _)| *start);
    finder.calls.into_iter().map(|(_, args)| args).collect()
}

struct ConsoleLogs<'s> {
    text: &'s str,
    calls: Vec<(u32, String)>,
}

impl<'a> Visit<'a> for ConsoleLogs<'_> {
    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if let Expression::StaticMemberExpression(member) = &it.callee {
            let is_console = matches!(&member.object, Expression::Identifier(obj) if obj.name == "console");
            if is_console && member.property.name == "log" {
                let open = parse::skip_trivia(self.text, member.span.end as usize);
                let close = (it.span.end as usize).saturating_sub(1);
                if let Some(args) = self.text.get(open + 1..close) {
                    self.calls.push((it.span.start, args.trim().to_string()));
                }
            }
        }
        walk::walk_call_expression(self, it);
    }
}

/// Splits an argument or parameter list on top-level commas.
pub fn split_top_level(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut current = String::new();
    for c in list.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn escape_name(name: &str) -> String {
    name.replace('$', "\\$")
}

fn param_names(list: &str) -> Vec<String> {
    split_top_level(list)
        .into_iter()
        .map(|param| match param.split_once('=') {
            Some((name, _)) => name.trim().to_string(),
            None => param,
        })
        .filter(|param| !param.is_empty())
        .collect()
}

/// Parameter names of the first declaration of `name` in the given style,
/// or `None` when there is no such declaration.
pub fn declared_params(
    code: &str,
    name: &str,
    style: DeclarationStyle,
) -> Result<Option<Vec<String>>, PatternError> {
    let name = escape_name(name);
    let mut patterns = Vec::new();
    if matches!(style, DeclarationStyle::Function | DeclarationStyle::Either) {
        patterns.push(format!(r"\bfunction\s*\*?\s*{}\s*\(([^)]*)\)", name));
        patterns.push(format!(
            r"\b(?:const|let|var)\s+{}\s*=\s*(?:async\s+)?function\b[^(]*\(([^)]*)\)",
            name
        ));
    }
    if matches!(style, DeclarationStyle::Arrow | DeclarationStyle::Either) {
        patterns.push(format!(
            r"\b(?:const|let|var)\s+{}\s*=\s*(?:async\s*)?(?:\(([^)]*)\)|([A-Za-z_$][\w$]*))\s*=>",
            name
        ));
    }

    for source in patterns {
        let regex = pattern::compile(&source)?;
        let captures = regex.captures(code).map_err(|e| PatternError::Evaluation {
            pattern: source.clone(),
            message: e.to_string(),
        })?;
        if let Some(captures) = captures {
            let list = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            return Ok(Some(param_names(list)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments_keeps_code_and_lines() {
        let src = "let a = 1; // if (x) {}\n/* for (;;) */ let s = \"// not a comment\";";
        let stripped = strip_comments(src);
        assert!(!stripped.contains("if (x)"));
        assert!(!stripped.contains("for (;;)"));
        assert!(stripped.contains("\"// not a comment\""));
        assert_eq!(stripped.lines().count(), 2);
    }

    #[test]
    fn test_console_log_arguments_in_order() {
        let src = "console.log(x);\nif (y) { console.log(\"a\", f(1, 2)); }\nconsole.error(z);\nconsole.log([1, (2)]);";
        assert_eq!(
            console_log_arguments(src),
            vec!["x", "\"a\", f(1, 2)", "[1, (2)]"]
        );
    }

    #[test]
    fn test_console_log_arguments_with_templates_and_regexes() {
        let src = "const name = 'Ada';\nconsole.log(`Hello, ${name}!`);\nif (ok) /a/.test(s);\nconsole.log(`${`n: ${f(1)}`}`, /[)]/);";
        assert_eq!(
            console_log_arguments(src),
            vec!["`Hello, ${name}!`", "`${`n: ${f(1)}`}`, /[)]/"]
        );
    }

    #[test]
    fn test_strip_comments_ignores_comment_markers_in_regexes_and_templates() {
        let src = "const re = /\\/\\//; // trailing\nconst t = `/* ${x} */`;";
        let stripped = strip_comments(src);
        assert!(stripped.contains("/\\/\\//;"));
        assert!(stripped.contains("`/* ${x} */`"));
        assert!(!stripped.contains("trailing"));
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(
            split_top_level("a, [b, c], \"d,e\", f(g, h)"),
            vec!["a", "[b, c]", "\"d,e\"", "f(g, h)"]
        );
        assert!(split_top_level("  ").is_empty());
    }

    #[test]
    fn test_declaration_styles() {
        let code = "function add(a, b = 2) { return a + b }\nconst mul = (x, y) => x * y;\nlet sq = n => n * n;";
        assert_eq!(
            declared_params(code, "add", DeclarationStyle::Function).unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(declared_params(code, "add", DeclarationStyle::Arrow).unwrap(), None);
        assert_eq!(
            declared_params(code, "mul", DeclarationStyle::Either).unwrap(),
            Some(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(
            declared_params(code, "sq", DeclarationStyle::Arrow).unwrap(),
            Some(vec!["n".to_string()])
        );
        assert_eq!(declared_params(code, "mul", DeclarationStyle::Function).unwrap(), None);
    }
}
