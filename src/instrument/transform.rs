//! The rewrite pass: variable tracking, call tracking and loop checkpoints.
//!
//! Rewrites are text edits anchored at node spans; everything the pass does
//! not touch keeps the learner's own formatting.

use oxc_ast::ast::*;
use oxc_ast::AstKind;
use oxc_ast_visit::{walk, Visit};
use oxc_span::{GetSpan, Span};

use super::parse;
use super::InstrumentOptions;

/// Array methods that mutate their receiver in place.
pub const MUTATING_METHODS: &[&str] = &["push", "pop", "shift", "unshift", "splice", "sort", "reverse"];

/// Global functions whose calls are never recorded.
const BUILTIN_GLOBALS: &[&str] = &[
    "Array",
    "BigInt",
    "Boolean",
    "Date",
    "Error",
    "JSON",
    "Map",
    "Math",
    "Number",
    "Object",
    "Promise",
    "RangeError",
    "RegExp",
    "Set",
    "String",
    "Symbol",
    "SyntaxError",
    "TypeError",
    "WeakMap",
    "WeakSet",
    "alert",
    "clearInterval",
    "clearTimeout",
    "console",
    "decodeURI",
    "decodeURIComponent",
    "encodeURI",
    "encodeURIComponent",
    "eval",
    "isFinite",
    "isNaN",
    "parseFloat",
    "parseInt",
    "prompt",
    "queueMicrotask",
    "require",
    "setImmediate",
    "setInterval",
    "setTimeout",
    "structuredClone",
];

/// Order of edits sharing an offset. Text closing the previous statement
/// comes before text opening the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Track,
    Close,
    Expose,
    Open,
    Checkpoint,
    Prefix,
    Replace,
}

#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    rank: Rank,
    text: String,
}

pub struct Rewriter<'s> {
    text: &'s str,
    options: &'s InstrumentOptions,
    edits: Vec<Edit>,
    async_contexts: Vec<bool>,
}

impl<'s> Rewriter<'s> {
    pub fn new(text: &'s str, options: &'s InstrumentOptions) -> Self {
        Self {
            text,
            options,
            edits: Vec::new(),
            async_contexts: Vec::new(),
        }
    }

    /// Hands the harness one getter per top-level function, after the
    /// directive prologue so `"use strict"` keeps its effect.
    pub fn expose(&mut self, body: &FunctionBody<'_>, names: &[String]) {
        let mut call = String::from("__expose({");
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                call.push(',');
            }
            call.push_str(&format!(" {}: () => {}", quote(name), name));
        }
        call.push_str(if names.is_empty() { "});" } else { " });" });

        match body.directives.last() {
            Some(directive) => {
                let sep = if self.source_of(directive.span).ends_with(';') { "\n" } else { ";\n" };
                self.insert(directive.span.end as usize, Rank::Expose, format!("{}{}", sep, call));
            }
            None => self.insert(parse::WRAP_OPEN.len(), Rank::Expose, format!("{}\n", call)),
        }
    }

    /// Applies every edit and returns the rewritten text.
    pub fn finish(mut self) -> String {
        self.edits.sort_by_key(|edit| (edit.start, edit.rank));
        let extra: usize = self.edits.iter().map(|edit| edit.text.len()).sum();
        let mut out = String::with_capacity(self.text.len() + extra);
        let mut cursor = 0;
        for edit in &self.edits {
            if edit.start >= cursor {
                out.push_str(self.text.get(cursor..edit.start).unwrap_or_default());
                cursor = edit.start;
            }
            out.push_str(&edit.text);
            cursor = cursor.max(edit.end);
        }
        out.push_str(self.text.get(cursor..).unwrap_or_default());
        out
    }

    fn insert(&mut self, at: usize, rank: Rank, text: String) {
        self.edits.push(Edit {
            start: at,
            end: at,
            rank,
            text,
        });
    }

    fn replace(&mut self, start: usize, end: usize, text: String) {
        self.edits.push(Edit {
            start,
            end,
            rank: Rank::Replace,
            text,
        });
    }

    fn source_of(&self, span: Span) -> &'s str {
        self.text
            .get(span.start as usize..span.end as usize)
            .unwrap_or_default()
    }

    fn in_async(&self) -> bool {
        self.async_contexts.last().copied().unwrap_or(false)
    }

    fn checkpoint(&self) -> &'static str {
        if self.in_async() {
            "if (__shouldCancel()) break; await __yield();"
        } else {
            "if (__shouldCancel()) break;"
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Visits a statement in a single-statement position, bracing it when
    /// a checkpoint has to precede it or tracking has to follow it.
    fn visit_nested(&mut self, body: &Statement<'_>, is_loop: bool) {
        let checkpoint = (is_loop && self.options.inject_yields).then(|| self.checkpoint());
        let tracks = self.options.track_variables && !written_names(body).is_empty();
        match body {
            Statement::BlockStatement(block) => {
                if let Some(check) = checkpoint {
                    self.insert(block.span.start as usize + 1, Rank::Checkpoint, format!(" {}", check));
                }
            }
            _ if checkpoint.is_some() || tracks => {
                let span = body.span();
                let open = match checkpoint {
                    Some(check) => format!("{{ {} ", check),
                    None => "{ ".to_string(),
                };
                self.insert(span.start as usize, Rank::Open, open);
                self.insert(span.end as usize, Rank::Close, " }".to_string());
            }
            _ => {}
        }
        self.visit_statement(body);
    }

    fn track_after(&mut self, span: Span, names: &[String]) {
        let mut text = String::new();
        if !self.source_of(span).ends_with(';') {
            text.push(';');
        }
        for name in names {
            text.push_str(&format!(" __trackVariable({}, {});", quote(name), name));
        }
        self.insert(span.end as usize, Rank::Track, text);
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn track_call(&mut self, call: &CallExpression<'_>) {
        if call.optional {
            return;
        }
        match &call.callee {
            Expression::Identifier(ident) => {
                let name = ident.name.as_str();
                if !self.options.track_calls
                    || name.starts_with("__")
                    || BUILTIN_GLOBALS.contains(&name)
                    || call.arguments.iter().any(is_function_argument)
                {
                    return;
                }
                let end = ident.span.end as usize;
                self.wrap_call(
                    call,
                    end,
                    end,
                    format!("__trackCall({}, {}, ", quote(name), name),
                    ", [".to_string(),
                );
            }
            Expression::StaticMemberExpression(member) => {
                let method = member.property.name.as_str();
                if member.optional
                    || !(self.options.track_calls || self.options.track_variables)
                    || !MUTATING_METHODS.contains(&method)
                {
                    return;
                }
                let Some(root) = root_identifier(&member.object) else {
                    return;
                };
                if root.starts_with("__") {
                    return;
                }
                self.wrap_call(
                    call,
                    member.object.span().end as usize,
                    member.span.end as usize,
                    format!("__trackMutation({}, {}, ", quote(root), root),
                    format!(", {}, [", quote(method)),
                );
            }
            _ => {}
        }
    }

    /// Turns `callee(args)` into `prefix callee-head separator args])`:
    /// `prefix` lands before the call, `[from, open paren]` is replaced by
    /// `separator` and the closing paren becomes `])`.
    fn wrap_call(
        &mut self,
        call: &CallExpression<'_>,
        from: usize,
        callee_end: usize,
        prefix: String,
        separator: String,
    ) {
        let bytes = self.text.as_bytes();
        let open = parse::skip_trivia(self.text, callee_end);
        let close = (call.span.end as usize).saturating_sub(1);
        if bytes.get(open) != Some(&b'(') || bytes.get(close) != Some(&b')') || close < open {
            return;
        }
        self.insert(call.span.start as usize, Rank::Prefix, prefix);
        self.replace(from, open + 1, separator);
        self.replace(close, close + 1, "])".to_string());
    }
}

impl<'a> Visit<'a> for Rewriter<'_> {
    fn enter_node(&mut self, kind: AstKind<'a>) {
        match kind {
            AstKind::Function(func) => self.async_contexts.push(func.r#async),
            AstKind::ArrowFunctionExpression(arrow) => self.async_contexts.push(arrow.r#async),
            AstKind::PropertyDefinition(_) | AstKind::AccessorProperty(_) | AstKind::StaticBlock(_) => {
                self.async_contexts.push(false)
            }
            _ => {}
        }
    }

    fn leave_node(&mut self, kind: AstKind<'a>) {
        if matches!(
            kind,
            AstKind::Function(_)
                | AstKind::ArrowFunctionExpression(_)
                | AstKind::PropertyDefinition(_)
                | AstKind::AccessorProperty(_)
                | AstKind::StaticBlock(_)
        ) {
            self.async_contexts.pop();
        }
    }

    fn visit_statement(&mut self, it: &Statement<'a>) {
        walk::walk_statement(self, it);
        if self.options.track_variables {
            let names = written_names(it);
            if !names.is_empty() {
                self.track_after(it.span(), &names);
            }
        }
    }

    fn visit_if_statement(&mut self, it: &IfStatement<'a>) {
        self.visit_expression(&it.test);
        self.visit_nested(&it.consequent, false);
        if let Some(alternate) = &it.alternate {
            self.visit_nested(alternate, false);
        }
    }

    fn visit_labeled_statement(&mut self, it: &LabeledStatement<'a>) {
        self.visit_nested(&it.body, false);
    }

    fn visit_with_statement(&mut self, it: &WithStatement<'a>) {
        self.visit_expression(&it.object);
        self.visit_nested(&it.body, false);
    }

    fn visit_while_statement(&mut self, it: &WhileStatement<'a>) {
        self.visit_expression(&it.test);
        self.visit_nested(&it.body, true);
    }

    fn visit_do_while_statement(&mut self, it: &DoWhileStatement<'a>) {
        self.visit_nested(&it.body, true);
        self.visit_expression(&it.test);
    }

    // Loop headers are visited for calls but never tracked
    fn visit_for_statement(&mut self, it: &ForStatement<'a>) {
        if let Some(init) = &it.init {
            self.visit_for_statement_init(init);
        }
        if let Some(test) = &it.test {
            self.visit_expression(test);
        }
        if let Some(update) = &it.update {
            self.visit_expression(update);
        }
        self.visit_nested(&it.body, true);
    }

    fn visit_for_in_statement(&mut self, it: &ForInStatement<'a>) {
        self.visit_for_statement_left(&it.left);
        self.visit_expression(&it.right);
        self.visit_nested(&it.body, true);
    }

    fn visit_for_of_statement(&mut self, it: &ForOfStatement<'a>) {
        self.visit_for_statement_left(&it.left);
        self.visit_expression(&it.right);
        self.visit_nested(&it.body, true);
    }

    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        self.track_call(it);
        walk::walk_call_expression(self, it);
    }
}

fn quote(name: &str) -> String {
    serde_json::to_string(name).unwrap_or_else(|_| format!("\"{}\"", name))
}

fn is_function_argument(arg: &Argument<'_>) -> bool {
    arg.as_expression()
        .is_some_and(|expr| expr.without_parentheses().is_function())
}

/// The identifier at the base of `a.b[c].d`, if the chain has no optional
/// links.
fn root_identifier<'a>(mut expr: &Expression<'a>) -> Option<&'a str> {
    loop {
        expr = match expr {
            Expression::Identifier(ident) => return Some(ident.name.as_str()),
            Expression::ParenthesizedExpression(paren) => &paren.expression,
            Expression::StaticMemberExpression(member) if !member.optional => &member.object,
            Expression::ComputedMemberExpression(member) if !member.optional => &member.object,
            _ => return None,
        };
    }
}

/// Variables a statement writes: initialized declarations and assignment
/// or update expression statements. Deduplicated, internals excluded.
fn written_names(stmt: &Statement<'_>) -> Vec<String> {
    let mut names = Vec::new();
    match stmt {
        Statement::VariableDeclaration(decl) => {
            for declarator in decl.declarations.iter().filter(|d| d.init.is_some()) {
                for ident in declarator.id.get_binding_identifiers() {
                    names.push(ident.name.to_string());
                }
            }
        }
        Statement::ExpressionStatement(stmt) => expression_writes(&stmt.expression, &mut names),
        _ => {}
    }
    let mut unique: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !name.starts_with("__") && !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

fn expression_writes(expr: &Expression<'_>, names: &mut Vec<String>) {
    match expr {
        Expression::AssignmentExpression(assign) => {
            target_names(&assign.left, names);
            expression_writes(&assign.right, names);
        }
        Expression::UpdateExpression(update) => match &update.argument {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(ident) => {
                names.push(ident.name.to_string())
            }
            SimpleAssignmentTarget::StaticMemberExpression(member) => push_root(&member.object, names),
            SimpleAssignmentTarget::ComputedMemberExpression(member) => push_root(&member.object, names),
            _ => {}
        },
        Expression::SequenceExpression(seq) => {
            for item in &seq.expressions {
                expression_writes(item, names);
            }
        }
        Expression::ParenthesizedExpression(paren) => expression_writes(&paren.expression, names),
        _ => {}
    }
}

fn push_root(object: &Expression<'_>, names: &mut Vec<String>) {
    if let Some(root) = root_identifier(object) {
        names.push(root.to_string());
    }
}

fn target_names(target: &AssignmentTarget<'_>, names: &mut Vec<String>) {
    match target {
        AssignmentTarget::AssignmentTargetIdentifier(ident) => names.push(ident.name.to_string()),
        AssignmentTarget::StaticMemberExpression(member) => push_root(&member.object, names),
        AssignmentTarget::ComputedMemberExpression(member) => push_root(&member.object, names),
        AssignmentTarget::ArrayAssignmentTarget(array) => {
            for element in array.elements.iter().flatten() {
                maybe_default_names(element, names);
            }
            if let Some(rest) = &array.rest {
                target_names(&rest.target, names);
            }
        }
        AssignmentTarget::ObjectAssignmentTarget(object) => {
            for prop in &object.properties {
                match prop {
                    AssignmentTargetProperty::AssignmentTargetPropertyIdentifier(p) => {
                        names.push(p.binding.name.to_string())
                    }
                    AssignmentTargetProperty::AssignmentTargetPropertyProperty(p) => {
                        maybe_default_names(&p.binding, names)
                    }
                }
            }
            if let Some(rest) = &object.rest {
                target_names(&rest.target, names);
            }
        }
        _ => {}
    }
}

fn maybe_default_names(target: &AssignmentTargetMaybeDefault<'_>, names: &mut Vec<String>) {
    match target {
        AssignmentTargetMaybeDefault::AssignmentTargetWithDefault(with_default) => {
            target_names(&with_default.binding, names)
        }
        other => {
            if let Some(target) = other.as_assignment_target() {
                target_names(target, names);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{instrument, InstrumentOptions};

    fn body(src: &str) -> String {
        instrument(src, &InstrumentOptions::default()).unwrap().code
    }

    fn with(src: &str, options: InstrumentOptions) -> String {
        instrument(src, &options).unwrap().code
    }

    #[test]
    fn test_tracks_declarations_and_assignments() {
        let out = body("let x = 1;\nx = 2;\nx++;\nlet y;\nlet z = 3");
        assert!(out.contains("let x = 1; __trackVariable(\"x\", x);\n"));
        assert!(out.contains("x = 2; __trackVariable(\"x\", x);\n"));
        assert!(out.contains("x++; __trackVariable(\"x\", x);\n"));
        assert!(out.contains("let z = 3; __trackVariable(\"z\", z);"));
        assert!(!out.contains("__trackVariable(\"y\""));
    }

    #[test]
    fn test_tracks_destructuring_and_member_roots() {
        let out = body("const [a, {b, c: d}] = v;\nobj.count = 3;\nm[0] = 1;\n[p, q] = [q, p];");
        for name in ["a", "b", "d", "obj", "m", "p", "q"] {
            assert!(
                out.contains(&format!("__trackVariable(\"{}\", {});", name, name)),
                "missing {} in {}",
                name,
                out
            );
        }
        assert!(!out.contains("__trackVariable(\"c\""));
    }

    #[test]
    fn test_loop_header_is_not_tracked() {
        let out = with(
            "for (let i = 0; i < 3; i++) {}",
            InstrumentOptions {
                inject_yields: false,
                ..Default::default()
            },
        );
        assert!(!out.contains("__trackVariable"));
    }

    #[test]
    fn test_wraps_single_statement_bodies() {
        let out = body("if (ok) total = 1;\nelse total = 2");
        assert!(out.contains("if (ok) { total = 1; __trackVariable(\"total\", total); }"));
        assert!(out.contains("else { total = 2; __trackVariable(\"total\", total); }"));
    }

    #[test]
    fn test_call_tracking_rewrites_identifier_calls() {
        let out = body("const r = add(1, double(2));");
        assert!(out.contains(
            "const r = __trackCall(\"add\", add, [1, __trackCall(\"double\", double, [2])]);"
        ));
    }

    #[test]
    fn test_call_tracking_skips() {
        let out = body("console.log(x); parseInt(s); __yield(); run(() => 1); maybe?.(1); obj.go(2);");
        assert!(!out.contains("__trackCall"));
    }

    #[test]
    fn test_function_arguments_are_still_traversed() {
        let out = body("run(() => helper(1));");
        assert!(out.contains("run(() => __trackCall(\"helper\", helper, [1]));"));
    }

    #[test]
    fn test_mutating_methods() {
        let out = body("arr.push(4, 5);\ngrid[0].sort();\nlist?.push(1);\nbox?.items.push(2);");
        assert!(out.contains("__trackMutation(\"arr\", arr, arr, \"push\", [4, 5]);"));
        assert!(out.contains("__trackMutation(\"grid\", grid, grid[0], \"sort\", []);"));
        assert!(out.contains("list?.push(1);"));
        assert!(out.contains("box?.items.push(2);"));
    }

    #[test]
    fn test_template_substitutions() {
        let out = body("const name = 'Ada';\nconsole.log(`Hello, ${name}!`);");
        assert!(out.contains("console.log(`Hello, ${name}!`);"));

        let out = body("const s = `outer ${`inner ${greet(name)}`} end`;");
        assert!(out.contains(
            "const s = `outer ${`inner ${__trackCall(\"greet\", greet, [name])}`} end`; __trackVariable(\"s\", s);"
        ));
    }

    #[test]
    fn test_regex_literals_and_division() {
        let out = body("if (ok) /a/.test(s);\nlet r = a / b / c;\nconst re = /[/(]+/g;");
        assert!(out.contains("if (ok) /a/.test(s);"));
        assert!(out.contains("let r = a / b / c; __trackVariable(\"r\", r);"));
        assert!(out.contains("const re = /[/(]+/g;"));
    }

    #[test]
    fn test_comments_and_strings_are_untouched() {
        let out = body("// f(1)\nconst s = \"g(2)\"; /* x = 3 */");
        assert!(out.contains("// f(1)\n"));
        assert!(out.contains("const s = \"g(2)\"; __trackVariable(\"s\", s); /* x = 3 */"));
        assert!(!out.contains("__trackCall"));
    }

    #[test]
    fn test_loop_checkpoints_in_async_context() {
        let out = with("while (true) { n++ }", InstrumentOptions::yields_only());
        assert!(out.contains("while (true) { if (__shouldCancel()) break; await __yield(); n++ }"));
    }

    #[test]
    fn test_sync_functions_get_check_without_await() {
        let out = with(
            "function spin() { for (;;) {} }\nasync function wait() { do {} while (x) }\nconst f = () => { while (a) {} }",
            InstrumentOptions::yields_only(),
        );
        let spin = out.find("function spin").unwrap();
        let wait = out.find("async function wait").unwrap();
        let arrow = out.find("const f").unwrap();
        assert!(!out[spin..wait].contains("await __yield()"));
        assert!(out[spin..wait].contains("if (__shouldCancel()) break;"));
        assert!(out[wait..arrow].contains("await __yield();"));
        assert!(!out[arrow..].contains("await __yield()"));
    }

    #[test]
    fn test_single_statement_loop_body() {
        let out = with("for (const x of xs) sum += x;", InstrumentOptions::yields_only());
        assert!(out.contains(
            "for (const x of xs) { if (__shouldCancel()) break; await __yield(); sum += x; }"
        ));
    }

    #[test]
    fn test_labeled_loops_keep_their_label() {
        let out = with(
            "outer: for (const a of xs) for (const b of ys) continue outer;",
            InstrumentOptions::yields_only(),
        );
        assert!(out.contains("outer: for (const a of xs) { if (__shouldCancel()) break;"));
    }

    #[test]
    fn test_all_passes_disabled_is_identity() {
        let src = "let a = f(1);\nwhile (a) a--;";
        let out = with(
            src,
            InstrumentOptions {
                track_variables: false,
                track_calls: false,
                inject_yields: false,
            },
        );
        assert!(out.contains(src));
    }
}
