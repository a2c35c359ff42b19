//! Composition of JavaScript-style regular expressions.
//!
//! Structural tests glue learner-facing sub-patterns (a condition, a body,
//! each `else if` clause) into one expression. Backreferences inside a
//! sub-pattern count from that sub-pattern's own first group, so every
//! `\N` is shifted by the number of capture groups that precede it in the
//! composed expression.

use fancy_regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Invalid pattern /{pattern}/: {message}")]
    Invalid { pattern: String, message: String },

    #[error("Pattern /{pattern}/ could not be evaluated: {message}")]
    Evaluation { pattern: String, message: String },
}

#[derive(Debug, Clone)]
enum Part {
    /// Scaffolding written by the evaluator; never contains capture groups
    Fixed(String),
    /// A sub-pattern from test content
    User(String),
}

/// Accumulates parts, then composes them in one pass.
#[derive(Debug, Clone, Default)]
pub struct PatternComposer {
    parts: Vec<Part>,
}

impl PatternComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fixed(mut self, text: &str) -> Self {
        self.parts.push(Part::Fixed(text.to_string()));
        self
    }

    pub fn user(mut self, pattern: &str) -> Self {
        self.parts.push(Part::User(pattern.to_string()));
        self
    }

    /// The user pattern if given, otherwise `fallback`.
    pub fn user_or(self, pattern: Option<&str>, fallback: &str) -> Self {
        match pattern {
            Some(pattern) => self.user(pattern),
            None => self.fixed(fallback),
        }
    }

    /// Renders the expression, threading the capture-group count through
    /// the parts.
    pub fn compose(&self) -> String {
        let (out, _) = self
            .parts
            .iter()
            .fold((String::new(), 0usize), |(mut out, groups), part| match part {
                Part::Fixed(text) => {
                    out.push_str(text);
                    (out, groups)
                }
                Part::User(pattern) => {
                    out.push_str("(?:");
                    out.push_str(&shift_backreferences(pattern, groups));
                    out.push(')');
                    (out, groups + count_capture_groups(pattern))
                }
            });
        out
    }

    pub fn build(&self) -> Result<Regex, PatternError> {
        compile(&self.compose())
    }
}

/// Number of capturing groups, named ones included.
pub fn count_capture_groups(pattern: &str) -> usize {
    let chars: Vec<char> = pattern.chars().collect();
    let mut count = 0;
    let mut in_class = false;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => {
                if chars.get(i + 1) != Some(&'?') {
                    count += 1;
                } else if is_named_group(&chars[i + 2..]) {
                    count += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    count
}

/// `(?<name>` or `(?P<name>`, but not the lookbehinds `(?<=` and `(?<!`.
fn is_named_group(after_question: &[char]) -> bool {
    match after_question {
        ['<', next, ..] => *next != '=' && *next != '!',
        ['P', '<', ..] => true,
        _ => false,
    }
}

/// Adds `offset` to every numbered backreference outside character
/// classes. `\0` is a null character, not a reference.
pub fn shift_backreferences(pattern: &str, offset: usize) -> String {
    if offset == 0 {
        return pattern.to_string();
    }
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut in_class = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            let next = chars.get(i + 1).copied();
            match next {
                Some(d) if !in_class && d.is_ascii_digit() && d != '0' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end].is_ascii_digit() {
                        end += 1;
                    }
                    let digits: String = chars[start..end].iter().collect();
                    match digits.parse::<usize>() {
                        Ok(n) => out.push_str(&format!("\\{}", n + offset)),
                        Err(_) => {
                            out.push('\\');
                            out.push_str(&digits);
                        }
                    }
                    i = end;
                    continue;
                }
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                    i += 2;
                    continue;
                }
                None => {
                    out.push('\\');
                    i += 1;
                    continue;
                }
            }
        }
        match c {
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            _ => {}
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Rewrites the few JavaScript spellings the regex engine reads
/// differently.
fn to_engine_syntax(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                // `\/` only exists to survive regex literal delimiters
                Some('/') => out.push('/'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
            continue;
        }
        out.push(c);
    }
    out
}

pub fn compile(pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(&to_engine_syntax(pattern)).map_err(|e| PatternError::Invalid {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

pub fn is_match(regex: &Regex, text: &str) -> Result<bool, PatternError> {
    regex.is_match(text).map_err(|e| PatternError::Evaluation {
        pattern: regex.as_str().to_string(),
        message: e.to_string(),
    })
}
