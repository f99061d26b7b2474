//! # Parameter Refactoring
//!
//! Expands sequence-valued arguments into `IN (...)` placeholder groups before
//! a statement is built.
//!
//! ```text
//! positional:  "a = ? AND b IN ?"     [5, [1, 2, 3]]
//!          ->  "a = ? AND b IN (?, ?, ?)"   [5, 1, 2, 3]
//!
//! named:       "a = :x AND b IN :y"   {x: 5, y: [1, 2, 3]}
//!          ->  "a = :x AND b IN (:y_000, :y_001, :y_002)"
//!                                     {x: 5, y_000: 1, y_001: 2, y_002: 3}
//! ```
//!
//! Non-sequence arguments pass through unchanged, and placeholders inside
//! quoted literals are left alone. When no argument is a sequence the input
//! is returned as-is.

use std::collections::BTreeMap;

use crate::types::{Arguments, Value};

/// Sigils accepted in front of named parameters.
const SIGILS: [char; 3] = [':', '@', '$'];

/// Rewrites `condition` and `arguments` so that no argument is a sequence.
pub fn refactor(condition: &str, arguments: &Arguments) -> (String, Arguments) {
    match arguments {
        Arguments::None => (condition.to_string(), Arguments::None),
        Arguments::Positional(args) => {
            let (condition, args) = positional(condition, args);
            (condition, Arguments::Positional(args))
        }
        Arguments::Named(args) => {
            let (condition, args) = named(condition, args);
            (condition, Arguments::Named(args))
        }
    }
}

// =============================================================================
// Positional
// =============================================================================

/// Expands the `?` matching each sequence argument (by position) into a group
/// of as many `?` as the sequence has elements, and splices the elements into
/// the argument list in place.
pub fn positional(condition: &str, args: &[Value]) -> (String, Vec<Value>) {
    if !args.iter().any(Value::is_sequence) {
        return (condition.to_string(), args.to_vec());
    }

    let mut rewritten = String::with_capacity(condition.len() + args.len() * 3);
    let mut index = 0usize;

    for segment in scan(condition) {
        match segment {
            Segment::Text(text) => rewritten.push_str(text),
            Segment::Placeholder => {
                match args.get(index) {
                    Some(Value::Sequence(items)) => rewritten.push_str(&group(
                        items.len(),
                        |_| "?".to_string(),
                    )),
                    _ => rewritten.push('?'),
                }
                index += 1;
            }
        }
    }

    let mut flat = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Sequence(items) => flat.extend(items.iter().cloned()),
            other => flat.push(other.clone()),
        }
    }

    (rewritten, flat)
}

// =============================================================================
// Named
// =============================================================================

/// Replaces every standalone occurrence of a sequence argument's name with a
/// group of synthesized names (`name_000`, `name_001`, ...), adding one entry
/// per synthesized name and dropping the original.
///
/// Keys in `args` carry no sigil; the sigil used in the condition is kept on
/// the synthesized names.
pub fn named(condition: &str, args: &BTreeMap<String, Value>) -> (String, BTreeMap<String, Value>) {
    if !args.values().any(Value::is_sequence) {
        return (condition.to_string(), args.clone());
    }

    let mut rewritten = condition.to_string();
    let mut flat = BTreeMap::new();

    for (name, value) in args {
        let Value::Sequence(items) = value else {
            flat.insert(name.clone(), value.clone());
            continue;
        };

        rewritten = replace_name(&rewritten, name, items.len());
        for (i, item) in items.iter().enumerate() {
            flat.insert(synthesized(name, i), item.clone());
        }
    }

    (rewritten, flat)
}

fn synthesized(name: &str, index: usize) -> String {
    format!("{}_{:03}", name, index)
}

/// Replaces `<sigil>name` tokens outside quoted literals.
fn replace_name(condition: &str, name: &str, len: usize) -> String {
    let mut out = String::with_capacity(condition.len());

    for segment in scan_literals(condition) {
        let LiteralSegment::Code(code) = segment else {
            if let LiteralSegment::Quoted(quoted) = segment {
                out.push_str(quoted);
            }
            continue;
        };

        let mut rest = code;
        while let Some((start, sigil)) = find_token(rest, name) {
            out.push_str(&rest[..start]);
            out.push_str(&group(len, |i| format!("{}{}", sigil, synthesized(name, i))));
            rest = &rest[start + sigil.len_utf8() + name.len()..];
        }
        out.push_str(rest);
    }

    out
}

/// Finds the first `<sigil>name` in `code` that is not part of a longer
/// identifier.
fn find_token(code: &str, name: &str) -> Option<(usize, char)> {
    let mut from = 0;
    while let Some(offset) = code[from..].find(name) {
        let at = from + offset;
        from = at + name.len();

        let Some(sigil) = code[..at].chars().next_back() else {
            continue;
        };
        if !SIGILS.contains(&sigil) {
            continue;
        }
        let start = at - sigil.len_utf8();
        let before_ok = code[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident(c));
        let after_ok = code[from..].chars().next().map_or(true, |c| !is_ident(c));
        if before_ok && after_ok {
            return Some((start, sigil));
        }
    }
    None
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn group(len: usize, item: impl Fn(usize) -> String) -> String {
    let items: Vec<String> = (0..len).map(item).collect();
    format!("({})", items.join(", "))
}

// =============================================================================
// Scanning
// =============================================================================

enum Segment<'a> {
    Text(&'a str),
    Placeholder,
}

/// Splits `condition` into text runs and unquoted `?` placeholders.
fn scan(condition: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    for literal in scan_literals(condition) {
        match literal {
            LiteralSegment::Quoted(text) => segments.push(Segment::Text(text)),
            LiteralSegment::Code(code) => {
                let mut parts = code.split('?').peekable();
                while let Some(part) = parts.next() {
                    if !part.is_empty() {
                        segments.push(Segment::Text(part));
                    }
                    if parts.peek().is_some() {
                        segments.push(Segment::Placeholder);
                    }
                }
            }
        }
    }
    segments
}

enum LiteralSegment<'a> {
    Code(&'a str),
    Quoted(&'a str),
}

/// Splits SQL into code and quoted (`'...'` or `"..."`) runs. An unterminated
/// quote runs to the end of the input.
fn scan_literals(sql: &str) -> Vec<LiteralSegment<'_>> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;

    for (i, c) in sql.char_indices() {
        match quote {
            None if c == '\'' || c == '"' => {
                if start < i {
                    segments.push(LiteralSegment::Code(&sql[start..i]));
                }
                start = i;
                quote = Some(c);
            }
            Some(q) if c == q => {
                segments.push(LiteralSegment::Quoted(&sql[start..=i]));
                start = i + 1;
                quote = None;
            }
            _ => {}
        }
    }

    if start < sql.len() {
        let rest = &sql[start..];
        segments.push(match quote {
            Some(_) => LiteralSegment::Quoted(rest),
            None => LiteralSegment::Code(rest),
        });
    }
    segments
}
