//! External identifiers and comment text for the serializer.

use crate::term::{Literal, Term, Value};

/// Stable ASCII-safe identifier for a term.
///
/// Characters outside `[A-Za-z0-9_-]` become `_` and a leading digit gets a
/// `_` prefix. Non-atomic terms use their paraphrase, anonymous terms
/// `anon-<id>`.
pub fn external_id(term: &Term) -> String {
    match term {
        Term::Constant { name, .. } => ascii_safe(name),
        Term::Nart { .. } => ascii_safe(&paraphrase(term)),
        Term::Anonymous { id, .. } => format!("anon-{id}"),
    }
}

/// Human-readable name for a non-atomic term: function and arguments joined
/// by `-`, nested terms paraphrased in place.
pub fn paraphrase(term: &Term) -> String {
    match term {
        Term::Constant { name, .. } => name.clone(),
        Term::Anonymous { id, .. } => format!("anon-{id}"),
        Term::Nart { function, args } => {
            let mut parts = vec![function.clone()];
            parts.extend(args.iter().map(|arg| match arg {
                Value::Term(t) => paraphrase(t),
                Value::Literal(Literal::String(s)) => s.clone(),
                Value::Literal(l) => l.to_string(),
                Value::Unrecognized(s) => s.clone(),
            }));
            parts.join("-")
        }
    }
}

/// Label shown to readers: the constant name, or the paraphrase of a
/// non-atomic or anonymous term.
pub fn label(term: &Term) -> String {
    match term {
        Term::Constant { name, .. } => name.clone(),
        _ => paraphrase(term),
    }
}

fn ascii_safe(raw: &str) -> String {
    let mut id: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if id.is_empty() || id.starts_with(|c: char| c.is_ascii_digit()) {
        id.insert(0, '_');
    }
    id
}

/// Clean a knowledge-base comment for output.
///
/// Strips `#$` constant markers, drops control characters and collapses runs
/// of whitespace to a single space.
pub fn sanitize_comment(raw: &str) -> String {
    let cleaned: String = raw
        .replace("#$", "")
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some(' ')
            } else if c.is_control() {
                None
            } else {
                Some(c)
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
