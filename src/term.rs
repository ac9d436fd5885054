//! Core term types for the export engine.
//!
//! A [`Term`] is an identifier in the external knowledge base. It comes in three
//! disjoint representational kinds: atomic constants, non-atomic reified terms
//! (a function applied to arguments, e.g. `(FruitFn AppleTree)`), and anonymous
//! terms that only live for the duration of one export run.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// An identifier in the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// A named constant with an optional stable GUID.
    Constant { name: String, guid: Option<String> },
    /// A non-atomic reified term: `(function arg1 arg2 ...)`.
    Nart { function: String, args: Vec<Value> },
    /// A run-scoped unnamed term, e.g. a derived intersection class.
    Anonymous { id: u64, label: Option<String> },
}

impl Term {
    /// Create a constant without a GUID.
    pub fn constant(name: impl Into<String>) -> Self {
        Term::Constant {
            name: name.into(),
            guid: None,
        }
    }

    /// Create a non-atomic term from a function name and term arguments.
    pub fn nart(function: impl Into<String>, args: impl IntoIterator<Item = Term>) -> Self {
        Term::Nart {
            function: function.into(),
            args: args.into_iter().map(Value::Term).collect(),
        }
    }

    /// Whether this is a named constant.
    pub fn is_atomic(&self) -> bool {
        matches!(self, Term::Constant { .. })
    }

    pub fn is_nart(&self) -> bool {
        matches!(self, Term::Nart { .. })
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Term::Anonymous { .. })
    }

    /// Structural sanity check for terms coming back from a query.
    ///
    /// Constants need a non-empty name without whitespace; non-atomic terms need
    /// a function name, at least one argument, and well-formed term arguments.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Term::Constant { name, .. } => {
                !name.is_empty() && !name.chars().any(char::is_whitespace)
            }
            Term::Nart { function, args } => {
                !function.is_empty()
                    && !args.is_empty()
                    && args.iter().all(|a| match a {
                        Value::Term(t) => t.is_well_formed(),
                        Value::Literal(_) => true,
                        Value::Unrecognized(_) => false,
                    })
            }
            Term::Anonymous { .. } => true,
        }
    }

    /// The display name used for sorting and labels.
    pub fn display_name(&self) -> String {
        self.to_string()
    }

    /// Term arguments of a non-atomic term (literal arguments are skipped).
    pub fn term_args(&self) -> Vec<&Term> {
        match self {
            Term::Nart { args, .. } => args
                .iter()
                .filter_map(|a| match a {
                    Value::Term(t) => Some(t),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The function name of a non-atomic term.
    pub fn function_name(&self) -> Option<&str> {
        match self {
            Term::Nart { function, .. } => Some(function),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Constant { name, .. } => write!(f, "{name}"),
            Term::Nart { function, args } => {
                write!(f, "({function}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            Term::Anonymous { id, label } => match label {
                Some(label) => write!(f, "_:{label}#{id}"),
                None => write!(f, "_:anon{id}"),
            },
        }
    }
}

/// A literal assertion value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    String(String),
    Integer(i64),
    /// Decimal number kept in its lexical form so literals stay hashable.
    Decimal(String),
    /// ISO-8601 date.
    Date(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "\"{s}\""),
            Literal::Integer(n) => write!(f, "{n}"),
            Literal::Decimal(d) => write!(f, "{d}"),
            Literal::Date(d) => write!(f, "{d}"),
        }
    }
}

/// A value in argument or object position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Term(Term),
    Literal(Literal),
    /// Something the client could not map to a term or literal (a sentence,
    /// an unparsed expression).
    Unrecognized(String),
}

impl Value {
    pub fn as_term(&self) -> Option<&Term> {
        match self {
            Value::Term(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Term(t) => write!(f, "{t}"),
            Value::Literal(l) => write!(f, "{l}"),
            Value::Unrecognized(s) => write!(f, "<{s}>"),
        }
    }
}

impl From<Term> for Value {
    fn from(t: Term) -> Self {
        Value::Term(t)
    }
}

impl From<Literal> for Value {
    fn from(l: Literal) -> Self {
        Value::Literal(l)
    }
}

/// A de-duplicated, insertion-ordered sequence of terms.
#[derive(Debug, Clone, Default)]
pub struct TermSet {
    order: Vec<Term>,
    members: HashSet<Term>,
}

impl TermSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a term; returns `false` if it was already present.
    pub fn insert(&mut self, term: Term) -> bool {
        if self.members.contains(&term) {
            return false;
        }
        self.members.insert(term.clone());
        self.order.push(term);
        true
    }

    pub fn contains(&self, term: &Term) -> bool {
        self.members.contains(term)
    }

    /// Remove a term, preserving the order of the rest.
    pub fn remove(&mut self, term: &Term) -> bool {
        if !self.members.remove(term) {
            return false;
        }
        self.order.retain(|t| t != term);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Term> {
        self.order.iter()
    }

    pub fn as_slice(&self) -> &[Term] {
        &self.order
    }

    /// Add every term of `other` not yet present, in `other`'s order.
    pub fn union_with(&mut self, other: &TermSet) {
        for term in other {
            self.insert(term.clone());
        }
    }

    /// Whether no term of `other` is in this set.
    pub fn is_disjoint(&self, other: &TermSet) -> bool {
        other.iter().all(|t| !self.contains(t))
    }

    /// Terms in stable lexicographic display-name order.
    pub fn sorted_by_name(&self) -> Vec<Term> {
        let mut keyed: Vec<(String, &Term)> =
            self.order.iter().map(|t| (t.display_name(), t)).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        keyed.into_iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn into_vec(self) -> Vec<Term> {
        self.order
    }
}

impl FromIterator<Term> for TermSet {
    fn from_iter<I: IntoIterator<Item = Term>>(iter: I) -> Self {
        let mut set = TermSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<Term> for TermSet {
    fn extend<I: IntoIterator<Item = Term>>(&mut self, iter: I) {
        for term in iter {
            self.insert(term);
        }
    }
}

impl<'a> IntoIterator for &'a TermSet {
    type Item = &'a Term;
    type IntoIter = std::slice::Iter<'a, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.iter()
    }
}

impl PartialEq for TermSet {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for TermSet {}

/// Allocator for anonymous term ids within one export run.
///
/// Produces monotonically increasing ids starting from 1. Reset at run start so
/// anonymous ids are stable across identical runs.
#[derive(Debug)]
pub struct AnonymousAllocator {
    next: AtomicU64,
}

impl AnonymousAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh anonymous term with an optional label.
    pub fn allocate(&self, label: Option<String>) -> Term {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        Term::Anonymous { id, label }
    }

    /// Return the next id that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Start numbering from 1 again.
    pub fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for AnonymousAllocator {
    fn default() -> Self {
        Self::new()
    }
}
