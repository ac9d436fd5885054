//! Term classification into class / relation / individual buckets.
//!
//! Each term is queried once and tagged with a [`Category`]; later stages match
//! on the tag instead of re-asking the knowledge base. Priority is class, then
//! relation, then individual, so a collection that is also an individual is
//! filed as a class.

use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::config::RelationPolicy;
use crate::error::KbError;
use crate::kb::KnowledgeBase;
use crate::progress::{Cancelled, Checkpoint, Unchecked};
use crate::term::{Term, TermSet};

/// The bucket a term is filed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Class,
    Relation,
    Individual,
    Unclassified,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Class => write!(f, "class"),
            Self::Relation => write!(f, "relation"),
            Self::Individual => write!(f, "individual"),
            Self::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// Mutually exclusive, de-duplicated, ordered buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedTerms {
    pub classes: TermSet,
    pub relations: TermSet,
    pub individuals: TermSet,
    /// Terms that matched no category; dropped from the output.
    pub unclassified: TermSet,
}

impl ClassifiedTerms {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a term. A term already filed keeps its first bucket.
    pub fn file(&mut self, term: Term, category: Category) -> bool {
        if self.category_of(&term).is_some() {
            return false;
        }
        match category {
            Category::Class => self.classes.insert(term),
            Category::Relation => self.relations.insert(term),
            Category::Individual => self.individuals.insert(term),
            Category::Unclassified => self.unclassified.insert(term),
        }
    }

    pub fn category_of(&self, term: &Term) -> Option<Category> {
        if self.classes.contains(term) {
            Some(Category::Class)
        } else if self.relations.contains(term) {
            Some(Category::Relation)
        } else if self.individuals.contains(term) {
            Some(Category::Individual)
        } else if self.unclassified.contains(term) {
            Some(Category::Unclassified)
        } else {
            None
        }
    }

    /// Number of classified (exported) terms.
    pub fn exported_len(&self) -> usize {
        self.classes.len() + self.relations.len() + self.individuals.len()
    }

    /// Number of terms seen, including unclassified ones.
    pub fn len(&self) -> usize {
        self.exported_len() + self.unclassified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Classifies terms through knowledge-base queries.
pub struct TermClassifier<'a, K: KnowledgeBase + ?Sized> {
    kb: &'a K,
    policy: RelationPolicy,
    failures: Cell<usize>,
}

impl<'a, K: KnowledgeBase + ?Sized> TermClassifier<'a, K> {
    pub fn new(kb: &'a K, policy: RelationPolicy) -> Self {
        Self {
            kb,
            policy,
            failures: Cell::new(0),
        }
    }

    /// Classify every term.
    pub fn classify(&self, terms: &[Term]) -> ClassifiedTerms {
        let mut out = ClassifiedTerms::new();
        // Unchecked never cancels.
        let _ = self.classify_with(terms, &Unchecked, &mut out);
        out
    }

    /// Classify into `out`, polling `checkpoint` before each term. On
    /// cancellation `out` holds the terms classified so far.
    pub fn classify_with(
        &self,
        terms: &[Term],
        checkpoint: &dyn Checkpoint,
        out: &mut ClassifiedTerms,
    ) -> Result<(), Cancelled> {
        let total = terms.len();
        for (done, term) in terms.iter().enumerate() {
            checkpoint.checkpoint(done, total)?;
            if out.category_of(term).is_some() {
                continue;
            }
            let category = self.classify_term(term);
            if category == Category::Unclassified {
                tracing::debug!(term = %term, "term matches no category, dropping");
            }
            out.file(term.clone(), category);
        }
        checkpoint.checkpoint(total, total)
    }

    /// Tag a single term.
    pub fn classify_term(&self, term: &Term) -> Category {
        match self.try_classify(term) {
            Ok(category) => category,
            Err(e) => {
                self.failures.set(self.failures.get() + 1);
                tracing::warn!(term = %term, error = %e, "classification query failed");
                Category::Unclassified
            }
        }
    }

    /// Number of failed classification queries.
    pub fn failed_queries(&self) -> usize {
        self.failures.get()
    }

    fn try_classify(&self, term: &Term) -> Result<Category, KbError> {
        if self.kb.is_collection(term)? {
            return Ok(Category::Class);
        }
        if self.kb.is_binary_relation(term)? {
            return Ok(Category::Relation);
        }
        if self.kb.is_relation(term)? {
            if self.policy == RelationPolicy::Research {
                return Ok(Category::Relation);
            }
            let arity = if self.kb.is_unary_relation(term)? {
                "unary"
            } else {
                "n-ary"
            };
            tracing::debug!(term = %term, arity, "relation arity not exportable");
            return Ok(Category::Unclassified);
        }
        if self.kb.is_individual(term)? {
            return Ok(Category::Individual);
        }
        Ok(Category::Unclassified)
    }
}

/// Remove edges pointing back at `term` itself.
pub fn without_self_references(term: &Term, edges: Vec<Term>) -> Vec<Term> {
    let before = edges.len();
    let kept: Vec<Term> = edges.into_iter().filter(|e| e != term).collect();
    if kept.len() != before {
        tracing::debug!(term = %term, "dropped self-referential edge");
    }
    kept
}
