//! Term filters: selection-set membership, KB-subset markers, eligibility and
//! allow-lists.
//!
//! Membership tests are pure. Marker and allow-list tests query the knowledge
//! base; a failed query counts as "not a member" and is logged, never raised.

use std::cell::Cell;

use crate::kb::KnowledgeBase;
use crate::term::{Term, TermSet};

/// Filters term lists against sets, markers and allow-lists.
pub struct TermFilter<'a, K: KnowledgeBase + ?Sized> {
    kb: &'a K,
    include_non_atomic: bool,
    failures: Cell<usize>,
}

impl<'a, K: KnowledgeBase + ?Sized> TermFilter<'a, K> {
    pub fn new(kb: &'a K, include_non_atomic: bool) -> Self {
        Self {
            kb,
            include_non_atomic,
            failures: Cell::new(0),
        }
    }

    /// Terms of `terms` that are members of `set`, in input order.
    pub fn filter_to_set(terms: &[Term], set: &TermSet) -> Vec<Term> {
        terms.iter().filter(|t| set.contains(t)).cloned().collect()
    }

    /// Terms of `terms` that are not members of `set`, in input order.
    pub fn filter_out_of_set(terms: &[Term], set: &TermSet) -> Vec<Term> {
        terms.iter().filter(|t| !set.contains(t)).cloned().collect()
    }

    /// Whether the term can be emitted at all under the current policy.
    pub fn is_representable(&self, term: &Term) -> bool {
        if !term.is_well_formed() {
            return false;
        }
        match term {
            Term::Constant { .. } | Term::Anonymous { .. } => true,
            Term::Nart { .. } => self.include_non_atomic,
        }
    }

    /// Quoted membership in any of the marker collections. No markers means
    /// no restriction.
    pub fn is_in_kb_subset(&self, term: &Term, markers: &[Term]) -> bool {
        if markers.is_empty() {
            return true;
        }
        markers.iter().any(|marker| {
            self.kb
                .is_quoted_instance_of(term, marker)
                .unwrap_or_else(|e| self.failed("quotedIsa", term, &e))
        })
    }

    /// Terms of `terms` inside the KB subset, in input order.
    pub fn filter_to_kb_subset(&self, terms: &[Term], markers: &[Term]) -> Vec<Term> {
        terms
            .iter()
            .filter(|t| self.is_in_kb_subset(t, markers))
            .cloned()
            .collect()
    }

    /// Upward-closure eligibility: the candidate is classified, quoted or not,
    /// under one of the eligibility collections. No collections means eligible.
    pub fn is_eligible(&self, term: &Term, eligibility: &[Term]) -> bool {
        if eligibility.is_empty() {
            return true;
        }
        eligibility.iter().any(|marker| {
            let quoted = self
                .kb
                .is_quoted_instance_of(term, marker)
                .unwrap_or_else(|e| self.failed("quotedIsa", term, &e));
            quoted
                || self
                    .kb
                    .is_instance_of(term, marker)
                    .unwrap_or_else(|e| self.failed("isa", term, &e))
        })
    }

    /// A collection passes if it is allow-listed or specializes an allow-listed
    /// collection. An empty allow-list admits everything.
    pub fn is_allowed_collection(&self, term: &Term, allow: &TermSet) -> bool {
        if allow.is_empty() || allow.contains(term) {
            return true;
        }
        match self.kb.all_generalizations(term) {
            Ok(gens) => gens.iter().any(|g| allow.contains(g)),
            Err(e) => self.failed("all-genls", term, &e),
        }
    }

    /// A relation passes if it is allow-listed or is a sub-relation of an
    /// allow-listed relation. An empty allow-list admits everything.
    pub fn is_allowed_relation(&self, term: &Term, allow: &TermSet) -> bool {
        if allow.is_empty() || allow.contains(term) {
            return true;
        }
        match self.kb.super_relations(term) {
            Ok(supers) => supers.iter().any(|s| allow.contains(s)),
            Err(e) => self.failed("genlPreds", term, &e),
        }
    }

    /// Number of queries that failed inside this filter.
    pub fn failed_queries(&self) -> usize {
        self.failures.get()
    }

    fn failed(&self, query: &str, term: &Term, error: &crate::error::KbError) -> bool {
        self.failures.set(self.failures.get() + 1);
        tracing::warn!(query, term = %term, error = %error, "filter query failed, treating as non-member");
        false
    }
}
