//! Upward closure of a selection set through the generalization hierarchy.
//!
//! Collections contribute their instance-of and subclass-of ancestors, relations
//! their instance-of ancestors, super-relations and argument-type constraints
//! (positions 1 to [`MAX_ARGUMENT_POSITIONS`]); individuals contribute their
//! instance-of ancestors. Added ancestors are expanded in turn until no new term
//! appears, so the result is a fixpoint:
//!
//! - `closure(S, E) ∩ S = ∅`
//! - `closure(S ∪ closure(S, E), E) = ∅`

use std::cell::Cell;
use std::collections::HashSet;

use crate::error::{KbError, KbResult};
use crate::filter::TermFilter;
use crate::kb::KnowledgeBase;
use crate::progress::{Cancelled, Checkpoint, Unchecked};
use crate::term::{Term, TermSet};

/// Highest argument position whose type constraint is followed.
pub const MAX_ARGUMENT_POSITIONS: usize = 4;

/// Computes filtered upward closures.
pub struct ClosureComputer<'a, K: KnowledgeBase + ?Sized> {
    kb: &'a K,
    filter: &'a TermFilter<'a, K>,
    failures: Cell<usize>,
    malformed: Cell<usize>,
}

impl<'a, K: KnowledgeBase + ?Sized> ClosureComputer<'a, K> {
    pub fn new(kb: &'a K, filter: &'a TermFilter<'a, K>) -> Self {
        Self {
            kb,
            filter,
            failures: Cell::new(0),
            malformed: Cell::new(0),
        }
    }

    /// Ancestors of `selected` that are not in `selected`, restricted to terms
    /// classified under one of `eligibility` (empty = no restriction).
    pub fn compute_upward_closure(&self, selected: &TermSet, eligibility: &[Term]) -> TermSet {
        self.compute_with(selected, eligibility, &Unchecked)
            .unwrap_or_default()
    }

    /// Like [`compute_upward_closure`](Self::compute_upward_closure), polling
    /// `checkpoint` before each term.
    pub fn compute_with(
        &self,
        selected: &TermSet,
        eligibility: &[Term],
        checkpoint: &dyn Checkpoint,
    ) -> Result<TermSet, Cancelled> {
        let mut closure = TermSet::new();
        let mut rejected: HashSet<Term> = HashSet::new();

        let order = selected.sorted_by_name();
        let total = order.len();
        for (done, term) in order.iter().enumerate() {
            checkpoint.checkpoint(done, total)?;
            self.absorb(term, selected, eligibility, &mut closure, &mut rejected);
        }

        // Ancestors of added terms, in insertion order.
        let mut cursor = 0;
        while cursor < closure.len() {
            checkpoint.checkpoint(total, total)?;
            let term = closure.as_slice()[cursor].clone();
            cursor += 1;
            self.absorb(&term, selected, eligibility, &mut closure, &mut rejected);
        }

        tracing::debug!(
            selected = total,
            closure = closure.len(),
            rejected = rejected.len(),
            "upward closure computed"
        );
        Ok(closure)
    }

    /// Number of ancestor queries that failed.
    pub fn failed_queries(&self) -> usize {
        self.failures.get()
    }

    /// Number of malformed candidates returned by the knowledge base.
    pub fn malformed_candidates(&self) -> usize {
        self.malformed.get()
    }

    fn absorb(
        &self,
        term: &Term,
        selected: &TermSet,
        eligibility: &[Term],
        closure: &mut TermSet,
        rejected: &mut HashSet<Term>,
    ) {
        for candidate in self.ancestors(term) {
            if !candidate.is_well_formed() {
                self.malformed.set(self.malformed.get() + 1);
                tracing::warn!(term = %term, candidate = ?candidate, "skipping malformed ancestor");
                continue;
            }
            if closure.contains(&candidate)
                || selected.contains(&candidate)
                || rejected.contains(&candidate)
            {
                continue;
            }
            if !self.filter.is_eligible(&candidate, eligibility) {
                tracing::trace!(candidate = %candidate, "ancestor not eligible");
                rejected.insert(candidate);
                continue;
            }
            closure.insert(candidate);
        }
    }

    fn ancestors(&self, term: &Term) -> Vec<Term> {
        let is_collection = self
            .kb
            .is_collection(term)
            .unwrap_or_else(|e| self.failed("collection?", term, &e));
        let is_relation = !is_collection
            && self
                .kb
                .is_relation(term)
                .unwrap_or_else(|e| self.failed("relation?", term, &e));

        let mut out = self.direction("all-isa", term, self.kb.all_instance_of(term));
        if is_collection {
            out.extend(self.direction("all-genls", term, self.kb.all_generalizations(term)));
        } else if is_relation {
            out.extend(self.direction("genlPreds", term, self.kb.super_relations(term)));
            for position in 1..=MAX_ARGUMENT_POSITIONS {
                out.extend(self.direction(
                    "argIsa",
                    term,
                    self.kb.argument_type_constraints(term, position),
                ));
            }
        }
        out
    }

    fn direction(&self, query: &'static str, term: &Term, result: KbResult<Vec<Term>>) -> Vec<Term> {
        result.unwrap_or_else(|e| {
            self.failed(query, term, &e);
            Vec::new()
        })
    }

    fn failed(&self, query: &'static str, term: &Term, error: &KbError) -> bool {
        self.failures.set(self.failures.get() + 1);
        tracing::warn!(query, term = %term, error = %error, "ancestor query failed, skipping direction");
        false
    }
}
