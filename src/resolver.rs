//! Substitution of unexported terms by exported ones.
//!
//! A direct generalization or specialization of an exported term may itself be
//! outside the export set (non-atomic, filtered out, never selected). The
//! serializer must only reference exported terms, so such neighbours are
//! replaced: upward by their nearest exported generalizations, downward by the
//! exported terms that specialize them. Both directions reduce the result to
//! its most specific elements, so no term in a result generalizes another.
//!
//! Non-atomic terms can generalize through each other in cycles; each walk
//! carries a visited set and never expands a term twice.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use crate::error::KbError;
use crate::kb::KnowledgeBase;
use crate::term::{Term, TermSet};

/// Resolves terms against one export set.
///
/// Caches are scoped to the resolver, which lives for one export run.
pub struct TermResolver<'a, K: KnowledgeBase + ?Sized> {
    kb: &'a K,
    export_set: &'a TermSet,
    substitutes: RefCell<HashMap<Term, Vec<Term>>>,
    upward: RefCell<HashMap<Term, HashSet<Term>>>,
    failures: Cell<usize>,
    unresolved: Cell<usize>,
}

impl<'a, K: KnowledgeBase + ?Sized> TermResolver<'a, K> {
    pub fn new(kb: &'a K, export_set: &'a TermSet) -> Self {
        Self {
            kb,
            export_set,
            substitutes: RefCell::new(HashMap::new()),
            upward: RefCell::new(HashMap::new()),
            failures: Cell::new(0),
            unresolved: Cell::new(0),
        }
    }

    pub fn export_set(&self) -> &TermSet {
        self.export_set
    }

    /// Keep exported terms; replace the rest by their nearest exported
    /// generalizations. Terms with no exported generalization are omitted.
    pub fn find_allowed_or_generalize(&self, terms: &[Term]) -> Vec<Term> {
        let mut found = TermSet::new();
        for term in terms {
            if self.export_set.contains(term) {
                found.insert(term.clone());
                continue;
            }
            let substitutes = self.generalization_substitutes(term);
            if substitutes.is_empty() {
                self.unresolved.set(self.unresolved.get() + 1);
                tracing::debug!(term = %term, "no exported generalization, omitting");
            }
            found.extend(substitutes);
        }
        self.reduce_to_most_specific(found)
    }

    /// Keep exported terms; replace the rest by the exported terms that
    /// specialize them. Terms with no exported specialization are omitted.
    pub fn find_allowed_or_specialize(&self, terms: &[Term]) -> Vec<Term> {
        let mut found = TermSet::new();
        for term in terms {
            if self.export_set.contains(term) {
                found.insert(term.clone());
                continue;
            }
            let below: HashSet<Term> = match self.kb.all_specializations(term) {
                Ok(specs) => specs.into_iter().collect(),
                Err(e) => {
                    self.failed("all-specs", term, &e);
                    HashSet::new()
                }
            };
            let before = found.len();
            found.extend(self.export_set.iter().filter(|t| below.contains(t)).cloned());
            if found.len() == before {
                self.unresolved.set(self.unresolved.get() + 1);
                tracing::debug!(term = %term, "no exported specialization, omitting");
            }
        }
        self.reduce_to_most_specific(found)
    }

    /// A single exported generalization for `term`. Ties are broken by the
    /// knowledge base's most-specific common generalization when that is
    /// exported, otherwise by result order.
    pub fn best_allowed_generalization(&self, term: &Term) -> Option<Term> {
        let candidates = self.find_allowed_or_generalize(std::slice::from_ref(term));
        self.pick_single(candidates, true)
    }

    /// A single exported specialization for `term`. Ties are broken by the
    /// knowledge base's most-specific common generalization when that is one of
    /// the candidates, otherwise by result order.
    pub fn best_allowed_specialization(&self, term: &Term) -> Option<Term> {
        let candidates = self.find_allowed_or_specialize(std::slice::from_ref(term));
        self.pick_single(candidates, false)
    }

    /// Number of failed knowledge-base queries.
    pub fn failed_queries(&self) -> usize {
        self.failures.get()
    }

    /// Number of terms for which no substitute was found.
    pub fn unresolved_terms(&self) -> usize {
        self.unresolved.get()
    }

    fn generalization_substitutes(&self, term: &Term) -> Vec<Term> {
        if let Some(hit) = self.substitutes.borrow().get(term) {
            return hit.clone();
        }
        let mut visited = HashSet::new();
        let mut out = TermSet::new();
        self.generalize_into(term, &mut visited, &mut out);
        let out = out.into_vec();
        self.substitutes
            .borrow_mut()
            .insert(term.clone(), out.clone());
        out
    }

    fn generalize_into(&self, term: &Term, visited: &mut HashSet<Term>, out: &mut TermSet) {
        if !visited.insert(term.clone()) {
            tracing::trace!(term = %term, "already expanded, cutting branch");
            return;
        }
        let direct = match self.kb.direct_generalizations(term) {
            Ok(direct) => direct,
            Err(e) => {
                self.failed("genls", term, &e);
                return;
            }
        };
        for general in direct {
            if self.export_set.contains(&general) {
                out.insert(general);
            } else {
                self.generalize_into(&general, visited, out);
            }
        }
    }

    /// Drop every element that generalizes another element. Of two mutually
    /// generalizing elements the earlier one is kept.
    fn reduce_to_most_specific(&self, found: TermSet) -> Vec<Term> {
        let items = found.into_vec();
        if items.len() < 2 {
            return items;
        }
        let uppers: Vec<HashSet<Term>> = items.iter().map(|t| self.upward_of(t)).collect();
        items
            .iter()
            .enumerate()
            .filter(|(i, x)| {
                !items.iter().enumerate().any(|(j, y)| {
                    j != *i && uppers[j].contains(*x) && (!uppers[*i].contains(y) || j < *i)
                })
            })
            .map(|(_, t)| t.clone())
            .collect()
    }

    fn upward_of(&self, term: &Term) -> HashSet<Term> {
        if let Some(hit) = self.upward.borrow().get(term) {
            return hit.clone();
        }
        let gens: HashSet<Term> = match self.kb.all_generalizations(term) {
            Ok(gens) => gens.into_iter().collect(),
            Err(e) => {
                self.failed("all-genls", term, &e);
                HashSet::new()
            }
        };
        self.upward.borrow_mut().insert(term.clone(), gens.clone());
        gens
    }

    fn pick_single(&self, candidates: Vec<Term>, accept_exported: bool) -> Option<Term> {
        if candidates.len() < 2 {
            return candidates.into_iter().next();
        }
        match self.kb.most_specific_common_generalization(&candidates) {
            Ok(Some(best))
                if candidates.contains(&best)
                    || (accept_exported && self.export_set.contains(&best)) =>
            {
                Some(best)
            }
            Ok(_) => candidates.into_iter().next(),
            Err(e) => {
                self.failures.set(self.failures.get() + 1);
                tracing::warn!(error = %e, "mscg query failed, taking first candidate");
                candidates.into_iter().next()
            }
        }
    }

    fn failed(&self, query: &'static str, term: &Term, error: &KbError) {
        self.failures.set(self.failures.get() + 1);
        tracing::warn!(query, term = %term, error = %error, "resolver query failed");
    }
}
