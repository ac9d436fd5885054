//! Property assertion gathering.
//!
//! For each exported term the gatherer fetches ground binary assertions whose
//! relation is applicable, drops the structural ones (isa, genls, genlPreds are
//! emitted as hierarchy edges instead) and keeps a value only if it is a literal
//! or a term that passes the marker filter. Non-atomic values are folded into
//! derived anonymous terms: intersections, relation-to-type restrictions and
//! paraphrases. Derived terms enter a no-expand set and never get properties of
//! their own.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ExportConfig;
use crate::error::KbError;
use crate::filter::TermFilter;
use crate::identifier::paraphrase;
use crate::kb::{GroundAssertion, KnowledgeBase};
use crate::term::{AnonymousAllocator, Literal, Term, TermSet, Value};

/// Object position of a property assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Term(Term),
    Literal {
        literal: Literal,
        /// The relation's argument-2 constraint, when it has one.
        datatype: Option<Term>,
    },
}

impl PropertyValue {
    fn sort_key(&self) -> String {
        match self {
            PropertyValue::Term(t) => t.display_name(),
            PropertyValue::Literal { literal, .. } => literal.to_string(),
        }
    }

    /// Literals of the same kind compare by value, everything else by name.
    fn output_order(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                PropertyValue::Literal { literal: a, .. },
                PropertyValue::Literal { literal: b, .. },
            ) if std::mem::discriminant(a) == std::mem::discriminant(b) => a.cmp(b),
            _ => self.sort_key().cmp(&other.sort_key()),
        }
    }
}

/// `(relation subject value)` selected for export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyAssertion {
    pub relation: Term,
    pub subject: Term,
    pub value: PropertyValue,
}

/// How a derived term is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Construct {
    /// Intersection of the member collections.
    Intersection(Vec<Term>),
    /// Things with `relation` to some instance of `filler`.
    Restriction { relation: Term, filler: Term },
    /// An opaque non-atomic term exported under a synthesized name.
    Paraphrase(String),
}

/// Anonymous term standing in for a non-atomic assertion value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedTerm {
    pub term: Term,
    /// The non-atomic term it was derived from.
    pub source: Term,
    pub construct: Construct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Intersection,
    RelationToType,
    Paraphrase,
}

/// Knobs the gatherer takes from the export configuration, with names
/// already resolved to terms.
#[derive(Debug, Clone, Default)]
pub struct GatherPolicy {
    /// Term values must be quoted instances of one of these (empty = any).
    pub value_markers: Vec<Term>,
    pub structural_relations: TermSet,
    pub intersection_functions: Vec<String>,
    pub relation_to_type_functions: Vec<String>,
    pub include_non_atomic: bool,
}

impl GatherPolicy {
    /// Policy from a configuration; structural relations are matched by name.
    pub fn from_config(config: &ExportConfig, value_markers: Vec<Term>) -> Self {
        Self {
            value_markers,
            structural_relations: config
                .structural_relations
                .iter()
                .map(Term::constant)
                .collect(),
            intersection_functions: config.intersection_functions.clone(),
            relation_to_type_functions: config.relation_to_type_functions.clone(),
            include_non_atomic: config.include_non_atomic_terms,
        }
    }
}

/// Running counters, read into the export report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatherStats {
    pub gathered: usize,
    pub structural: usize,
    pub not_applicable: usize,
    pub not_a_term: usize,
    pub filtered: usize,
    pub failed_queries: usize,
}

impl GatherStats {
    /// Assertions dropped for data-quality reasons.
    pub fn dropped(&self) -> usize {
        self.not_a_term + self.filtered
    }
}

/// Collects property assertions for exported terms.
pub struct AssertionGatherer<'a, K: KnowledgeBase + ?Sized> {
    kb: &'a K,
    filter: &'a TermFilter<'a, K>,
    export_set: &'a TermSet,
    allocator: &'a AnonymousAllocator,
    policy: GatherPolicy,
    derived: RefCell<Vec<DerivedTerm>>,
    derived_for: RefCell<HashMap<Term, Term>>,
    no_expand: RefCell<TermSet>,
    literal_types: RefCell<HashMap<Term, Option<Term>>>,
    stats: Cell<GatherStats>,
}

impl<'a, K: KnowledgeBase + ?Sized> AssertionGatherer<'a, K> {
    pub fn new(
        kb: &'a K,
        filter: &'a TermFilter<'a, K>,
        export_set: &'a TermSet,
        allocator: &'a AnonymousAllocator,
        policy: GatherPolicy,
    ) -> Self {
        Self {
            kb,
            filter,
            export_set,
            allocator,
            policy,
            derived: RefCell::new(Vec::new()),
            derived_for: RefCell::new(HashMap::new()),
            no_expand: RefCell::new(TermSet::new()),
            literal_types: RefCell::new(HashMap::new()),
            stats: Cell::new(GatherStats::default()),
        }
    }

    /// Applicable, non-structural assertions about `term`, sorted by relation
    /// display name, then value.
    pub fn gather_property_assertions(
        &self,
        term: &Term,
        applicable: &TermSet,
    ) -> Vec<PropertyAssertion> {
        if applicable.is_empty() {
            return Vec::new();
        }
        if self.no_expand.borrow().contains(term) {
            tracing::trace!(term = %term, "derived term, not expanding");
            return Vec::new();
        }

        let gafs = match self.kb.ground_assertions(term, applicable.as_slice()) {
            Ok(gafs) => gafs,
            Err(e) => {
                self.failed(term, &e);
                return Vec::new();
            }
        };

        let mut out: Vec<PropertyAssertion> = Vec::new();
        for gaf in gafs {
            if &gaf.subject != term {
                continue;
            }
            if self.policy.structural_relations.contains(&gaf.relation) {
                self.bump(|s| s.structural += 1);
                tracing::trace!(term = %term, relation = %gaf.relation, "structural assertion handled as edge");
                continue;
            }
            if !self.is_applicable(&gaf.relation, applicable) {
                self.bump(|s| s.not_applicable += 1);
                continue;
            }
            if let Some(assertion) = self.admit(gaf) {
                if !out.contains(&assertion) {
                    out.push(assertion);
                }
            }
        }

        out.sort_by(|a, b| {
            a.relation
                .display_name()
                .cmp(&b.relation.display_name())
                .then_with(|| a.value.output_order(&b.value))
        });
        self.bump(|s| s.gathered += out.len());
        out
    }

    /// Derived terms created so far, in creation order.
    pub fn derived_terms(&self) -> Vec<DerivedTerm> {
        self.derived.borrow().clone()
    }

    /// Terms that must not be expanded further.
    pub fn no_expand(&self) -> TermSet {
        self.no_expand.borrow().clone()
    }

    pub fn stats(&self) -> GatherStats {
        self.stats.get()
    }

    fn is_applicable(&self, relation: &Term, applicable: &TermSet) -> bool {
        if applicable.contains(relation) {
            return true;
        }
        // Sub-relation inferred by the knowledge base; only usable if the
        // relation itself is exported.
        self.export_set.contains(relation) && self.filter.is_allowed_relation(relation, applicable)
    }

    fn admit(&self, gaf: GroundAssertion) -> Option<PropertyAssertion> {
        let GroundAssertion {
            relation,
            subject,
            value,
        } = gaf;
        let value = match value {
            Value::Literal(literal) => {
                let datatype = self.literal_type(&relation);
                PropertyValue::Literal { literal, datatype }
            }
            Value::Unrecognized(raw) => {
                self.bump(|s| s.not_a_term += 1);
                tracing::debug!(subject = %subject, relation = %relation, value = %raw, "value not a knowledge term, dropping");
                return None;
            }
            Value::Term(t) if t.is_nart() && !self.export_set.contains(&t) => {
                match self.derive(&t) {
                    Some(derived) => PropertyValue::Term(derived),
                    None => {
                        self.bump(|s| s.filtered += 1);
                        tracing::debug!(subject = %subject, relation = %relation, value = %t, "non-atomic value excluded by filter");
                        return None;
                    }
                }
            }
            Value::Term(t) => {
                if !self.export_set.contains(&t)
                    && !self.filter.is_in_kb_subset(&t, &self.policy.value_markers)
                {
                    self.bump(|s| s.filtered += 1);
                    tracing::debug!(subject = %subject, relation = %relation, value = %t, "value excluded by filter");
                    return None;
                }
                PropertyValue::Term(t)
            }
        };
        Some(PropertyAssertion {
            relation,
            subject,
            value,
        })
    }

    /// Anonymous stand-in for a non-atomic value, reused across assertions.
    ///
    /// Intersection and restriction arguments must themselves be exportable
    /// values; if any is not, nothing is derived.
    fn derive(&self, nart: &Term) -> Option<Term> {
        if let Some(existing) = self.derived_for.borrow().get(nart) {
            return Some(existing.clone());
        }
        let shape = self.shape(nart)?;
        let args: Vec<&Term> = nart.term_args();
        if shape != Shape::Paraphrase && !args.iter().all(|arg| self.admissible(arg)) {
            tracing::debug!(value = %nart, "composite argument excluded by filter");
            return None;
        }

        let term = match shape {
            Shape::Intersection => {
                let members = self.components(&args)?;
                self.record(nart, Construct::Intersection(members))
            }
            Shape::RelationToType => {
                let parts = self.components(&args)?;
                let [collection, relation, filler] = <[Term; 3]>::try_from(parts).ok()?;
                let restriction = self.record(nart, Construct::Restriction { relation, filler });
                self.record(nart, Construct::Intersection(vec![collection, restriction]))
            }
            Shape::Paraphrase => self.record(nart, Construct::Paraphrase(paraphrase(nart))),
        };

        self.derived_for
            .borrow_mut()
            .insert(nart.clone(), term.clone());
        Some(term)
    }

    fn shape(&self, nart: &Term) -> Option<Shape> {
        let function = nart.function_name()?;
        let arity = nart.term_args().len();
        if self.policy.intersection_functions.iter().any(|f| f == function) && arity > 0 {
            Some(Shape::Intersection)
        } else if self.policy.relation_to_type_functions.iter().any(|f| f == function)
            && arity == 3
        {
            Some(Shape::RelationToType)
        } else if self.policy.include_non_atomic {
            Some(Shape::Paraphrase)
        } else {
            None
        }
    }

    /// Whether a term may appear inside a composite: exported, passing the
    /// value markers, or itself derivable. Allocates nothing.
    fn admissible(&self, term: &Term) -> bool {
        if self.export_set.contains(term) || self.derived_for.borrow().contains_key(term) {
            return true;
        }
        if !term.is_nart() {
            return self.filter.is_in_kb_subset(term, &self.policy.value_markers);
        }
        match self.shape(term) {
            Some(Shape::Paraphrase) => true,
            Some(_) => term.term_args().iter().all(|arg| self.admissible(arg)),
            None => false,
        }
    }

    /// Composite arguments as exportable terms, nested non-atomic ones derived.
    fn components(&self, args: &[&Term]) -> Option<Vec<Term>> {
        args.iter()
            .map(|arg| {
                if arg.is_nart() && !self.export_set.contains(arg) {
                    self.derive(arg)
                } else {
                    Some((*arg).clone())
                }
            })
            .collect()
    }

    fn record(&self, source: &Term, construct: Construct) -> Term {
        let label = match &construct {
            Construct::Intersection(_) => "intersection",
            Construct::Restriction { .. } => "restriction",
            Construct::Paraphrase(_) => "paraphrase",
        };
        let term = self.allocator.allocate(Some(label.to_string()));
        tracing::debug!(source = %source, derived = %term, "derived composite term");
        self.no_expand.borrow_mut().insert(term.clone());
        self.derived.borrow_mut().push(DerivedTerm {
            term: term.clone(),
            source: source.clone(),
            construct,
        });
        term
    }

    /// The argument-2 constraint of `relation`; the first one when several
    /// are asserted.
    fn literal_type(&self, relation: &Term) -> Option<Term> {
        if let Some(cached) = self.literal_types.borrow().get(relation) {
            return cached.clone();
        }
        let datatype = match self.kb.argument_type_constraints(relation, 2) {
            Ok(mut constraints) => {
                if constraints.len() > 1 {
                    tracing::warn!(
                        relation = %relation,
                        candidates = constraints.len(),
                        chosen = %constraints[0],
                        "ambiguous literal type constraint, using the first"
                    );
                }
                if constraints.is_empty() {
                    None
                } else {
                    Some(constraints.swap_remove(0))
                }
            }
            Err(e) => {
                self.failed(relation, &e);
                None
            }
        };
        self.literal_types
            .borrow_mut()
            .insert(relation.clone(), datatype.clone());
        datatype
    }

    fn failed(&self, term: &Term, error: &KbError) {
        self.bump(|s| s.failed_queries += 1);
        tracing::warn!(term = %term, error = %error, "assertion query failed, skipping");
    }

    fn bump(&self, f: impl FnOnce(&mut GatherStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}
