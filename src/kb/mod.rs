//! Knowledge-base client interface.
//!
//! The export engine never owns the knowledge base; it talks to it through the
//! synchronous [`KnowledgeBase`] trait. Every method is a blocking round trip
//! that may fail with a [`KbError`](crate::error::KbError). The engine issues one
//! query at a time and never pipelines.
//!
//! - [`memory::MemoryKb`]: petgraph-backed in-memory client, loadable from a JSON
//!   snapshot. Used by the CLI and the test suite.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::error::KbResult;
use crate::term::{Term, Value};

/// A ground binary assertion `(relation subject value)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroundAssertion {
    pub relation: Term,
    pub subject: Term,
    pub value: Value,
}

impl GroundAssertion {
    pub fn new(relation: Term, subject: Term, value: impl Into<Value>) -> Self {
        Self {
            relation,
            subject,
            value: value.into(),
        }
    }
}

/// Synchronous query interface over the external knowledge base.
///
/// "Generalization" means genls for collections and genlPreds for relations;
/// "instance-of" is isa. All transitive queries exclude the queried term itself.
pub trait KnowledgeBase {
    /// Look a term up by its display name (constants by name, non-atomic terms
    /// by their parenthesized form).
    fn find_term(&self, name: &str) -> KbResult<Option<Term>>;

    /// Every term the knowledge base knows about.
    fn all_terms(&self) -> KbResult<Vec<Term>>;

    /// All (transitive) instances of a collection.
    fn instances_of(&self, collection: &Term) -> KbResult<Vec<Term>>;

    /// Terms that are quoted instances of a marker collection.
    fn quoted_instances_of(&self, marker: &Term) -> KbResult<Vec<Term>>;

    fn is_instance_of(&self, term: &Term, collection: &Term) -> KbResult<bool>;

    /// Membership of the term itself (not its denotation) in a marker collection.
    fn is_quoted_instance_of(&self, term: &Term, marker: &Term) -> KbResult<bool>;

    fn is_collection(&self, term: &Term) -> KbResult<bool>;

    /// Whether the term is a relation of any arity.
    fn is_relation(&self, term: &Term) -> KbResult<bool>;

    fn is_binary_relation(&self, term: &Term) -> KbResult<bool>;

    fn is_unary_relation(&self, term: &Term) -> KbResult<bool>;

    fn is_individual(&self, term: &Term) -> KbResult<bool>;

    fn direct_generalizations(&self, term: &Term) -> KbResult<Vec<Term>>;

    fn all_generalizations(&self, term: &Term) -> KbResult<Vec<Term>>;

    fn direct_specializations(&self, term: &Term) -> KbResult<Vec<Term>>;

    fn all_specializations(&self, term: &Term) -> KbResult<Vec<Term>>;

    /// All (transitive) collections the term is an instance of.
    fn all_instance_of(&self, term: &Term) -> KbResult<Vec<Term>>;

    /// All (transitive) super-relations of a relation.
    fn super_relations(&self, relation: &Term) -> KbResult<Vec<Term>>;

    /// Argument-type constraints (argNIsa) for a 1-based argument position, in
    /// knowledge-base order.
    fn argument_type_constraints(&self, relation: &Term, position: usize) -> KbResult<Vec<Term>>;

    fn comment(&self, term: &Term) -> KbResult<Option<String>>;

    /// Ground binary assertions about `subject` using any of `relations`.
    ///
    /// Clients may return more than was asked for (e.g. via sub-relation
    /// inference); callers filter the result.
    fn ground_assertions(&self, subject: &Term, relations: &[Term]) -> KbResult<Vec<GroundAssertion>>;

    /// The most specific collection generalizing every given term.
    fn most_specific_common_generalization(&self, terms: &[Term]) -> KbResult<Option<Term>>;
}
