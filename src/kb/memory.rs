//! In-memory knowledge base backed by petgraph.
//!
//! Stores isa, genls and genlPreds as typed edges of a directed graph and
//! answers transitive queries by BFS. Arity, argument-type constraints,
//! comments, quoted-isa markers and ground assertions live in side tables.
//! Loadable from a JSON [`KbSnapshot`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, ExportResult, KbError, KbResult};
use crate::term::{Literal, Term, Value};

use super::{GroundAssertion, KnowledgeBase};

/// Name of the collection whose instances are collections.
pub const COLLECTION: &str = "Collection";

/// Typed hierarchy edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// `(isa term collection)`
    Isa,
    /// `(genls spec general)` between collections.
    Genls,
    /// `(genlPreds spec general)` between relations.
    GenlPreds,
}

/// In-memory knowledge base.
#[derive(Debug, Default)]
pub struct MemoryKb {
    graph: DiGraph<Term, EdgeKind>,
    node_index: HashMap<Term, NodeIndex>,
    by_name: HashMap<String, Term>,
    collections: HashSet<Term>,
    arity: HashMap<Term, usize>,
    quoted_isa: HashMap<Term, Vec<Term>>,
    arg_isa: HashMap<(Term, usize), Vec<Term>>,
    comments: HashMap<Term, String>,
    assertions: Vec<GroundAssertion>,
    failing: HashSet<Term>,
}

impl MemoryKb {
    /// Create an empty knowledge base.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a node exists for the term, returning its index.
    pub fn add_term(&mut self, term: &Term) -> NodeIndex {
        if let Some(&idx) = self.node_index.get(term) {
            return idx;
        }
        let idx = self.graph.add_node(term.clone());
        self.node_index.insert(term.clone(), idx);
        self.by_name.insert(term.display_name(), term.clone());
        idx
    }

    /// Ensure a constant exists and return it.
    pub fn constant(&mut self, name: &str) -> Term {
        let term = Term::constant(name);
        self.add_term(&term);
        term
    }

    pub fn declare_collection(&mut self, term: &Term) {
        self.add_term(term);
        self.collections.insert(term.clone());
    }

    pub fn declare_relation(&mut self, term: &Term, arity: usize) {
        self.add_term(term);
        self.arity.insert(term.clone(), arity);
    }

    pub fn add_isa(&mut self, term: &Term, collection: &Term) {
        self.declare_collection(collection);
        self.add_edge(term, collection, EdgeKind::Isa);
    }

    pub fn add_genls(&mut self, spec: &Term, general: &Term) {
        self.declare_collection(spec);
        self.declare_collection(general);
        self.add_edge(spec, general, EdgeKind::Genls);
    }

    pub fn add_genl_preds(&mut self, spec: &Term, general: &Term) {
        self.add_edge(spec, general, EdgeKind::GenlPreds);
    }

    pub fn add_quoted_isa(&mut self, term: &Term, marker: &Term) {
        self.add_term(term);
        self.declare_collection(marker);
        let markers = self.quoted_isa.entry(term.clone()).or_default();
        if !markers.contains(marker) {
            markers.push(marker.clone());
        }
    }

    /// Add an argument-type constraint for a 1-based position.
    pub fn add_arg_isa(&mut self, relation: &Term, position: usize, collection: &Term) {
        self.add_term(relation);
        self.declare_collection(collection);
        self.arg_isa
            .entry((relation.clone(), position))
            .or_default()
            .push(collection.clone());
    }

    pub fn set_comment(&mut self, term: &Term, comment: impl Into<String>) {
        self.add_term(term);
        self.comments.insert(term.clone(), comment.into());
    }

    pub fn add_assertion(&mut self, assertion: GroundAssertion) {
        self.add_term(&assertion.relation);
        self.add_term(&assertion.subject);
        if let Value::Term(t) = &assertion.value {
            self.add_term(t);
        }
        self.assertions.push(assertion);
    }

    /// Make every query mentioning `term` fail, simulating a partial outage.
    pub fn fail_queries_about(&mut self, term: &Term) {
        self.failing.insert(term.clone());
    }

    /// Number of known terms.
    pub fn term_count(&self) -> usize {
        self.graph.node_count()
    }

    fn add_edge(&mut self, from: &Term, to: &Term, kind: EdgeKind) {
        let a = self.add_term(from);
        let b = self.add_term(to);
        let exists = self
            .graph
            .edges_directed(a, Direction::Outgoing)
            .any(|e| e.target() == b && *e.weight() == kind);
        if !exists {
            self.graph.add_edge(a, b, kind);
        }
    }

    fn guard(&self, query: &'static str, term: &Term) -> KbResult<()> {
        if self.failing.contains(term) {
            return Err(KbError::query_failed(query, term, "simulated failure"));
        }
        Ok(())
    }

    /// Direct neighbours along edges of the given kinds, in insertion order.
    fn neighbors(&self, term: &Term, kinds: &[EdgeKind], dir: Direction) -> Vec<Term> {
        let Some(&idx) = self.node_index.get(term) else {
            return Vec::new();
        };
        let mut edges: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(idx, dir)
            .filter(|e| kinds.contains(e.weight()))
            .map(|e| {
                let other = match dir {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                (e.id().index(), other)
            })
            .collect();
        edges.sort_by_key(|(id, _)| *id);
        edges
            .into_iter()
            .filter_map(|(_, n)| self.graph.node_weight(n).cloned())
            .collect()
    }

    /// BFS over edges of the given kinds, excluding the start term.
    fn transitive(&self, term: &Term, kinds: &[EdgeKind], dir: Direction) -> Vec<Term> {
        let mut found = Vec::new();
        let mut visited: HashSet<Term> = HashSet::new();
        visited.insert(term.clone());
        let mut queue: VecDeque<Term> = VecDeque::new();
        queue.push_back(term.clone());

        while let Some(current) = queue.pop_front() {
            for next in self.neighbors(&current, kinds, dir) {
                if visited.insert(next.clone()) {
                    found.push(next.clone());
                    queue.push_back(next);
                }
            }
        }
        found
    }

    fn generalization_kinds(&self, term: &Term) -> &'static [EdgeKind] {
        if self.arity.contains_key(term) {
            &[EdgeKind::GenlPreds]
        } else {
            &[EdgeKind::Genls]
        }
    }

    fn instance_of_closure(&self, term: &Term) -> Vec<Term> {
        let mut out: Vec<Term> = Vec::new();
        let mut seen: HashSet<Term> = HashSet::new();
        for direct in self.neighbors(term, &[EdgeKind::Isa], Direction::Outgoing) {
            if seen.insert(direct.clone()) {
                out.push(direct.clone());
            }
            for general in self.transitive(&direct, &[EdgeKind::Genls], Direction::Outgoing) {
                if seen.insert(general.clone()) {
                    out.push(general);
                }
            }
        }
        out
    }

    fn is_collection_unchecked(&self, term: &Term) -> bool {
        self.collections.contains(term)
            || self
                .instance_of_closure(term)
                .iter()
                .any(|c| matches!(c, Term::Constant { name, .. } if name == COLLECTION))
    }

    // -----------------------------------------------------------------------
    // Snapshot loading
    // -----------------------------------------------------------------------

    /// Build a knowledge base from a parsed snapshot.
    pub fn from_snapshot(snapshot: &KbSnapshot) -> ExportResult<Self> {
        let mut kb = MemoryKb::new();

        for decl in &snapshot.constants {
            let term = Term::Constant {
                name: decl.name.clone(),
                guid: decl.guid.clone(),
            };
            kb.add_term(&term);
        }
        for decl in &snapshot.narts {
            let args = decl
                .args
                .iter()
                .map(|a| Value::Term(kb.resolve_name(a)))
                .collect();
            let nart = Term::Nart {
                function: decl.function.clone(),
                args,
            };
            kb.add_term(&nart);
        }
        for name in &snapshot.collections {
            let term = kb.resolve_name(name);
            kb.declare_collection(&term);
        }
        for (name, arity) in &snapshot.arity {
            let term = kb.resolve_name(name);
            kb.declare_relation(&term, *arity);
        }
        for [term, collection] in &snapshot.isa {
            let (t, c) = (kb.resolve_name(term), kb.resolve_name(collection));
            kb.add_isa(&t, &c);
        }
        for [spec, general] in &snapshot.genls {
            let (s, g) = (kb.resolve_name(spec), kb.resolve_name(general));
            kb.add_genls(&s, &g);
        }
        for [spec, general] in &snapshot.genl_preds {
            let (s, g) = (kb.resolve_name(spec), kb.resolve_name(general));
            kb.add_genl_preds(&s, &g);
        }
        for [term, marker] in &snapshot.quoted_isa {
            let (t, m) = (kb.resolve_name(term), kb.resolve_name(marker));
            kb.add_quoted_isa(&t, &m);
        }
        for decl in &snapshot.arg_isa {
            if decl.position == 0 {
                return Err(ExportError::Snapshot {
                    message: format!("arg_isa for {} uses position 0", decl.relation),
                });
            }
            let r = kb.resolve_name(&decl.relation);
            let c = kb.resolve_name(&decl.collection);
            kb.add_arg_isa(&r, decl.position, &c);
        }
        for (name, comment) in &snapshot.comments {
            let term = kb.resolve_name(name);
            kb.set_comment(&term, comment.clone());
        }
        for decl in &snapshot.assertions {
            let relation = kb.resolve_name(&decl.relation);
            let subject = kb.resolve_name(&decl.subject);
            let value = match &decl.value {
                SnapshotValue::Term(name) => Value::Term(kb.resolve_name(name)),
                SnapshotValue::Literal(lit) => Value::Literal(lit.clone()),
            };
            kb.add_assertion(GroundAssertion::new(relation, subject, value));
        }

        tracing::info!(
            terms = kb.term_count(),
            assertions = kb.assertions.len(),
            "loaded knowledge base snapshot"
        );
        Ok(kb)
    }

    /// Load a JSON snapshot from disk.
    pub fn load_json(path: &Path) -> ExportResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ExportError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot: KbSnapshot =
            serde_json::from_str(&content).map_err(|e| ExportError::Snapshot {
                message: e.to_string(),
            })?;
        Self::from_snapshot(&snapshot)
    }

    fn resolve_name(&mut self, name: &str) -> Term {
        if let Some(term) = self.by_name.get(name) {
            return term.clone();
        }
        self.constant(name)
    }
}

impl KnowledgeBase for MemoryKb {
    fn find_term(&self, name: &str) -> KbResult<Option<Term>> {
        Ok(self.by_name.get(name).cloned())
    }

    fn all_terms(&self) -> KbResult<Vec<Term>> {
        Ok(self.graph.node_weights().cloned().collect())
    }

    fn instances_of(&self, collection: &Term) -> KbResult<Vec<Term>> {
        self.guard("instances", collection)?;
        Ok(self
            .graph
            .node_weights()
            .filter(|t| self.instance_of_closure(t).contains(collection))
            .cloned()
            .collect())
    }

    fn quoted_instances_of(&self, marker: &Term) -> KbResult<Vec<Term>> {
        self.guard("quoted-instances", marker)?;
        Ok(self
            .graph
            .node_weights()
            .filter(|t| self.quoted_isa.get(*t).is_some_and(|m| m.contains(marker)))
            .cloned()
            .collect())
    }

    fn is_instance_of(&self, term: &Term, collection: &Term) -> KbResult<bool> {
        self.guard("isa", term)?;
        Ok(self.instance_of_closure(term).contains(collection))
    }

    fn is_quoted_instance_of(&self, term: &Term, marker: &Term) -> KbResult<bool> {
        self.guard("quotedIsa", term)?;
        Ok(self
            .quoted_isa
            .get(term)
            .is_some_and(|markers| markers.contains(marker)))
    }

    fn is_collection(&self, term: &Term) -> KbResult<bool> {
        self.guard("collection?", term)?;
        Ok(self.is_collection_unchecked(term))
    }

    fn is_relation(&self, term: &Term) -> KbResult<bool> {
        self.guard("relation?", term)?;
        Ok(self.arity.contains_key(term))
    }

    fn is_binary_relation(&self, term: &Term) -> KbResult<bool> {
        self.guard("binary-relation?", term)?;
        Ok(self.arity.get(term) == Some(&2))
    }

    fn is_unary_relation(&self, term: &Term) -> KbResult<bool> {
        self.guard("unary-relation?", term)?;
        Ok(self.arity.get(term) == Some(&1))
    }

    fn is_individual(&self, term: &Term) -> KbResult<bool> {
        self.guard("individual?", term)?;
        Ok(self.node_index.contains_key(term) && !self.is_collection_unchecked(term))
    }

    fn direct_generalizations(&self, term: &Term) -> KbResult<Vec<Term>> {
        self.guard("genls", term)?;
        Ok(self.neighbors(term, self.generalization_kinds(term), Direction::Outgoing))
    }

    fn all_generalizations(&self, term: &Term) -> KbResult<Vec<Term>> {
        self.guard("all-genls", term)?;
        Ok(self.transitive(term, self.generalization_kinds(term), Direction::Outgoing))
    }

    fn direct_specializations(&self, term: &Term) -> KbResult<Vec<Term>> {
        self.guard("specs", term)?;
        Ok(self.neighbors(term, self.generalization_kinds(term), Direction::Incoming))
    }

    fn all_specializations(&self, term: &Term) -> KbResult<Vec<Term>> {
        self.guard("all-specs", term)?;
        Ok(self.transitive(term, self.generalization_kinds(term), Direction::Incoming))
    }

    fn all_instance_of(&self, term: &Term) -> KbResult<Vec<Term>> {
        self.guard("all-isa", term)?;
        Ok(self.instance_of_closure(term))
    }

    fn super_relations(&self, relation: &Term) -> KbResult<Vec<Term>> {
        self.guard("genlPreds", relation)?;
        Ok(self.transitive(relation, &[EdgeKind::GenlPreds], Direction::Outgoing))
    }

    fn argument_type_constraints(&self, relation: &Term, position: usize) -> KbResult<Vec<Term>> {
        self.guard("argIsa", relation)?;
        Ok(self
            .arg_isa
            .get(&(relation.clone(), position))
            .cloned()
            .unwrap_or_default())
    }

    fn comment(&self, term: &Term) -> KbResult<Option<String>> {
        self.guard("comment", term)?;
        Ok(self.comments.get(term).cloned())
    }

    fn ground_assertions(&self, subject: &Term, relations: &[Term]) -> KbResult<Vec<GroundAssertion>> {
        self.guard("gafs", subject)?;
        // A relation matches if it is requested or specializes a requested one.
        let mut cache: HashMap<&Term, bool> = HashMap::new();
        let mut out = Vec::new();
        for assertion in self.assertions.iter().filter(|a| &a.subject == subject) {
            let matches = *cache.entry(&assertion.relation).or_insert_with(|| {
                relations.contains(&assertion.relation)
                    || self
                        .transitive(&assertion.relation, &[EdgeKind::GenlPreds], Direction::Outgoing)
                        .iter()
                        .any(|g| relations.contains(g))
            });
            if matches {
                out.push(assertion.clone());
            }
        }
        Ok(out)
    }

    fn most_specific_common_generalization(&self, terms: &[Term]) -> KbResult<Option<Term>> {
        let Some((first, rest)) = terms.split_first() else {
            return Ok(None);
        };
        self.guard("mscg", first)?;

        let upward = |t: &Term| -> HashSet<Term> {
            let mut set: HashSet<Term> = self
                .transitive(t, self.generalization_kinds(t), Direction::Outgoing)
                .into_iter()
                .collect();
            set.insert(t.clone());
            set
        };
        let others: Vec<HashSet<Term>> = rest.iter().map(upward).collect();

        // Nearest-first BFS order from the first term.
        let mut candidates = vec![first.clone()];
        candidates.extend(self.transitive(first, self.generalization_kinds(first), Direction::Outgoing));
        Ok(candidates
            .into_iter()
            .find(|c| others.iter().all(|set| set.contains(c))))
    }
}

// ---------------------------------------------------------------------------
// Snapshot format
// ---------------------------------------------------------------------------

/// JSON snapshot of a knowledge base, terms referenced by display name.
///
/// Maps are ordered so loading the same file always yields the same term order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KbSnapshot {
    pub constants: Vec<ConstantDecl>,
    pub narts: Vec<NartDecl>,
    pub collections: Vec<String>,
    pub arity: BTreeMap<String, usize>,
    pub isa: Vec<[String; 2]>,
    pub genls: Vec<[String; 2]>,
    pub genl_preds: Vec<[String; 2]>,
    pub quoted_isa: Vec<[String; 2]>,
    pub arg_isa: Vec<ArgIsaDecl>,
    pub comments: BTreeMap<String, String>,
    pub assertions: Vec<AssertionDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantDecl {
    pub name: String,
    #[serde(default)]
    pub guid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NartDecl {
    pub function: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgIsaDecl {
    pub relation: String,
    pub position: usize,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionDecl {
    pub relation: String,
    pub subject: String,
    pub value: SnapshotValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotValue {
    Term(String),
    Literal(Literal),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animals() -> MemoryKb {
        let mut kb = MemoryKb::new();
        let dog = kb.constant("Dog");
        let canine = kb.constant("Canine");
        let animal = kb.constant("Animal");
        let species = kb.constant("BiologicalSpecies");
        kb.add_genls(&dog, &canine);
        kb.add_genls(&canine, &animal);
        kb.add_isa(&dog, &species);
        let rex = kb.constant("Rex");
        kb.add_isa(&rex, &dog);
        kb
    }

    #[test]
    fn transitive_generalizations_in_bfs_order() {
        let kb = animals();
        let gens = kb.all_generalizations(&Term::constant("Dog")).unwrap();
        assert_eq!(gens, vec![Term::constant("Canine"), Term::constant("Animal")]);
        let specs = kb.all_specializations(&Term::constant("Animal")).unwrap();
        assert_eq!(specs, vec![Term::constant("Canine"), Term::constant("Dog")]);
    }

    #[test]
    fn instance_of_follows_genls_of_types() {
        let kb = animals();
        let types = kb.all_instance_of(&Term::constant("Rex")).unwrap();
        assert!(types.contains(&Term::constant("Dog")));
        assert!(types.contains(&Term::constant("Animal")));
        assert!(kb.is_instance_of(&Term::constant("Rex"), &Term::constant("Canine")).unwrap());
        assert!(kb.is_individual(&Term::constant("Rex")).unwrap());
        assert!(kb.is_collection(&Term::constant("Dog")).unwrap());
        assert_eq!(
            kb.instances_of(&Term::constant("Animal")).unwrap(),
            vec![Term::constant("Rex")]
        );
    }

    #[test]
    fn collection_via_isa_collection() {
        let mut kb = MemoryKb::new();
        let t = kb.constant("Vehicle");
        let coll = kb.constant(COLLECTION);
        kb.add_isa(&t, &coll);
        assert!(kb.is_collection(&t).unwrap());
    }

    #[test]
    fn relation_arity_queries() {
        let mut kb = MemoryKb::new();
        let likes = kb.constant("likes");
        let happy = kb.constant("happy");
        kb.declare_relation(&likes, 2);
        kb.declare_relation(&happy, 1);
        assert!(kb.is_binary_relation(&likes).unwrap());
        assert!(!kb.is_binary_relation(&happy).unwrap());
        assert!(kb.is_unary_relation(&happy).unwrap());
        assert!(kb.is_relation(&happy).unwrap());
    }

    #[test]
    fn ground_assertions_follow_sub_relations() {
        let mut kb = MemoryKb::new();
        let rex = kb.constant("Rex");
        let owner = kb.constant("owner");
        let legal_owner = kb.constant("legalOwner");
        let ann = kb.constant("Ann");
        kb.declare_relation(&owner, 2);
        kb.declare_relation(&legal_owner, 2);
        kb.add_genl_preds(&legal_owner, &owner);
        kb.add_assertion(GroundAssertion::new(legal_owner.clone(), rex.clone(), ann.clone()));

        let found = kb.ground_assertions(&rex, &[owner.clone()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relation, legal_owner);
        assert!(kb.ground_assertions(&rex, &[]).unwrap().is_empty());
    }

    #[test]
    fn mscg_picks_nearest_common_ancestor() {
        let mut kb = animals();
        let cat = kb.constant("Cat");
        kb.add_genls(&cat, &Term::constant("Animal"));
        let mscg = kb
            .most_specific_common_generalization(&[Term::constant("Dog"), cat])
            .unwrap();
        assert_eq!(mscg, Some(Term::constant("Animal")));
    }

    #[test]
    fn failing_term_raises_query_failure() {
        let mut kb = animals();
        kb.fail_queries_about(&Term::constant("Dog"));
        assert!(kb.all_generalizations(&Term::constant("Dog")).is_err());
        assert!(kb.all_generalizations(&Term::constant("Canine")).is_ok());
    }

    #[test]
    fn snapshot_round_trip_through_json_file() {
        let json = r#"{
            "constants": [{"name": "Dog", "guid": "c0-01"}],
            "narts": [{"function": "FruitFn", "args": ["AppleTree"]}],
            "arity": {"likesFood": 2},
            "genls": [["Dog", "Animal"]],
            "quoted_isa": [["Dog", "PublicConstant"]],
            "arg_isa": [{"relation": "likesFood", "position": 1, "collection": "Animal"}],
            "comments": {"Dog": "A domesticated canine."},
            "assertions": [
                {"relation": "likesFood", "subject": "Dog", "value": {"term": "(FruitFn AppleTree)"}},
                {"relation": "nickname", "subject": "Dog", "value": {"literal": {"string": "doggo"}}}
            ]
        }"#;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(&path, json).unwrap();

        let kb = MemoryKb::load_json(&path).unwrap();
        let dog = kb.find_term("Dog").unwrap().unwrap();
        assert_eq!(
            dog,
            Term::Constant {
                name: "Dog".into(),
                guid: Some("c0-01".into())
            }
        );
        let nart = kb.find_term("(FruitFn AppleTree)").unwrap().unwrap();
        assert!(nart.is_nart());
        assert!(kb.is_quoted_instance_of(&dog, &Term::constant("PublicConstant")).unwrap());
        assert_eq!(
            kb.quoted_instances_of(&Term::constant("PublicConstant")).unwrap(),
            vec![dog.clone()]
        );
        assert_eq!(
            kb.argument_type_constraints(&Term::constant("likesFood"), 1).unwrap(),
            vec![Term::constant("Animal")]
        );
        assert_eq!(kb.comment(&dog).unwrap().as_deref(), Some("A domesticated canine."));
    }

    #[test]
    fn snapshot_rejects_position_zero() {
        let snapshot = KbSnapshot {
            arg_isa: vec![ArgIsaDecl {
                relation: "likes".into(),
                position: 0,
                collection: "Thing".into(),
            }],
            ..Default::default()
        };
        assert!(matches!(
            MemoryKb::from_snapshot(&snapshot),
            Err(ExportError::Snapshot { .. })
        ));
    }
}
