//! Shared fixtures for the integration tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use kb_onto_export::error::KbResult;
use kb_onto_export::kb::memory::MemoryKb;
use kb_onto_export::kb::{GroundAssertion, KnowledgeBase};
use kb_onto_export::progress::ExportProgress;
use kb_onto_export::term::Term;

#[allow(dead_code)]
pub fn c(name: &str) -> Term {
    Term::constant(name)
}

/// Animals, food and colours, with a public marker on everything except
/// `Canine`.
///
/// Dog -> Canine -> Animal, Dog -> Animal, Cat -> Animal; Rex isa Dog,
/// Tom isa Cat; likesFood(Animal, Food), hasColor(Animal, Color).
#[allow(dead_code)]
pub fn zoo_kb() -> MemoryKb {
    let mut kb = MemoryKb::new();
    let public = kb.constant("PublicConstant");
    let animal = kb.constant("Animal");
    let canine = kb.constant("Canine");
    let dog = kb.constant("Dog");
    let cat = kb.constant("Cat");
    let food = kb.constant("Food");
    let color = kb.constant("Color");
    kb.add_genls(&dog, &animal);
    kb.add_genls(&dog, &canine);
    kb.add_genls(&canine, &animal);
    kb.add_genls(&cat, &animal);
    kb.declare_collection(&food);
    kb.declare_collection(&color);

    let rex = kb.constant("Rex");
    let tom = kb.constant("Tom");
    let brown = kb.constant("Brown");
    let kibble = kb.constant("Kibble");
    kb.add_isa(&rex, &dog);
    kb.add_isa(&tom, &cat);
    kb.add_isa(&brown, &color);
    kb.add_isa(&kibble, &food);

    let likes_food = kb.constant("likesFood");
    let has_color = kb.constant("hasColor");
    kb.declare_relation(&likes_food, 2);
    kb.declare_relation(&has_color, 2);
    kb.add_arg_isa(&likes_food, 1, &animal);
    kb.add_arg_isa(&likes_food, 2, &food);
    kb.add_arg_isa(&has_color, 1, &animal);
    kb.add_arg_isa(&has_color, 2, &color);

    kb.add_assertion(GroundAssertion::new(has_color.clone(), rex.clone(), brown.clone()));
    kb.add_assertion(GroundAssertion::new(likes_food.clone(), rex.clone(), kibble.clone()));

    kb.set_comment(&dog, "A #$Canine kept as a pet.");
    kb.set_comment(&animal, "Living, moving organisms.");
    kb.set_comment(&likes_food, "(#$likesFood ANIMAL FOOD)");

    for term in [
        &animal, &dog, &cat, &food, &color, &rex, &tom, &brown, &kibble, &likes_food, &has_color,
    ] {
        kb.add_quoted_isa(term, &public);
    }
    kb
}

/// Delegating client that misbehaves on request: it can leak extra ground
/// assertions, return malformed ancestors, and cancel a run after a number
/// of collection queries.
#[allow(dead_code)]
pub struct ScriptedKb {
    inner: MemoryKb,
    leaked: HashMap<Term, Vec<GroundAssertion>>,
    malformed: HashMap<Term, Vec<Term>>,
    cancel_after: Option<(usize, ExportProgress)>,
    collection_queries: Cell<usize>,
    /// Progress value observed at the moment the cancel flag was set.
    pub progress_at_cancel: RefCell<Option<u8>>,
}

#[allow(dead_code)]
impl ScriptedKb {
    pub fn new(inner: MemoryKb) -> Self {
        Self {
            inner,
            leaked: HashMap::new(),
            malformed: HashMap::new(),
            cancel_after: None,
            collection_queries: Cell::new(0),
            progress_at_cancel: RefCell::new(None),
        }
    }

    /// Return `assertion` for its subject whatever relations are asked for.
    pub fn leak_assertion(&mut self, assertion: GroundAssertion) {
        self.leaked
            .entry(assertion.subject.clone())
            .or_default()
            .push(assertion);
    }

    /// Append `bad` to the instance-of ancestors of `term`.
    pub fn malformed_ancestor(&mut self, term: &Term, bad: Term) {
        self.malformed.entry(term.clone()).or_default().push(bad);
    }

    /// Cancel `progress` while answering the `n`th collection query.
    pub fn cancel_after_collection_queries(&mut self, n: usize, progress: ExportProgress) {
        self.cancel_after = Some((n, progress));
    }

    pub fn collection_queries(&self) -> usize {
        self.collection_queries.get()
    }
}

impl KnowledgeBase for ScriptedKb {
    fn find_term(&self, name: &str) -> KbResult<Option<Term>> {
        self.inner.find_term(name)
    }

    fn all_terms(&self) -> KbResult<Vec<Term>> {
        self.inner.all_terms()
    }

    fn instances_of(&self, collection: &Term) -> KbResult<Vec<Term>> {
        self.inner.instances_of(collection)
    }

    fn quoted_instances_of(&self, marker: &Term) -> KbResult<Vec<Term>> {
        self.inner.quoted_instances_of(marker)
    }

    fn is_instance_of(&self, term: &Term, collection: &Term) -> KbResult<bool> {
        self.inner.is_instance_of(term, collection)
    }

    fn is_quoted_instance_of(&self, term: &Term, marker: &Term) -> KbResult<bool> {
        self.inner.is_quoted_instance_of(term, marker)
    }

    fn is_collection(&self, term: &Term) -> KbResult<bool> {
        let calls = self.collection_queries.get() + 1;
        self.collection_queries.set(calls);
        if let Some((n, progress)) = &self.cancel_after {
            if calls == *n {
                *self.progress_at_cancel.borrow_mut() = Some(progress.percent());
                progress.cancel();
            }
        }
        self.inner.is_collection(term)
    }

    fn is_relation(&self, term: &Term) -> KbResult<bool> {
        self.inner.is_relation(term)
    }

    fn is_binary_relation(&self, term: &Term) -> KbResult<bool> {
        self.inner.is_binary_relation(term)
    }

    fn is_unary_relation(&self, term: &Term) -> KbResult<bool> {
        self.inner.is_unary_relation(term)
    }

    fn is_individual(&self, term: &Term) -> KbResult<bool> {
        self.inner.is_individual(term)
    }

    fn direct_generalizations(&self, term: &Term) -> KbResult<Vec<Term>> {
        self.inner.direct_generalizations(term)
    }

    fn all_generalizations(&self, term: &Term) -> KbResult<Vec<Term>> {
        self.inner.all_generalizations(term)
    }

    fn direct_specializations(&self, term: &Term) -> KbResult<Vec<Term>> {
        self.inner.direct_specializations(term)
    }

    fn all_specializations(&self, term: &Term) -> KbResult<Vec<Term>> {
        self.inner.all_specializations(term)
    }

    fn all_instance_of(&self, term: &Term) -> KbResult<Vec<Term>> {
        let mut types = self.inner.all_instance_of(term)?;
        if let Some(bad) = self.malformed.get(term) {
            types.extend(bad.iter().cloned());
        }
        Ok(types)
    }

    fn super_relations(&self, relation: &Term) -> KbResult<Vec<Term>> {
        self.inner.super_relations(relation)
    }

    fn argument_type_constraints(&self, relation: &Term, position: usize) -> KbResult<Vec<Term>> {
        self.inner.argument_type_constraints(relation, position)
    }

    fn comment(&self, term: &Term) -> KbResult<Option<String>> {
        self.inner.comment(term)
    }

    fn ground_assertions(&self, subject: &Term, relations: &[Term]) -> KbResult<Vec<GroundAssertion>> {
        let mut gafs = self.inner.ground_assertions(subject, relations)?;
        if let Some(extra) = self.leaked.get(subject) {
            gafs.extend(extra.iter().cloned());
        }
        Ok(gafs)
    }

    fn most_specific_common_generalization(&self, terms: &[Term]) -> KbResult<Option<Term>> {
        self.inner.most_specific_common_generalization(terms)
    }
}
