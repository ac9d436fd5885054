//! End-to-end tests for the ontology export pipeline.
//!
//! These drive `OntologyExportEngine` over in-memory knowledge bases, some
//! wrapped in a scripted client that leaks assertions, returns malformed
//! terms or cancels mid-run.

mod common;

use std::collections::HashSet;

use common::{ScriptedKb, c, zoo_kb};
use kb_onto_export::config::{AssertionRef, ExportConfig, SelectionMode};
use kb_onto_export::engine::{ExportState, OntologyExportEngine};
use kb_onto_export::error::ExportError;
use kb_onto_export::kb::memory::MemoryKb;
use kb_onto_export::kb::{GroundAssertion, KnowledgeBase};
use kb_onto_export::progress::ExportProgress;
use kb_onto_export::sink::{JsonSink, OntologyDocument, ValueExport};
use kb_onto_export::term::Term;

fn explicit(names: &[&str]) -> SelectionMode {
    SelectionMode::ExplicitTerms {
        terms: names.iter().map(|n| n.to_string()).collect(),
    }
}

fn public_subset() -> ExportConfig {
    ExportConfig {
        kb_subset_collections: vec!["PublicConstant".into()],
        upward_closure_eligibility_collections: vec!["PublicConstant".into()],
        include_upward_closure: true,
        applicable_relations: vec!["hasColor".into(), "likesFood".into()],
        ..Default::default()
    }
}

fn export<K: KnowledgeBase>(kb: &K, config: ExportConfig) -> OntologyDocument {
    let mut engine = OntologyExportEngine::new(kb, config);
    let mut sink = JsonSink::new();
    let report = engine.run(&mut sink).unwrap();
    assert_eq!(report.state, ExportState::Done);
    sink.into_document()
}

#[test]
fn closure_skips_ineligible_intermediate() {
    let kb = zoo_kb();
    let config = ExportConfig {
        selection: explicit(&["Dog"]),
        ..public_subset()
    };
    let mut engine = OntologyExportEngine::new(&kb, config);
    let mut sink = JsonSink::new();
    let report = engine.run(&mut sink).unwrap();

    // Canine is not public; Animal is reached once, directly and through it.
    assert_eq!(engine.upward_closure().as_slice(), &[c("Animal")]);
    assert_eq!(report.upward_closure, 1);

    let doc = sink.document();
    let dog = doc.classes.iter().find(|t| t.id == "Dog").unwrap();
    let supers: Vec<&str> = dog.generalizations.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(supers, vec!["Animal"]);
}

#[test]
fn relation_argument_constraints_join_the_closure() {
    let kb = zoo_kb();
    let config = ExportConfig {
        selection: explicit(&["likesFood"]),
        ..public_subset()
    };
    let mut engine = OntologyExportEngine::new(&kb, config);
    let mut sink = JsonSink::new();
    engine.run(&mut sink).unwrap();

    let closure = engine.upward_closure();
    assert!(closure.contains(&c("Animal")));
    assert!(closure.contains(&c("Food")));

    let likes = &sink.document().relations[0];
    assert_eq!(likes.id, "likesFood");
    assert_eq!(likes.domain.as_ref().unwrap().id, "Animal");
    assert_eq!(likes.range.as_ref().unwrap().id, "Food");
    assert_eq!(likes.comment.as_deref(), Some("(likesFood ANIMAL FOOD)"));
}

#[test]
fn structural_assertions_are_not_properties() {
    let mut kb = ScriptedKb::new(zoo_kb());
    kb.leak_assertion(GroundAssertion::new(c("isa"), c("Rex"), c("Dog")));
    let config = ExportConfig {
        selection: explicit(&["Rex", "Brown", "hasColor"]),
        applicable_relations: vec!["hasColor".into()],
        ..Default::default()
    };
    let mut engine = OntologyExportEngine::new(&kb, config);
    let mut sink = JsonSink::new();
    let report = engine.run(&mut sink).unwrap();

    let rex = sink
        .document()
        .individuals
        .iter()
        .find(|t| t.id == "Rex")
        .unwrap();
    assert_eq!(rex.properties.len(), 1);
    assert_eq!(rex.properties[0].relation.id, "hasColor");
    assert!(matches!(&rex.properties[0].value, ValueExport::Term(r) if r.id == "Brown"));
    assert_eq!(report.assertions, 1);
}

#[test]
fn cancellation_mid_classification_keeps_partial_buckets() {
    let progress = ExportProgress::new();
    let mut kb = ScriptedKb::new(zoo_kb());
    kb.cancel_after_collection_queries(2, progress.clone());
    let config = ExportConfig {
        selection: explicit(&[
            "Animal", "Dog", "Cat", "Food", "Color", "Rex", "Tom", "Brown", "Kibble", "likesFood",
        ]),
        ..Default::default()
    };
    let mut engine = OntologyExportEngine::with_progress(&kb, config, progress);
    let mut sink = JsonSink::new();
    let report = engine.run(&mut sink).unwrap();

    assert_eq!(report.state, ExportState::Cancelled);
    assert_eq!(engine.state(), ExportState::Cancelled);
    assert_eq!(report.selected, 10);
    assert_eq!(engine.classified().len(), 2);
    assert_eq!(report.classes, 2);
    assert_eq!(kb.collection_queries(), 2);

    let at_cancel = (*kb.progress_at_cancel.borrow()).unwrap();
    assert!(at_cancel <= report.progress);
    assert!(report.progress < 100);
    // Serialization never started.
    assert!(sink.document().header.is_none());
}

#[test]
fn identical_runs_produce_identical_documents() {
    let mut kb = zoo_kb();
    let mix = Term::nart("CollectionIntersection2Fn", [c("Food"), c("Kibble")]);
    kb.add_assertion(GroundAssertion::new(c("likesFood"), c("Tom"), mix));

    let first = export(&kb, public_subset());
    let second = export(&kb, public_subset());
    assert_eq!(first, second);
    assert_eq!(first.to_json_string().unwrap(), second.to_json_string().unwrap());
    assert_eq!(first.composites.len(), 1);
    assert_eq!(first.composites[0].id, "anon-1");

    // The same engine twice: anonymous ids restart with each run.
    let mut engine = OntologyExportEngine::new(&kb, public_subset());
    let mut sink = JsonSink::new();
    engine.run(&mut sink).unwrap();
    let mut again = JsonSink::new();
    engine.run(&mut again).unwrap();
    assert_eq!(sink.document(), again.document());
}

#[test]
fn composites_never_carry_unmarked_members() {
    let mut kb = zoo_kb();
    let secret = kb.constant("SecretRation");
    let ration = Term::nart("CollectionIntersection2Fn", [c("Food"), secret.clone()]);
    kb.add_assertion(GroundAssertion::new(c("likesFood"), c("Tom"), ration));
    kb.add_assertion(GroundAssertion::new(c("likesFood"), c("Tom"), secret));

    let mut engine = OntologyExportEngine::new(&kb, public_subset());
    let mut sink = JsonSink::new();
    let report = engine.run(&mut sink).unwrap();
    let doc = sink.document();

    assert!(doc.composites.is_empty());
    assert_eq!(report.composites, 0);
    assert_eq!(report.dropped_assertions, 2);
    let tom = doc.individuals.iter().find(|t| t.id == "Tom").unwrap();
    assert!(tom.properties.is_empty());
    assert!(!doc.to_json_string().unwrap().contains("SecretRation"));
}

#[test]
fn malformed_ancestors_are_skipped() {
    let mut kb = ScriptedKb::new(zoo_kb());
    kb.malformed_ancestor(&c("Rex"), Term::constant(""));
    let config = ExportConfig {
        selection: explicit(&["Rex"]),
        include_upward_closure: true,
        ..Default::default()
    };
    let mut engine = OntologyExportEngine::new(&kb, config);
    let report = engine.run(&mut JsonSink::new()).unwrap();

    assert_eq!(report.state, ExportState::Done);
    assert!(!engine.upward_closure().contains(&Term::constant("")));
    assert!(engine.upward_closure().contains(&c("Dog")));
    assert!(engine.upward_closure().contains(&c("Animal")));
}

#[test]
fn failed_selection_query_aborts_the_run() {
    let mut kb = zoo_kb();
    kb.fail_queries_about(&c("Animal"));
    let config = ExportConfig {
        selection: SelectionMode::BelowRootTerm {
            root: "Animal".into(),
        },
        ..Default::default()
    };
    let mut engine = OntologyExportEngine::new(&kb, config);
    let err = engine.run(&mut JsonSink::new()).unwrap_err();
    assert!(matches!(err, ExportError::SelectionFailed { ref mode, .. } if mode == "below-root-term"));
}

#[test]
fn unknown_applicable_relation_is_fatal() {
    let kb = zoo_kb();
    let config = ExportConfig {
        selection: explicit(&["Rex"]),
        applicable_relations: vec!["hasColour".into()],
        ..Default::default()
    };
    let err = OntologyExportEngine::new(&kb, config)
        .run(&mut JsonSink::new())
        .unwrap_err();
    assert!(matches!(err, ExportError::UnresolvedTerm { role: "applicable relation", .. }));
}

#[test]
fn non_atomic_terms_follow_policy() {
    let mut kb = zoo_kb();
    let fruit = Term::nart("FruitFn", [c("AppleTree")]);
    kb.add_genls(&fruit, &c("Food"));
    let selection = explicit(&["(FruitFn AppleTree)", "Food"]);

    let strict = ExportConfig {
        selection: selection.clone(),
        ..Default::default()
    };
    let mut engine = OntologyExportEngine::new(&kb, strict);
    let report = engine.run(&mut JsonSink::new()).unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(engine.export_set().as_slice(), &[c("Food")]);
    assert_eq!(engine.substitutes_for(&fruit), Some(&[c("Food")][..]));

    let permissive = ExportConfig {
        selection,
        include_non_atomic_terms: true,
        ..Default::default()
    };
    let doc = export(&kb, permissive);
    let class = doc
        .classes
        .iter()
        .find(|t| t.id == "FruitFn-AppleTree")
        .unwrap();
    assert_eq!(class.label, "FruitFn-AppleTree");
    let food = doc.classes.iter().find(|t| t.id == "Food").unwrap();
    assert_eq!(food.specializations[0].label, "FruitFn-AppleTree");
    let json = doc.to_json_string().unwrap();
    assert!(!json.contains("(FruitFn"));
    assert_eq!(class.generalizations[0].id, "Food");
}

#[test]
fn buckets_are_exclusive_over_the_entire_kb() {
    let mut kb = zoo_kb();
    let between = kb.constant("between");
    kb.declare_relation(&between, 3);
    let config = ExportConfig {
        selection: SelectionMode::EntireKb,
        ..Default::default()
    };
    let mut engine = OntologyExportEngine::new(&kb, config);
    let report = engine.run(&mut JsonSink::new()).unwrap();

    let classified = engine.classified();
    for term in engine.export_set() {
        let hits = [
            &classified.classes,
            &classified.relations,
            &classified.individuals,
            &classified.unclassified,
        ]
        .iter()
        .filter(|bucket| bucket.contains(term))
        .count();
        assert_eq!(hits, 1, "{term} filed {hits} times");
    }
    assert!(classified.unclassified.contains(&between));
    assert_eq!(report.unclassified, 1);
}

#[test]
fn below_root_selection_is_filtered_by_marker() {
    let kb = zoo_kb();
    let config = ExportConfig {
        selection: SelectionMode::BelowRootTerm {
            root: "Animal".into(),
        },
        kb_subset_collections: vec!["PublicConstant".into()],
        ..Default::default()
    };
    let mut engine = OntologyExportEngine::new(&kb, config);
    engine.run(&mut JsonSink::new()).unwrap();
    assert_eq!(
        engine.selection().as_slice(),
        &[c("Animal"), c("Dog"), c("Cat"), c("Rex"), c("Tom")]
    );
}

#[test]
fn selected_assertions_select_relation_and_arguments() {
    let kb = zoo_kb();
    let config = ExportConfig {
        selection: SelectionMode::SelectedAssertions {
            assertions: vec![AssertionRef {
                relation: "likesFood".into(),
                args: vec!["Rex".into(), "Kibble".into()],
            }],
        },
        ..Default::default()
    };
    let mut engine = OntologyExportEngine::new(&kb, config);
    engine.run(&mut JsonSink::new()).unwrap();
    assert_eq!(
        engine.selection().as_slice(),
        &[c("likesFood"), c("Rex"), c("Kibble")]
    );
}

#[test]
fn edges_only_reference_exported_terms() {
    let kb = zoo_kb();
    let doc = export(&kb, public_subset());

    let exported: HashSet<&str> = doc
        .classes
        .iter()
        .chain(&doc.relations)
        .chain(&doc.individuals)
        .map(|t| t.id.as_str())
        .collect();
    assert!(!exported.contains("Canine"));

    for term in doc.classes.iter().chain(&doc.relations).chain(&doc.individuals) {
        let targets = term
            .generalizations
            .iter()
            .chain(&term.specializations)
            .chain(&term.types)
            .chain(term.domain.iter())
            .chain(term.range.iter());
        for target in targets {
            assert!(exported.contains(target.id.as_str()), "{} -> {}", term.id, target.id);
            assert_ne!(target.id, term.id);
        }
    }

    // No two superclasses of a term generalize one another.
    for term in &doc.classes {
        for a in &term.generalizations {
            let above = kb.all_generalizations(&c(&a.id)).unwrap();
            for b in &term.generalizations {
                assert!(!above.contains(&c(&b.id)), "{} above {}", b.id, a.id);
            }
        }
    }

    let animal = doc.classes.iter().find(|t| t.id == "Animal").unwrap();
    let subs: Vec<&str> = animal.specializations.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(subs, vec!["Dog", "Cat"]);
}

#[test]
fn snapshot_and_config_files_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let kb_path = dir.path().join("kb.json");
    let config_path = dir.path().join("export.toml");
    let out_path = dir.path().join("ontology.json");

    std::fs::write(
        &kb_path,
        r#"{
            "genls": [["Dog", "Animal"]],
            "isa": [["Rex", "Dog"]],
            "arity": {"hasColor": 2},
            "quoted_isa": [["Dog", "PublicConstant"], ["Rex", "PublicConstant"], ["hasColor", "PublicConstant"]],
            "comments": {"Dog": "A\tdog."},
            "assertions": [
                {"relation": "hasColor", "subject": "Rex", "value": {"literal": {"string": "brown"}}}
            ]
        }"#,
    )
    .unwrap();
    std::fs::write(
        &config_path,
        r#"
        kb_subset_collections = ["PublicConstant"]
        applicable_relations = ["hasColor"]

        [selection]
        mode = "kb-subset"
        "#,
    )
    .unwrap();

    let kb = MemoryKb::load_json(&kb_path).unwrap();
    let config = ExportConfig::load(&config_path).unwrap();
    let mut engine = OntologyExportEngine::new(&kb, config);
    let mut sink = JsonSink::new();
    let report = engine.run(&mut sink).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.selected, 3);

    let doc = sink.into_document();
    doc.write_to(&out_path).unwrap();
    let back: OntologyDocument =
        serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(back, doc);

    assert_eq!(back.classes[0].comment.as_deref(), Some("A dog."));
    let rex = &back.individuals[0];
    assert_eq!(
        rex.properties[0].value,
        ValueExport::Literal {
            value: "brown".into(),
            datatype: None,
        }
    );
}

#[test]
fn missing_snapshot_is_an_io_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let err = MemoryKb::load_json(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ExportError::Io { .. }));
}
