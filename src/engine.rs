//! Export engine: top-level API driving one ontology export.
//!
//! `OntologyExportEngine` runs the pipeline select → close upward → resolve →
//! classify → gather → serialize as a state machine. Before each unit of work
//! it polls the shared [`ExportProgress`]; a cancellation moves the engine to
//! [`ExportState::Cancelled`] and leaves the partial buckets in place.
//!
//! Only setup and the initial selection can fail a run. Everything after that
//! is logged per term and counted in the [`ExportReport`].

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::classify::{Category, ClassifiedTerms, TermClassifier, without_self_references};
use crate::closure::ClosureComputer;
use crate::config::{ExportConfig, SelectionMode};
use crate::error::{ExportError, ExportResult, KbError, KbResult};
use crate::filter::TermFilter;
use crate::gather::{AssertionGatherer, DerivedTerm, GatherPolicy, PropertyAssertion};
use crate::identifier::sanitize_comment;
use crate::kb::KnowledgeBase;
use crate::progress::{Cancelled, Checkpoint, ExportProgress, StageBand};
use crate::resolver::TermResolver;
use crate::sink::{ExportHeader, ExportedTerm, OntologySink};
use crate::term::{AnonymousAllocator, Term, TermSet};

const SELECT_END: u8 = 5;
const CLOSURE_END: u8 = 15;
const RESOLVE_END: u8 = 25;

// Relative per-term cost of the last three stages, in queries.
const CLASSIFY_WEIGHT: u32 = 3;
const GATHER_WEIGHT: u32 = 2;
const SERIALIZE_WEIGHT: u32 = 4;

/// Pipeline state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportState {
    #[default]
    Idle,
    Selecting,
    ClosingUpward,
    Resolving,
    Classifying,
    Gathering,
    Serializing,
    Done,
    Cancelled,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Selecting => "selecting",
            Self::ClosingUpward => "closing-upward",
            Self::Resolving => "resolving",
            Self::Classifying => "classifying",
            Self::Gathering => "gathering",
            Self::Serializing => "serializing",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Counts of one export run, complete or cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub state: ExportState,
    pub selected: usize,
    pub upward_closure: usize,
    /// Terms removed while resolving (non-representable or uncommented).
    pub removed: usize,
    pub classes: usize,
    pub relations: usize,
    pub individuals: usize,
    pub unclassified: usize,
    pub assertions: usize,
    pub dropped_assertions: usize,
    pub composites: usize,
    /// Edge targets with no exported substitute.
    pub unresolved: usize,
    pub failed_queries: usize,
    pub progress: u8,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.state == ExportState::Done
    }
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ontology export {}", self.state)?;
        writeln!(f, "  selected:        {}", self.selected)?;
        writeln!(f, "  upward closure:  {}", self.upward_closure)?;
        writeln!(f, "  removed:         {}", self.removed)?;
        writeln!(f, "  classes:         {}", self.classes)?;
        writeln!(f, "  relations:       {}", self.relations)?;
        writeln!(f, "  individuals:     {}", self.individuals)?;
        writeln!(f, "  unclassified:    {}", self.unclassified)?;
        writeln!(f, "  assertions:      {}", self.assertions)?;
        writeln!(f, "  dropped:         {}", self.dropped_assertions)?;
        writeln!(f, "  composites:      {}", self.composites)?;
        writeln!(f, "  unresolved:      {}", self.unresolved)?;
        writeln!(f, "  failed queries:  {}", self.failed_queries)?;
        writeln!(f, "  progress:        {}%", self.progress)?;
        Ok(())
    }
}

/// Why a run stopped early.
enum Halt {
    Cancelled,
    Failed(ExportError),
}

impl From<Cancelled> for Halt {
    fn from(_: Cancelled) -> Self {
        Halt::Cancelled
    }
}

impl From<ExportError> for Halt {
    fn from(e: ExportError) -> Self {
        Halt::Failed(e)
    }
}

/// Everything one run accumulates. Replaced wholesale at run start.
#[derive(Debug, Default)]
struct RunOutput {
    selection: TermSet,
    closure: TermSet,
    export_set: TermSet,
    removed: TermSet,
    substitutions: HashMap<Term, Vec<Term>>,
    classified: ClassifiedTerms,
    properties: HashMap<Term, Vec<PropertyAssertion>>,
    composites: Vec<DerivedTerm>,
    tally: Tally,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    assertions: usize,
    dropped_assertions: usize,
    unresolved: usize,
    failed_queries: usize,
}

/// Configured names resolved against the knowledge base.
#[derive(Debug, Default)]
struct Setup {
    subset_markers: Vec<Term>,
    eligibility: Vec<Term>,
    applicable: TermSet,
    structural: TermSet,
    root: Option<Term>,
    listed: Vec<Term>,
}

/// Drives ontology exports over one knowledge base.
///
/// One engine runs one export at a time. Concurrent exports need their own
/// engines; observers share the run's [`ExportProgress`] handle.
pub struct OntologyExportEngine<'a, K: KnowledgeBase + ?Sized> {
    kb: &'a K,
    config: ExportConfig,
    progress: ExportProgress,
    allocator: AnonymousAllocator,
    state: ExportState,
    output: RunOutput,
}

impl<'a, K: KnowledgeBase + ?Sized> OntologyExportEngine<'a, K> {
    pub fn new(kb: &'a K, config: ExportConfig) -> Self {
        Self::with_progress(kb, config, ExportProgress::new())
    }

    /// Create an engine reporting into an existing progress handle.
    pub fn with_progress(kb: &'a K, config: ExportConfig, progress: ExportProgress) -> Self {
        Self {
            kb,
            config,
            progress,
            allocator: AnonymousAllocator::new(),
            state: ExportState::Idle,
            output: RunOutput::default(),
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Progress handle; clone it to observe or cancel from another thread.
    pub fn progress(&self) -> &ExportProgress {
        &self.progress
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn selection(&self) -> &TermSet {
        &self.output.selection
    }

    pub fn upward_closure(&self) -> &TermSet {
        &self.output.closure
    }

    /// The final export set after resolving.
    pub fn export_set(&self) -> &TermSet {
        &self.output.export_set
    }

    pub fn classified(&self) -> &ClassifiedTerms {
        &self.output.classified
    }

    /// Exported generalizations recorded for a term removed while resolving.
    pub fn substitutes_for(&self, term: &Term) -> Option<&[Term]> {
        self.output.substitutions.get(term).map(Vec::as_slice)
    }

    /// Derived composite terms of the last run.
    pub fn composites(&self) -> &[DerivedTerm] {
        &self.output.composites
    }

    /// Run one export into `sink`.
    ///
    /// Returns the report for both completed and cancelled runs. Fails only on
    /// an invalid configuration, an unresolvable configured term, a failed
    /// selection query or a serializer error.
    pub fn run(&mut self, sink: &mut dyn OntologySink) -> ExportResult<ExportReport> {
        self.config.validate()?;

        self.allocator.reset();
        self.progress.restart();
        self.state = ExportState::Idle;

        let mut output = RunOutput::default();
        let mut state = ExportState::Idle;
        let result = self.execute(&mut output, &mut state, sink);
        self.output = output;

        match result {
            Ok(()) => {
                self.progress.advance_to(100);
                enter(&mut state, ExportState::Done);
            }
            Err(Halt::Cancelled) => {
                tracing::info!(stage = %state, progress = self.progress.percent(), "export cancelled");
                enter(&mut state, ExportState::Cancelled);
            }
            Err(Halt::Failed(e)) => {
                tracing::error!(stage = %state, error = %e, "export failed");
                self.state = state;
                return Err(e);
            }
        }
        self.state = state;

        let report = self.report();
        tracing::info!(
            state = %report.state,
            classes = report.classes,
            relations = report.relations,
            individuals = report.individuals,
            assertions = report.assertions,
            failed_queries = report.failed_queries,
            "export finished"
        );
        Ok(report)
    }

    /// Counts of the last run.
    pub fn report(&self) -> ExportReport {
        let out = &self.output;
        ExportReport {
            state: self.state,
            selected: out.selection.len(),
            upward_closure: out.closure.len(),
            removed: out.removed.len(),
            classes: out.classified.classes.len(),
            relations: out.classified.relations.len(),
            individuals: out.classified.individuals.len(),
            unclassified: out.classified.unclassified.len(),
            assertions: out.tally.assertions,
            dropped_assertions: out.tally.dropped_assertions,
            composites: out.composites.len(),
            unresolved: out.tally.unresolved,
            failed_queries: out.tally.failed_queries,
            progress: self.progress.percent(),
        }
    }

    fn execute(
        &self,
        out: &mut RunOutput,
        state: &mut ExportState,
        sink: &mut dyn OntologySink,
    ) -> Result<(), Halt> {
        let setup = self.setup()?;
        let filter = TermFilter::new(self.kb, self.config.include_non_atomic_terms);
        let result = self.stages(&setup, &filter, out, state, sink);
        out.tally.failed_queries += filter.failed_queries();
        result
    }

    fn stages(
        &self,
        setup: &Setup,
        filter: &TermFilter<'_, K>,
        out: &mut RunOutput,
        state: &mut ExportState,
        sink: &mut dyn OntologySink,
    ) -> Result<(), Halt> {
        let kb = self.kb;

        enter(state, ExportState::Selecting);
        let band = self.progress.band(0, SELECT_END);
        band.checkpoint(0, 1)?;
        out.selection = self.select(setup, filter)?;
        band.complete();
        tracing::info!(
            mode = self.config.selection.name(),
            selected = out.selection.len(),
            "selection complete"
        );

        enter(state, ExportState::ClosingUpward);
        let band = self.progress.band(SELECT_END, CLOSURE_END);
        if self.config.upward_closure_enabled() {
            let closure = ClosureComputer::new(kb, filter);
            let result = closure.compute_with(&out.selection, &setup.eligibility, &band);
            out.tally.failed_queries += closure.failed_queries();
            out.closure = result?;
            tracing::info!(added = out.closure.len(), "upward closure complete");
        }
        band.complete();
        out.export_set = out.selection.clone();
        out.export_set.union_with(&out.closure);

        enter(state, ExportState::Resolving);
        let band = self.progress.band(CLOSURE_END, RESOLVE_END);
        self.remove_unexportable(filter, out, &band)?;
        band.complete();

        let RunOutput {
            export_set,
            removed,
            substitutions,
            classified,
            properties,
            composites,
            tally,
            ..
        } = out;
        let export_set: &TermSet = export_set;
        let resolver = TermResolver::new(kb, export_set);
        for term in removed.iter() {
            let found = resolver.find_allowed_or_generalize(std::slice::from_ref(term));
            substitutions.insert(term.clone(), found);
        }

        let [classify_band, gather_band, serialize_band] = self.weighted_bands();

        let result = (|| -> Result<(), Halt> {
            enter(state, ExportState::Classifying);
            let band = self.progress.band(classify_band.0, classify_band.1);
            let classifier = TermClassifier::new(kb, self.config.relation_policy);
            let classified_result = classifier.classify_with(export_set.as_slice(), &band, classified);
            tally.failed_queries += classifier.failed_queries();
            classified_result?;
            band.complete();
            tracing::info!(
                classes = classified.classes.len(),
                relations = classified.relations.len(),
                individuals = classified.individuals.len(),
                unclassified = classified.unclassified.len(),
                "classification complete"
            );

            enter(state, ExportState::Gathering);
            let band = self.progress.band(gather_band.0, gather_band.1);
            self.gather(setup, filter, export_set, classified, properties, composites, tally, &band)?;
            band.complete();

            enter(state, ExportState::Serializing);
            let band = self.progress.band(serialize_band.0, serialize_band.1);
            self.serialize(&resolver, classified, properties, composites, tally, sink, &band)?;
            band.complete();
            Ok(())
        })();

        tally.failed_queries += resolver.failed_queries();
        tally.unresolved += resolver.unresolved_terms();
        result
    }

    /// Resolve every configured name. Any miss is fatal.
    fn setup(&self) -> ExportResult<Setup> {
        let config = &self.config;
        let mut setup = Setup::default();
        for name in &config.kb_subset_collections {
            setup.subset_markers.push(self.resolve("KB-subset collection", name)?);
        }
        for name in &config.upward_closure_eligibility_collections {
            setup.eligibility.push(self.resolve("eligibility collection", name)?);
        }
        for name in &config.applicable_relations {
            setup.applicable.insert(self.resolve("applicable relation", name)?);
        }
        // Structural relations the knowledge base does not know are harmless.
        for name in &config.structural_relations {
            let term = self.kb.find_term(name)?.unwrap_or_else(|| Term::constant(name));
            setup.structural.insert(term);
        }
        match &config.selection {
            SelectionMode::BelowRootTerm { root } => {
                setup.root = Some(self.resolve("root", root)?);
            }
            SelectionMode::ExplicitTerms { terms } => {
                for name in terms {
                    setup.listed.push(self.resolve("selected", name)?);
                }
            }
            SelectionMode::SelectedAssertions { assertions } => {
                for assertion in assertions {
                    setup.listed.push(self.resolve("assertion relation", &assertion.relation)?);
                    for arg in &assertion.args {
                        setup.listed.push(self.resolve("assertion argument", arg)?);
                    }
                }
            }
            _ => {}
        }
        Ok(setup)
    }

    fn resolve(&self, role: &'static str, name: &str) -> ExportResult<Term> {
        self.kb
            .find_term(name)?
            .ok_or_else(|| ExportError::UnresolvedTerm {
                role,
                name: name.to_string(),
            })
    }

    /// Build the selection set. A failed query here aborts the run.
    fn select(&self, setup: &Setup, filter: &TermFilter<'_, K>) -> ExportResult<TermSet> {
        let mode = &self.config.selection;
        let fail = |source: KbError| ExportError::SelectionFailed {
            mode: mode.name().to_string(),
            source,
        };

        let mut selected = TermSet::new();
        match mode {
            SelectionMode::KbSubset | SelectionMode::KbSubsetPlusUpwardClosure => {
                for marker in &setup.subset_markers {
                    selected.extend(self.kb.quoted_instances_of(marker).map_err(fail)?);
                }
            }
            SelectionMode::BelowRootTerm { .. } => {
                if let Some(root) = &setup.root {
                    let mut below = vec![root.clone()];
                    below.extend(self.kb.all_specializations(root).map_err(fail)?);
                    below.extend(self.kb.instances_of(root).map_err(fail)?);
                    selected.extend(filter.filter_to_kb_subset(&below, &setup.subset_markers));
                }
            }
            SelectionMode::ExplicitTerms { .. } | SelectionMode::SelectedAssertions { .. } => {
                selected.extend(setup.listed.iter().cloned());
            }
            SelectionMode::EntireKb => {
                selected.extend(self.kb.all_terms().map_err(fail)?);
            }
        }
        Ok(selected)
    }

    /// Drop non-representable terms and, if configured, uncommented ones.
    fn remove_unexportable(
        &self,
        filter: &TermFilter<'_, K>,
        out: &mut RunOutput,
        band: &StageBand<'_>,
    ) -> Result<(), Cancelled> {
        let total = out.export_set.len();
        for (done, term) in out.export_set.iter().enumerate() {
            band.checkpoint(done, total)?;
            if !filter.is_representable(term) {
                tracing::debug!(term = %term, "not representable, removing");
                out.removed.insert(term.clone());
            } else if self.config.omit_uncommented_terms
                && !self.has_comment(term, &mut out.tally)
            {
                tracing::debug!(term = %term, "uncommented, removing");
                out.removed.insert(term.clone());
            }
        }
        if !out.removed.is_empty() {
            out.export_set = TermFilter::<K>::filter_out_of_set(out.export_set.as_slice(), &out.removed)
                .into_iter()
                .collect();
            tracing::info!(removed = out.removed.len(), kept = out.export_set.len(), "export set resolved");
        }
        Ok(())
    }

    fn has_comment(&self, term: &Term, tally: &mut Tally) -> bool {
        match self.kb.comment(term) {
            Ok(comment) => comment.is_some_and(|c| !sanitize_comment(&c).is_empty()),
            Err(e) => {
                tally.failed_queries += 1;
                tracing::warn!(term = %term, error = %e, "comment query failed, keeping term");
                true
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn gather(
        &self,
        setup: &Setup,
        filter: &TermFilter<'_, K>,
        export_set: &TermSet,
        classified: &ClassifiedTerms,
        properties: &mut HashMap<Term, Vec<PropertyAssertion>>,
        composites: &mut Vec<DerivedTerm>,
        tally: &mut Tally,
        band: &StageBand<'_>,
    ) -> Result<(), Cancelled> {
        let mut policy = GatherPolicy::from_config(&self.config, setup.subset_markers.clone());
        policy.structural_relations = setup.structural.clone();
        let gatherer = AssertionGatherer::new(self.kb, filter, export_set, &self.allocator, policy);

        let terms: Vec<&Term> = exported_terms(classified).map(|(t, _)| t).collect();
        let total = terms.len();
        let mut outcome = Ok(());
        for (done, term) in terms.into_iter().enumerate() {
            if let Err(c) = band.checkpoint(done, total) {
                outcome = Err(c);
                break;
            }
            let found = gatherer.gather_property_assertions(term, &setup.applicable);
            if !found.is_empty() {
                properties.insert(term.clone(), found);
            }
        }

        let stats = gatherer.stats();
        tally.assertions += stats.gathered;
        tally.dropped_assertions += stats.dropped();
        tally.failed_queries += stats.failed_queries;
        *composites = gatherer.derived_terms();
        tracing::info!(
            assertions = stats.gathered,
            dropped = stats.dropped(),
            composites = composites.len(),
            "assertions gathered"
        );
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn serialize(
        &self,
        resolver: &TermResolver<'_, K>,
        classified: &ClassifiedTerms,
        properties: &HashMap<Term, Vec<PropertyAssertion>>,
        composites: &[DerivedTerm],
        tally: &mut Tally,
        sink: &mut dyn OntologySink,
        band: &StageBand<'_>,
    ) -> Result<(), Halt> {
        sink.begin(&ExportHeader {
            selection_mode: self.config.selection.name().to_string(),
            term_count: classified.exported_len(),
        })?;

        let total = classified.exported_len() + composites.len();
        for (done, (term, category)) in exported_terms(classified).enumerate() {
            band.checkpoint(done, total)?;
            let mut exported = self.describe(term, category, resolver, tally);
            exported.assertions = properties.get(term).cloned().unwrap_or_default();
            match category {
                Category::Class => sink.class(&exported)?,
                Category::Relation => sink.relation(&exported)?,
                Category::Individual => sink.individual(&exported)?,
                Category::Unclassified => {}
            }
        }
        let offset = classified.exported_len();
        for (done, derived) in composites.iter().enumerate() {
            band.checkpoint(offset + done, total)?;
            sink.composite(derived)?;
        }
        sink.finish()?;
        Ok(())
    }

    /// Comment and hierarchy edges of one classified term, resolved to the
    /// export set.
    fn describe(
        &self,
        term: &Term,
        category: Category,
        resolver: &TermResolver<'_, K>,
        tally: &mut Tally,
    ) -> ExportedTerm {
        let mut exported = ExportedTerm::new(term.clone(), category);
        exported.comment = match self.kb.comment(term) {
            Ok(comment) => comment
                .map(|c| sanitize_comment(&c))
                .filter(|c| !c.is_empty()),
            Err(e) => {
                self.query_failed("comment", term, &e, tally);
                None
            }
        };

        match category {
            Category::Class => {
                let direct = self.edges("genls", term, self.kb.direct_generalizations(term), tally);
                exported.generalizations =
                    without_self_references(term, resolver.find_allowed_or_generalize(&direct));
                let direct = self.edges("specs", term, self.kb.direct_specializations(term), tally);
                exported.specializations =
                    without_self_references(term, resolver.find_allowed_or_specialize(&direct));
            }
            Category::Relation => {
                let direct = self.edges("genlPreds", term, self.kb.direct_generalizations(term), tally);
                exported.generalizations =
                    without_self_references(term, resolver.find_allowed_or_generalize(&direct));
                exported.domain = self.argument_type(term, 1, resolver, tally);
                exported.range = self.argument_type(term, 2, resolver, tally);
            }
            Category::Individual => {
                let types = self.edges("all-isa", term, self.kb.all_instance_of(term), tally);
                exported.types = without_self_references(term, resolver.find_allowed_or_generalize(&types));
            }
            Category::Unclassified => {}
        }
        exported
    }

    /// One exported type for a relation argument position.
    fn argument_type(
        &self,
        relation: &Term,
        position: usize,
        resolver: &TermResolver<'_, K>,
        tally: &mut Tally,
    ) -> Option<Term> {
        let constraints = self.edges(
            "argIsa",
            relation,
            self.kb.argument_type_constraints(relation, position),
            tally,
        );
        let first = constraints.first()?;
        if constraints.len() > 1 {
            tracing::debug!(relation = %relation, position, chosen = %first, "several argument constraints, using the first");
        }
        resolver
            .best_allowed_generalization(first)
            .filter(|t| t != relation)
    }

    fn edges(&self, query: &'static str, term: &Term, result: KbResult<Vec<Term>>, tally: &mut Tally) -> Vec<Term> {
        result.unwrap_or_else(|e| {
            self.query_failed(query, term, &e, tally);
            Vec::new()
        })
    }

    fn query_failed(&self, query: &'static str, term: &Term, error: &KbError, tally: &mut Tally) {
        tally.failed_queries += 1;
        tracing::warn!(query, term = %term, error = %error, "query failed, skipping edge");
    }

    /// Progress bands for classify, gather and serialize, splitting what is
    /// left after resolving by per-term cost.
    fn weighted_bands(&self) -> [(u8, u8); 3] {
        let remaining = u32::from(100 - RESOLVE_END);
        let total = CLASSIFY_WEIGHT + GATHER_WEIGHT + SERIALIZE_WEIGHT;
        // Each share is at most `remaining`, so it fits in u8.
        let classify_end = RESOLVE_END + (remaining * CLASSIFY_WEIGHT / total) as u8;
        let gather_end = classify_end + (remaining * GATHER_WEIGHT / total) as u8;
        [
            (RESOLVE_END, classify_end),
            (classify_end, gather_end),
            (gather_end, 100),
        ]
    }
}

impl<K: KnowledgeBase + ?Sized> fmt::Debug for OntologyExportEngine<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OntologyExportEngine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("progress", &self.progress.percent())
            .field("export_set", &self.output.export_set.len())
            .finish()
    }
}

/// Classes, then relations, then individuals.
fn exported_terms(classified: &ClassifiedTerms) -> impl Iterator<Item = (&Term, Category)> {
    let classes = classified.classes.iter().map(|t| (t, Category::Class));
    let relations = classified.relations.iter().map(|t| (t, Category::Relation));
    let individuals = classified.individuals.iter().map(|t| (t, Category::Individual));
    classes.chain(relations).chain(individuals)
}

fn enter(state: &mut ExportState, next: ExportState) {
    tracing::debug!(from = %state, to = %next, "export state");
    *state = next;
}
