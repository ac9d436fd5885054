//! Export configuration.
//!
//! Loaded from TOML. Terms are named by their display name and resolved against
//! the knowledge base when a run starts; a name that does not resolve is fatal.
//!
//! ```toml
//! kb_subset_collections = ["PublicConstant"]
//! include_upward_closure = true
//! upward_closure_eligibility_collections = ["PublicConstant"]
//! applicable_relations = ["hasColor"]
//!
//! [selection]
//! mode = "below-root-term"
//! root = "Animal"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, ExportResult};

/// How the selection set is populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SelectionMode {
    /// All instances of the KB-subset marker collections.
    #[default]
    KbSubset,
    /// Like `KbSubset`, always followed by the upward closure.
    KbSubsetPlusUpwardClosure,
    /// The root and everything below it, filtered by the subset collections.
    BelowRootTerm { root: String },
    /// A caller-supplied list of terms.
    ExplicitTerms { terms: Vec<String> },
    /// Every relation and argument appearing in the given assertions.
    SelectedAssertions { assertions: Vec<AssertionRef> },
    /// Every term in the knowledge base.
    EntireKb,
}

impl SelectionMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::KbSubset => "kb-subset",
            Self::KbSubsetPlusUpwardClosure => "kb-subset-plus-upward-closure",
            Self::BelowRootTerm { .. } => "below-root-term",
            Self::ExplicitTerms { .. } => "explicit-terms",
            Self::SelectedAssertions { .. } => "selected-assertions",
            Self::EntireKb => "entire-kb",
        }
    }
}

/// An assertion named by its relation and argument display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionRef {
    pub relation: String,
    pub args: Vec<String>,
}

/// Which relations the classifier files into the relation bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationPolicy {
    /// Binary relations only; the output format cannot express the rest.
    #[default]
    BinaryOnly,
    /// Relations of every arity.
    Research,
}

/// Configuration for one export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub selection: SelectionMode,
    /// Marker collections defining the KB subset.
    pub kb_subset_collections: Vec<String>,
    pub include_upward_closure: bool,
    pub include_non_atomic_terms: bool,
    /// Closure candidates must be quoted instances of one of these (empty = all).
    pub upward_closure_eligibility_collections: Vec<String>,
    /// Relations whose assertions are gathered as properties.
    pub applicable_relations: Vec<String>,
    pub omit_uncommented_terms: bool,
    pub relation_policy: RelationPolicy,
    /// Relations handled as hierarchy edges, never as properties.
    pub structural_relations: Vec<String>,
    /// Functions whose non-atomic terms denote collection intersections.
    pub intersection_functions: Vec<String>,
    /// Functions `(Fn Coll Rel Type)` denoting "Coll with Rel to some Type".
    pub relation_to_type_functions: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            selection: SelectionMode::default(),
            kb_subset_collections: Vec::new(),
            include_upward_closure: false,
            include_non_atomic_terms: false,
            upward_closure_eligibility_collections: Vec::new(),
            applicable_relations: Vec::new(),
            omit_uncommented_terms: false,
            relation_policy: RelationPolicy::default(),
            structural_relations: vec!["isa".into(), "genls".into(), "genlPreds".into()],
            intersection_functions: vec![
                "CollectionIntersection2Fn".into(),
                "CollectionIntersectionFn".into(),
            ],
            relation_to_type_functions: vec!["SubcollectionOfWithRelationToTypeFn".into()],
        }
    }
}

impl ExportConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> ExportResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ExportError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> ExportResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ExportError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Whether the upward closure stage runs.
    pub fn upward_closure_enabled(&self) -> bool {
        self.include_upward_closure
            || matches!(self.selection, SelectionMode::KbSubsetPlusUpwardClosure)
    }

    /// Reject configurations that cannot produce a run.
    pub fn validate(&self) -> ExportResult<()> {
        match &self.selection {
            SelectionMode::KbSubset | SelectionMode::KbSubsetPlusUpwardClosure
                if self.kb_subset_collections.is_empty() =>
            {
                return Err(ExportError::InvalidConfig {
                    message: format!(
                        "selection mode {} needs at least one entry in kb_subset_collections",
                        self.selection.name()
                    ),
                });
            }
            SelectionMode::BelowRootTerm { root } if root.trim().is_empty() => {
                return Err(ExportError::InvalidConfig {
                    message: "below-root-term selection needs a non-empty root".into(),
                });
            }
            SelectionMode::SelectedAssertions { assertions } => {
                if let Some(bad) = assertions.iter().find(|a| a.relation.trim().is_empty()) {
                    return Err(ExportError::InvalidConfig {
                        message: format!("selected assertion with args {:?} has no relation", bad.args),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}
