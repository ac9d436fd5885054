//! Serializer interface and the JSON document sink.
//!
//! The engine hands the sink fully resolved terms: classes first, then
//! relations, then individuals, then the derived composites they reference.
//! [`JsonSink`] renders them into a label-resolved [`OntologyDocument`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::Category;
use crate::error::{ExportError, ExportResult};
use crate::gather::{Construct, DerivedTerm, PropertyAssertion, PropertyValue};
use crate::identifier::{external_id, label, paraphrase};
use crate::term::{Literal, Term};

/// Run-level information passed to [`OntologySink::begin`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportHeader {
    /// Selection mode name, e.g. `kb-subset`.
    pub selection_mode: String,
    /// Number of terms in the export set.
    pub term_count: usize,
}

/// A classified term with everything the serializer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedTerm {
    pub term: Term,
    pub category: Category,
    pub external_id: String,
    pub label: String,
    /// Sanitized comment text.
    pub comment: Option<String>,
    /// Superclasses or super-relations, all in the export set.
    pub generalizations: Vec<Term>,
    /// Subclasses, all in the export set.
    pub specializations: Vec<Term>,
    /// Classes an individual belongs to.
    pub types: Vec<Term>,
    /// Relation argument-1 type.
    pub domain: Option<Term>,
    /// Relation argument-2 type.
    pub range: Option<Term>,
    pub assertions: Vec<PropertyAssertion>,
}

impl ExportedTerm {
    /// A bare entry with identifier and label derived from the term.
    pub fn new(term: Term, category: Category) -> Self {
        Self {
            external_id: external_id(&term),
            label: label(&term),
            term,
            category,
            comment: None,
            generalizations: Vec::new(),
            specializations: Vec::new(),
            types: Vec::new(),
            domain: None,
            range: None,
            assertions: Vec::new(),
        }
    }
}

/// Receives the export in emission order.
pub trait OntologySink {
    fn begin(&mut self, header: &ExportHeader) -> ExportResult<()>;
    fn class(&mut self, term: &ExportedTerm) -> ExportResult<()>;
    fn relation(&mut self, term: &ExportedTerm) -> ExportResult<()>;
    fn individual(&mut self, term: &ExportedTerm) -> ExportResult<()>;
    fn composite(&mut self, derived: &DerivedTerm) -> ExportResult<()>;
    fn finish(&mut self) -> ExportResult<()>;
}

// ---------------------------------------------------------------------------
// JSON document
// ---------------------------------------------------------------------------

/// Reference to another term by identifier and label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRef {
    /// External identifier.
    pub id: String,
    /// Human-readable label.
    pub label: String,
}

impl From<&Term> for TermRef {
    fn from(term: &Term) -> Self {
        Self {
            id: external_id(term),
            label: label(term),
        }
    }
}

/// Exported property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueExport {
    Term(TermRef),
    Literal {
        /// Lexical form.
        value: String,
        /// Datatype class, when the relation constrains it.
        datatype: Option<TermRef>,
    },
}

/// Exported property assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyExport {
    pub relation: TermRef,
    pub value: ValueExport,
}

impl From<&PropertyAssertion> for PropertyExport {
    fn from(assertion: &PropertyAssertion) -> Self {
        let value = match &assertion.value {
            PropertyValue::Term(t) => ValueExport::Term(t.into()),
            PropertyValue::Literal { literal, datatype } => ValueExport::Literal {
                value: match literal {
                    Literal::String(s) => s.clone(),
                    other => other.to_string(),
                },
                datatype: datatype.as_ref().map(TermRef::from),
            },
        };
        Self {
            relation: (&assertion.relation).into(),
            value,
        }
    }
}

/// Exported class, relation or individual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermExport {
    /// External identifier.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub generalizations: Vec<TermRef>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub specializations: Vec<TermRef>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub types: Vec<TermRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<TermRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<TermRef>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub properties: Vec<PropertyExport>,
}

impl From<&ExportedTerm> for TermExport {
    fn from(term: &ExportedTerm) -> Self {
        Self {
            id: term.external_id.clone(),
            label: term.label.clone(),
            comment: term.comment.clone(),
            generalizations: refs(&term.generalizations),
            specializations: refs(&term.specializations),
            types: refs(&term.types),
            domain: term.domain.as_ref().map(TermRef::from),
            range: term.range.as_ref().map(TermRef::from),
            properties: term.assertions.iter().map(PropertyExport::from).collect(),
        }
    }
}

fn refs(terms: &[Term]) -> Vec<TermRef> {
    terms.iter().map(TermRef::from).collect()
}

/// Exported derived composite term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeExport {
    /// External identifier (`anon-<id>`).
    pub id: String,
    /// Paraphrase of the non-atomic source term.
    pub source: String,
    /// Construct kind: intersection, restriction or paraphrase.
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub members: Vec<TermRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_relation: Option<TermRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub some_values_from: Option<TermRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&DerivedTerm> for CompositeExport {
    fn from(derived: &DerivedTerm) -> Self {
        let mut export = Self {
            id: external_id(&derived.term),
            source: paraphrase(&derived.source),
            kind: String::new(),
            members: Vec::new(),
            on_relation: None,
            some_values_from: None,
            name: None,
        };
        match &derived.construct {
            Construct::Intersection(members) => {
                export.kind = "intersection".into();
                export.members = members.iter().map(TermRef::from).collect();
            }
            Construct::Restriction { relation, filler } => {
                export.kind = "restriction".into();
                export.on_relation = Some(relation.into());
                export.some_values_from = Some(filler.into());
            }
            Construct::Paraphrase(name) => {
                export.kind = "paraphrase".into();
                export.name = Some(name.clone());
            }
        }
        export
    }
}

/// The whole export as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyDocument {
    pub header: Option<ExportHeader>,
    pub classes: Vec<TermExport>,
    pub relations: Vec<TermExport>,
    pub individuals: Vec<TermExport>,
    pub composites: Vec<CompositeExport>,
}

impl OntologyDocument {
    /// Pretty-printed JSON.
    pub fn to_json_string(&self) -> ExportResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ExportError::Sink {
            message: e.to_string(),
        })
    }

    /// Write pretty-printed JSON to `path`.
    pub fn write_to(&self, path: &Path) -> ExportResult<()> {
        let json = self.to_json_string()?;
        std::fs::write(path, json).map_err(|source| ExportError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Sink collecting an [`OntologyDocument`] in memory.
#[derive(Debug, Default)]
pub struct JsonSink {
    document: OntologyDocument,
    finished: bool,
}

impl JsonSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &OntologyDocument {
        &self.document
    }

    pub fn into_document(self) -> OntologyDocument {
        self.document
    }

    /// Whether [`OntologySink::finish`] was called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn check_open(&self) -> ExportResult<()> {
        if self.finished {
            return Err(ExportError::Sink {
                message: "document already finished".into(),
            });
        }
        Ok(())
    }
}

impl OntologySink for JsonSink {
    fn begin(&mut self, header: &ExportHeader) -> ExportResult<()> {
        self.document = OntologyDocument {
            header: Some(header.clone()),
            ..Default::default()
        };
        self.finished = false;
        Ok(())
    }

    fn class(&mut self, term: &ExportedTerm) -> ExportResult<()> {
        self.check_open()?;
        self.document.classes.push(term.into());
        Ok(())
    }

    fn relation(&mut self, term: &ExportedTerm) -> ExportResult<()> {
        self.check_open()?;
        self.document.relations.push(term.into());
        Ok(())
    }

    fn individual(&mut self, term: &ExportedTerm) -> ExportResult<()> {
        self.check_open()?;
        self.document.individuals.push(term.into());
        Ok(())
    }

    fn composite(&mut self, derived: &DerivedTerm) -> ExportResult<()> {
        self.check_open()?;
        self.document.composites.push(derived.into());
        Ok(())
    }

    fn finish(&mut self) -> ExportResult<()> {
        self.finished = true;
        Ok(())
    }
}
