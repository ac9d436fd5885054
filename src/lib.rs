// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kb-onto-export
//!
//! Exports subsets of a symbolic knowledge base (a term taxonomy with isa,
//! genls and genlPreds) as portable ontology documents.
//!
//! ## Architecture
//!
//! - **Knowledge base** (`kb`): synchronous query trait plus a petgraph-backed
//!   in-memory client loadable from JSON
//! - **Upward closure** (`closure`): filtered ancestors of the selection, to a fixpoint
//! - **Resolution** (`resolver`): unexported neighbours replaced by their most
//!   specific exported substitutes, cycle-safe
//! - **Classification** (`classify`): one tagged category per term
//! - **Assertions** (`gather`): applicable property assertions and derived
//!   composite terms
//! - **Engine** (`engine`): the cancellable pipeline with monotonic progress
//!
//! ## Library usage
//!
//! ```no_run
//! use kb_onto_export::config::{ExportConfig, SelectionMode};
//! use kb_onto_export::engine::OntologyExportEngine;
//! use kb_onto_export::kb::memory::MemoryKb;
//! use kb_onto_export::sink::JsonSink;
//!
//! let mut kb = MemoryKb::new();
//! let dog = kb.constant("Dog");
//! let animal = kb.constant("Animal");
//! kb.add_genls(&dog, &animal);
//!
//! let config = ExportConfig {
//!     selection: SelectionMode::ExplicitTerms { terms: vec!["Dog".into()] },
//!     include_upward_closure: true,
//!     ..Default::default()
//! };
//! let mut engine = OntologyExportEngine::new(&kb, config);
//! let mut sink = JsonSink::new();
//! let report = engine.run(&mut sink).unwrap();
//! println!("{report}");
//! ```

pub mod classify;
pub mod closure;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod gather;
pub mod identifier;
pub mod kb;
pub mod progress;
pub mod resolver;
pub mod sink;
pub mod term;
