//! Rich diagnostic error types for the ontology export engine.
//!
//! Only fatal conditions travel as `Err`: a failed selection query, a configured
//! term that does not resolve at setup, a broken configuration or a serializer
//! failure. Per-term query failures are logged and counted by the component that
//! hit them and never escape its boundary.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for an export run.
#[derive(Debug, Error, Diagnostic)]
pub enum ExportError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Kb(#[from] KbError),

    #[error("term selection failed ({mode}): {source}")]
    #[diagnostic(
        code(onto::export::selection_failed),
        help(
            "The initial selection query did not complete, so there is nothing to export. \
             Check that the knowledge base is reachable and that the selection \
             collections or root term exist."
        )
    )]
    SelectionFailed {
        mode: String,
        #[source]
        source: KbError,
    },

    #[error("{role} term \"{name}\" does not resolve in the knowledge base")]
    #[diagnostic(
        code(onto::export::unresolved_term),
        help(
            "Every marker collection, eligibility collection, root term and applicable \
             relation named in the configuration must exist in the knowledge base. \
             Fix the spelling or remove the entry."
        )
    )]
    UnresolvedTerm { role: &'static str, name: String },

    #[error("invalid export configuration: {message}")]
    #[diagnostic(
        code(onto::export::invalid_config),
        help("Check the export configuration. {message}")
    )]
    InvalidConfig { message: String },

    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(onto::export::io),
        help("Check that the file exists and that its directory is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed knowledge base snapshot: {message}")]
    #[diagnostic(
        code(onto::export::snapshot),
        help(
            "The snapshot must be a JSON document with `constants`, `isa`, `genls`, \
             `genl_preds`, `arity`, `arg_isa`, `comments` and `assertions` sections."
        )
    )]
    Snapshot { message: String },

    #[error("serializer failed: {message}")]
    #[diagnostic(
        code(onto::export::sink),
        help("The output serializer rejected a term. The partial output should be discarded.")
    )]
    Sink { message: String },
}

/// Query failure raised by a knowledge-base client.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum KbError {
    #[error("{query} query failed for {term}: {message}")]
    #[diagnostic(
        code(onto::kb::query_failed),
        help(
            "The knowledge base rejected or could not answer the query. \
             The export skips the affected term and continues."
        )
    )]
    QueryFailed {
        query: &'static str,
        term: String,
        message: String,
    },

    #[error("knowledge base unavailable: {message}")]
    #[diagnostic(
        code(onto::kb::unavailable),
        help("The knowledge-base connection is down. Reconnect and restart the export.")
    )]
    Unavailable { message: String },
}

impl KbError {
    /// Shorthand for a failed query about one term.
    pub fn query_failed(
        query: &'static str,
        term: impl std::fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::QueryFailed {
            query,
            term: term.to_string(),
            message: message.into(),
        }
    }
}

/// Convenience alias for functions returning export results.
pub type ExportResult<T> = std::result::Result<T, ExportError>;

/// Result of a single knowledge-base query.
pub type KbResult<T> = std::result::Result<T, KbError>;
