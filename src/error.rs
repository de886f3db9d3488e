use thiserror::Error;

/// Failure taxonomy for the checking framework.
///
/// Only `Resolution` is recoverable per node; the caller decides whether to
/// surface or suppress it. The remaining variants abort the compilation unit
/// being analyzed (`MalformedCfg`, `Internal`) or checker construction
/// (`Lattice`). Rule violations are never errors; they flow through the
/// diagnostic sink.
#[derive(Debug, Error)]
pub(crate) enum CheckError {
    #[error("cannot resolve a type for node {node} in {context}")]
    Resolution { node: u32, context: String },

    #[error("invalid qualifier lattice for hierarchy {hierarchy}: {reason}")]
    Lattice {
        hierarchy: &'static str,
        reason: String,
    },

    #[error("malformed control-flow graph in {method}: {reason}")]
    MalformedCfg { method: String, reason: String },

    #[error("internal invariant violated in {context}: {reason}")]
    Internal { context: String, reason: String },
}

impl CheckError {
    pub(crate) fn internal(context: impl Into<String>, reason: impl Into<String>) -> Self {
        CheckError::Internal {
            context: context.into(),
            reason: reason.into(),
        }
    }
}
