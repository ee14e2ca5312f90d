// Copyright 2026 the DepFlow authors

//! Error types for DepFlow
//!
//! Every failure mode of graph construction and evaluation is a variant of
//! [`Error`]. All errors are fatal to the current `run`: the driver fires the
//! `error` event, stops recomputing, and rejects with the error. The single
//! deliberate non-error is the `dereference` node's "not found" lookup, which
//! resolves to JSON `null` so downstream nodes can distinguish "looked up,
//! nothing there" from "still waiting".

use thiserror::Error;

/// DepFlow error types
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// Declaration names a node kind the engine does not know
    #[error("unknown node kind '{kind}' for node '{name}'")]
    UnknownNodeKind {
        /// Name of the offending declaration.
        name: String,
        /// The unrecognized `type` value.
        kind: String,
    },

    /// Declaration is missing a field its kind requires
    #[error("node '{name}' ({kind}) is missing required field '{field}'")]
    MissingField {
        /// Name of the offending declaration.
        name: String,
        /// Node kind that mandates the field.
        kind: &'static str,
        /// The absent field.
        field: &'static str,
    },

    /// Declaration field is present but has the wrong shape
    #[error("node '{name}': field '{field}' {reason}")]
    InvalidField {
        /// Name of the offending declaration.
        name: String,
        /// The malformed field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A transform declaration references a function the registry does not have
    #[error("node '{name}' references unknown transform function '{func}'")]
    UnknownTransform {
        /// Name of the transform node.
        name: String,
        /// The unregistered function name.
        func: String,
    },

    /// Two declarations (or a declaration and a synthesized node) share a name
    #[error("duplicate node name '{0}' in graph")]
    DuplicateNodeName(String),

    /// A user declaration uses a name the preprocessor reserves
    #[error("node name '{0}' is reserved (the preprocessor synthesizes it)")]
    ReservedNodeName(String),

    /// A run input collides with a declared node that is not an `echo`
    #[error("input '{0}' collides with a non-echo node of the same name")]
    InputCollision(String),

    /// `run` was called without one or more required top-level inputs
    #[error("run is missing required input(s): {}", .0.join(", "))]
    MissingInputs(Vec<String>),

    /// A subgraph could not resolve a referenced node or pass-through input
    #[error("subgraph '{subgraph}' could not find node or pass-through input for '{reference}'")]
    Resolution {
        /// Name of the subgraph node doing the resolving.
        subgraph: String,
        /// The input reference that failed to resolve.
        reference: String,
    },

    /// A path contains more than one `*` segment
    #[error("path '{0}' contains more than one wildcard segment")]
    MultipleWildcards(String),

    /// A wildcard was applied to a value that is not an array
    #[error("wildcard in path '{0}' selects a non-array value")]
    WildcardOnNonArray(String),

    /// `set_at_path` tried to descend through a missing intermediate
    #[error("cannot set path '{path}': missing intermediate segment '{segment}'")]
    MissingIntermediate {
        /// Full path being written.
        path: String,
        /// The segment that did not exist.
        segment: String,
    },

    /// A transform function rejected its arguments or produced a non-finite number
    #[error("transform '{func}' failed: {reason}")]
    Transform {
        /// Registry name of the function.
        func: String,
        /// Why it failed.
        reason: String,
    },

    /// A `dereference` node references a node that does not exist
    #[error("node '{0}' not found in graph")]
    NodeNotFound(String),

    /// A `map`-mode subgraph's collection input is not an array
    #[error("subgraph '{node}' in map mode requires an array collection, got {got}")]
    CollectionNotArray {
        /// Name of the subgraph node.
        node: String,
        /// A short description of the actual value.
        got: String,
    },

    /// A deferred input (or async node) completed with a failure
    #[error("deferred value for '{name}' failed: {reason}")]
    DeferredFailed {
        /// Input key or node name the deferred was bound to.
        name: String,
        /// Failure message carried by the deferred.
        reason: String,
    },

    /// The run exceeded the configured timeout without settling
    #[error("run did not settle within {0:?}")]
    SyncRunTimeout(std::time::Duration),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using DepFlow's [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
