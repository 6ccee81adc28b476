use thiserror::Error;

/// Errors raised by graph construction, compilation, evaluation, and
/// reparameterization. All are raised synchronously at the operation that
/// detects them; nothing is retried internally. Non-finite log-densities
/// are *not* errors — they are sentinel outputs a sampler must handle.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two distinct nodes share a name within one graph.
    #[error("duplicate node name: {0}")]
    DuplicateName(String),

    /// The dependency relation contains a cycle.
    #[error("dependency cycle through node: {0}")]
    CyclicDependency(String),

    /// A node references a dependency that was never added to the builder.
    #[error("incomplete graph: node `{node}` references missing dependency `{missing}`")]
    IncompleteGraph { node: String, missing: String },

    /// A position key (or extraction request) does not name a free parameter.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// The model has been decomposed and can no longer be used.
    #[error("model has been decomposed")]
    InvalidModel,

    /// No bijector can map the node onto an unconstrained space.
    #[error("cannot transform node `{node}`: {reason}")]
    UnsupportedTransform { node: String, reason: String },

    /// The node is owned by a live model and cannot join another builder.
    #[error("node `{0}` is owned by a live model")]
    NodeOwned(String),

    /// A value of the wrong kind (scalar/vector/matrix) reached an operation.
    #[error("expected {expected} value, got {got}")]
    ValueKind {
        expected: &'static str,
        got: &'static str,
    },

    /// A numerical precondition was violated (shape mismatch, invalid
    /// distribution argument, out-of-domain bijector input).
    #[error("numerical error: {0}")]
    Numeric(String),
}
