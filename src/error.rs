//! Error types shared across the crate.

use thiserror::Error;

/// Errors produced while configuring, loading data into, or running a sampler.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid run configuration, reported before any sampling starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid or inconsistent training / prediction data, reported at load.
    #[error("data error: {0}")]
    Data(String),

    /// Neither grow nor prune is possible for a tree. This indicates a
    /// degenerate configuration (too few observations for the requested
    /// minimum leaf size) and halts the run.
    #[error("tree {tree}: neither grow nor prune is possible")]
    NothingToDo {
        /// Index of the offending tree within the ensemble.
        tree: usize,
    },

    /// Corrupted sufficient statistics (e.g. a non-positive posterior
    /// variance). Fatal.
    #[error("numerical error: {context}")]
    Numerical {
        /// Where the computation failed and why.
        context: String,
    },

    /// A structural invariant was violated (partition desync, invalid node
    /// access). Fatal, with a diagnostic naming the tree and node.
    #[error("invariant violation in tree {tree} at node {node}: {message}")]
    Invariant {
        /// Index of the offending tree within the ensemble.
        tree: usize,
        /// Id of the offending node.
        node: usize,
        /// Description of the violated invariant.
        message: String,
    },

    /// I/O failure while persisting a draw.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure while persisting a draw.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
