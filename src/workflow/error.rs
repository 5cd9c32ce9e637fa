//! Planning Errors
//!
//! Every failure raised while building or emitting a workflow graph.
//! All of them abort the planning run: a partially correct graph is
//! never written out.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by graph construction, validation and emission.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Two distinct producers claim the same artifact identity.
    #[error("Artifact '{lfn}' is already produced by '{existing}', cannot also be produced by '{claimed}'")]
    DuplicateArtifact {
        lfn: String,
        existing: String,
        claimed: String,
    },

    /// A node consumes an artifact that nothing produces and that is not a seed.
    #[error("Node '{node}' consumes '{lfn}' which has no registered producer and is not a seed file")]
    UnknownProducer { node: String, lfn: String },

    /// A seed file could not be retrieved.
    #[error("Could not resolve '{source_url}' after {attempts} attempt(s): {reason}")]
    UnresolvedArtifact {
        source_url: String,
        attempts: u32,
        reason: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Workflow contains a dependency cycle through: {}", .nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    /// Emission found an input without a catalog entry.
    #[error("Node '{node}' consumes '{lfn}' but no physical location is known for it")]
    UnresolvedDependency { node: String, lfn: String },

    /// A sub-workflow output is consumed outside the sub-workflow without being staged out.
    #[error("'{consumer}' consumes '{lfn}' from sub-workflow '{producer}', which does not stage it out")]
    UnstagedBoundaryOutput {
        lfn: String,
        producer: String,
        consumer: String,
    },

    /// A persistent artifact would stay inside a sub-workflow's private area.
    #[error("Persistent artifact '{lfn}' produced by sub-workflow '{producer}' is not staged out")]
    PersistentNotStaged { lfn: String, producer: String },

    /// A graph layout that cannot be planned correctly.
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// The graph has already been emitted.
    #[error("Workflow '{0}' has already been finalized")]
    AlreadyFinalized(String),

    #[error("Unknown node: '{0}'")]
    UnknownNode(String),

    #[error("Node '{0}' already exists")]
    DuplicateNode(String),

    /// A workflow definition or catalog file is malformed.
    #[error("Invalid definition: {0}")]
    Definition(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize workflow: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

impl PlanError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the planner.
pub type Result<T> = std::result::Result<T, PlanError>;
