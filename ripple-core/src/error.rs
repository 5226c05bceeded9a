//! Error types.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error returned by fallible derivations.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced when reading a computation.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// The derivation function of a computation failed.
    ///
    /// The computation keeps its last good value and stays dirty, so the
    /// next read retries.
    #[error("computation {node} failed to evaluate: {source}")]
    Evaluation {
        node: NodeId,
        #[source]
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },

    /// A computation was read while it was still evaluating.
    #[error("cycle detected: computation {node} read itself while evaluating")]
    Cycle { node: NodeId },
}

impl ReactiveError {
    /// The node that reported the error.
    pub fn node(&self) -> NodeId {
        match self {
            ReactiveError::Evaluation { node, .. } | ReactiveError::Cycle { node } => *node,
        }
    }

    /// Whether this error (or an evaluation error it wraps) is a cycle.
    pub fn is_cycle(&self) -> bool {
        match self {
            ReactiveError::Cycle { .. } => true,
            ReactiveError::Evaluation { source, .. } => source
                .downcast_ref::<ReactiveError>()
                .is_some_and(ReactiveError::is_cycle),
        }
    }
}

/// Errors raised while loading an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown scheduler `{0}` (expected `direct`, `batched` or `atomic`)")]
    UnknownScheduler(String),
}
