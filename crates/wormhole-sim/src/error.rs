//! Error types shared by every build-phase component.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid scenario id, node-count/role mismatch, subnet overlap or
    /// exhaustion. Always fatal before the event loop starts.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A position was requested for an index outside the topology.
    #[error("node index {index} is outside the topology of {count} nodes")]
    OutOfRangeIndex { index: usize, count: usize },
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
