use stagehand_codec::CodecError;
use stagehand_core::prelude::{PoolError, PortIndex};

use crate::lifecycle::{LifecycleOp, StageState};

/// Errors returned by stage hooks and notifications.
///
/// Starvation and back-pressure are never errors; they end a notification
/// with a [`StopReason`](crate::processor::StopReason) instead.
///
/// # Example
/// ```rust
/// use stagehand::prelude::*;
///
/// let err = StageError::InvalidState {
///     op: LifecycleOp::Transfer,
///     state: StageState::Loaded,
/// };
/// assert_eq!(err.code(), "invalid_state");
/// assert_eq!(err.to_string(), "transfer_and_process is not allowed while loaded");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{op} is not allowed while {state}")]
    InvalidState { op: LifecycleOp, state: StageState },
    #[error("port {0} is not a stage port")]
    UnknownPort(PortIndex),
    #[error("resource allocation failed: {0}")]
    ResourceAllocation(#[source] CodecError),
    #[error("transform failed: {0}")]
    Transform(#[source] CodecError),
    #[error("buffer pool: {0}")]
    Pool(#[from] PoolError),
}

impl StageError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            StageError::InvalidState { .. } => "invalid_state",
            StageError::UnknownPort(_) => "unknown_port",
            StageError::ResourceAllocation(_) => "resource_allocation",
            StageError::Transform(_) => "transform_failed",
            StageError::Pool(_) => "pool",
        }
    }

    /// Whether the caller may reasonably retry the same hook later.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            StageError::ResourceAllocation(CodecError::ResourceUnavailable(_))
                | StageError::Pool(PoolError::Full(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_retry_hints() {
        let busy = StageError::ResourceAllocation(CodecError::ResourceUnavailable("busy".into()));
        assert_eq!(busy.code(), "resource_allocation");
        assert!(busy.retryable());

        let bad = StageError::Transform(CodecError::Codec("corrupt".into()));
        assert_eq!(bad.code(), "transform_failed");
        assert!(!bad.retryable());

        let pool: StageError = PoolError::Full(PortIndex::OUTPUT).into();
        assert_eq!(pool.code(), "pool");
        assert!(pool.retryable());
    }
}
