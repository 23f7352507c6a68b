use shared::domain::ThreadId;
use thiserror::Error;

use crate::realtime::DropReason;

/// Failure of a single engine operation. None of these are fatal; each one
/// degrades the operation that raised it.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{operation} failed: {source}")]
    Network {
        operation: &'static str,
        source: anyhow::Error,
    },
    #[error("push event ignored: {0:?}")]
    AmbiguousEvent(DropReason),
    #[error("{0} already in progress")]
    GuardRejected(&'static str),
    #[error("audio input unavailable: {0}")]
    AudioUnavailable(#[source] anyhow::Error),
    #[error("no thread is selected")]
    NoThreadSelected,
    #[error("thread {actual} is not the selected thread {expected}")]
    ThreadMismatch { expected: ThreadId, actual: ThreadId },
    #[error("message has no content")]
    EmptyMessage,
    #[error("no recording is active")]
    NotRecording,
    #[error("the selected thread changed before the operation completed")]
    SelectionChanged,
}

impl SyncError {
    pub(crate) fn network(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Network { operation, source }
    }

    /// Expected, frequent, and not actionable by the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::AmbiguousEvent(_) | Self::GuardRejected(_))
    }
}
