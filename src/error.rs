//! Failure taxonomy surfaced by `start`.
//!
//! The retry coordinator dispatches on these variants; suppressed duplicates
//! must never be mistaken for genuine failures, so they get their own
//! variants instead of being folded into an opaque error string.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// A non-expired transfer already owns the destination.
    #[error("duplicate download for {}", path.display())]
    Duplicate { path: PathBuf },

    /// A timer is already armed for the destination.
    #[error("download already scheduled for {} ({remaining_secs}s remaining)", path.display())]
    DuplicateScheduled { path: PathBuf, remaining_secs: u64 },

    /// A delayed request was refused because an active transfer is present.
    #[error("scheduled download refused, transfer in flight for {}", path.display())]
    DuplicateInFlight { path: PathBuf },

    /// A stale in-flight record was evicted instead of being serviced.
    #[error("evicted stale transfer for {}", path.display())]
    Abandoned { path: PathBuf },

    /// The fetcher answered with a non-2xx status.
    #[error("server responded with status {status}")]
    HttpStatus { status: u16 },

    /// The fetcher or its body stream failed mid-transfer.
    #[error("transport failure: {0}")]
    Transport(anyhow::Error),

    /// Shutdown invalidated a pending or running attempt.
    #[error("download cancelled")]
    Cancelled,

    /// Local filesystem failure while preparing or writing the destination.
    #[error("file i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// True for every variant meaning "the attempt was inhibited, not failed".
    /// The retry coordinator does not count these against the retry limit.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Self::Duplicate { .. } | Self::DuplicateScheduled { .. } | Self::DuplicateInFlight { .. }
        )
    }
}
