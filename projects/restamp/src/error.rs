// Error taxonomy for container parsing, timestamp recovery and repair.
//
// Recoverable variants (duplicate timestamps, unresolved lookups) are only
// ever logged; everything else is returned to the orchestrator, which treats
// it as fatal to the single file or pair being processed.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestampError {
    /// The fixed-size container header could not be read or is unusable.
    #[error("malformed container {path:?}: {reason}")]
    MalformedContainer { path: PathBuf, reason: String },

    /// Two frames share a presentation timestamp; the later one is skipped.
    #[error("duplicate timestamp {pts} (frame #{sequence_index}), keeping the earlier frame")]
    DuplicateTimestamp { pts: u64, sequence_index: usize },

    /// A timestamp has no frame record behind it.
    #[error("no frame record for timestamp {pts}")]
    UnresolvedFrameLookup { pts: u64 },

    #[error("no participant name recognized in {path:?}")]
    NoParticipantIdentified { path: PathBuf },

    #[error("no frames recovered from {path:?}")]
    NoFramesRecovered { path: PathBuf },

    /// A single gap would need more duplicated frames than one hour of video.
    #[error("gap of {gap} frames between {previous} and {next} exceeds limit of {limit} frames")]
    GapTooLarge {
        previous: u64,
        next: u64,
        gap: u64,
        limit: u64,
    },

    #[error("{count} frames do not fit in the container frame-count field")]
    FrameCountOverflow { count: u64 },

    #[error("scoring {degraded:?} against {reference:?} failed: {reason}")]
    ScoringFailed {
        reference: PathBuf,
        degraded: PathBuf,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RestampError>;
