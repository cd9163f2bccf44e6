//! Error taxonomy shared by every core component (§7).

use thiserror::Error;

/// Errors surfaced by the document model and concurrency core.
///
/// Propagation policy (§7): [`CoreError::InvalidPosition`] and
/// [`CoreError::DecodeError`] are reported to the offending caller only.
/// [`CoreError::UnknownBaseVersion`] and [`CoreError::VersionConflict`] are
/// translated into a `sync_required` reply rather than an error frame.
/// [`CoreError::StorageUnavailable`] aborts the in-flight merge without a
/// version bump or broadcast. See [`CoreError::is_fatal`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// A positional operation referenced a location outside `[0, length]`.
    #[error("position {position} is out of bounds for document of length {length}")]
    InvalidPosition { position: usize, length: usize },

    /// `source_version` does not exist in the version log (retention-expired
    /// or never existed).
    #[error("base version {version} is unknown to the version log")]
    UnknownBaseVersion { version: i64 },

    /// The merge transformed the client's operation onto a position outside
    /// the current document's bounds.
    #[error("merge produced an out-of-range operation against version {current_version}")]
    VersionConflict { current_version: i64 },

    /// An inbound message could not be decoded.
    #[error("malformed inbound message: {reason}")]
    DecodeError { reason: String },

    /// The backing store refused a read or write.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },
}

impl CoreError {
    /// Errors that leave the in-memory snapshot inconsistent with the
    /// persisted store are fatal for the coordinator that observed them; it
    /// must terminate rather than keep serving stale state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::StorageUnavailable { .. })
    }

    /// Whether this error should be translated into a `sync_required` reply
    /// instead of a generic error frame.
    pub fn requires_sync(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownBaseVersion { .. } | CoreError::VersionConflict { .. }
        )
    }
}

/// Error returned by a [`crate::session::Channel`] implementation when
/// delivery to a subscriber fails (e.g. the subscriber disconnected).
#[derive(Debug, Error)]
#[error("channel send failed: {0}")]
pub struct ChannelError(pub String);
