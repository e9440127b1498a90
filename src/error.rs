//! Error taxonomy for the extraction pipeline.
//!
//! Components return these through `anyhow::Result`; the orchestrator
//! downcasts to decide between retrying an iteration and ending the run.

use thiserror::Error;

/// Pipeline error classification.
///
/// Only `EngineUnavailable` and `InvalidConfig` terminate a run outright.
/// Everything already extracted is saved even when a run terminates early.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No window matched the configured title keywords.
    #[error("WeChat window not found ({0})")]
    WindowNotFound(String),

    /// The chat area could not be read (minimized, occluded, no display).
    #[error("screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The recognition engine failed to initialize. Fatal.
    #[error("recognition engine unavailable: {0}")]
    EngineUnavailable(String),

    /// An iteration produced no usable text. Retried before counting as a miss.
    #[error("recognition produced no usable text")]
    EmptyResult,

    /// Scrolling made no progress and window re-acquisition was exhausted.
    #[error("scroll stalled after {0} re-acquisition attempts")]
    Stalled(u32),

    /// The persisted dedup index could not be read. Treated as empty.
    #[error("dedup index unreadable: {0}")]
    IndexCorrupt(String),

    /// Configuration failed validation before the run started. Fatal.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Whether the retry wrapper should attempt the operation again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExtractError::WindowNotFound(_)
                | ExtractError::CaptureUnavailable(_)
                | ExtractError::EmptyResult
                | ExtractError::IndexCorrupt(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ExtractError::WindowNotFound("微信".into()).is_recoverable());
        assert!(ExtractError::CaptureUnavailable("minimized".into()).is_recoverable());
        assert!(ExtractError::EmptyResult.is_recoverable());
        assert!(ExtractError::IndexCorrupt("bad json".into()).is_recoverable());

        assert!(!ExtractError::EngineUnavailable("no tesseract".into()).is_recoverable());
        assert!(!ExtractError::Stalled(3).is_recoverable());
        assert!(!ExtractError::InvalidConfig("scroll_speed".into()).is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = ExtractError::Stalled(3);
        assert_eq!(
            err.to_string(),
            "scroll stalled after 3 re-acquisition attempts"
        );
        let err = ExtractError::EmptyResult;
        assert!(err.to_string().contains("no usable text"));
    }
}
