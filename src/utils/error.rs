//! Error Handling Module
//!
//! Defines custom error types for the self-labelling training library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for self-labelling training operations
#[derive(Error, Debug)]
pub enum SelfLabelError {
    /// Popping a reassignment schedule that only holds the sentinel.
    ///
    /// Signals a misconfigured event count or an adversarially small
    /// schedule; callers must check `is_due` first and never recover from
    /// this mid-run.
    #[error("reassignment schedule exhausted: only the sentinel threshold remains")]
    EmptySchedule,

    /// A checkpointed label matrix does not match the configured shape.
    #[error(
        "label matrix shape mismatch: checkpoint holds {found_heads} head(s) x {found_examples} example(s) \
         with {found_clusters} cluster(s), configuration expects {want_heads} x {want_examples} with {want_clusters}"
    )]
    LabelShapeMismatch {
        found_heads: usize,
        found_examples: usize,
        found_clusters: usize,
        want_heads: usize,
        want_examples: usize,
        want_clusters: usize,
    },

    /// Error produced by the optimal-transport solver; always fatal since a
    /// partial assignment would violate per-head completeness.
    #[error("assignment solver error: {0}")]
    Solver(String),

    /// Error with dataset operations
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Error while saving or restoring training state
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Error loading or processing an image
    #[error("failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience Result type for self-labelling training operations
pub type Result<T> = std::result::Result<T, SelfLabelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SelfLabelError::Dataset("empty directory".to_string());
        assert_eq!(format!("{}", err), "dataset error: empty directory");
    }

    #[test]
    fn test_shape_mismatch_mentions_both_shapes() {
        let err = SelfLabelError::LabelShapeMismatch {
            found_heads: 2,
            found_examples: 100,
            found_clusters: 10,
            want_heads: 3,
            want_examples: 100,
            want_clusters: 10,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("2 head(s)"));
        assert!(msg.contains("expects 3"));
    }

    #[test]
    fn test_empty_schedule_display() {
        let msg = format!("{}", SelfLabelError::EmptySchedule);
        assert!(msg.contains("sentinel"));
    }
}
