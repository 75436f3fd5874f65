// error.rs - Error kinds shared across the crate

use thiserror::Error;

/// All failure modes of the extension engine. Each variant maps to a stable
/// kind string printed on stderr by the CLI, so that scripts can match on it.
///
/// Two further kinds are flow control rather than failures and never reach
/// this enum: `MatchUnderflow` (the matcher returns a degenerate match and
/// logs a warning) and `GroupRejected` (the attachment stage skips the group
/// and logs the reason at debug).
#[derive(Debug, Error)]
pub enum ArgrowError {
    /// A requested strain is absent from the alignment store. Aborts the
    /// current strain only.
    #[error("AlignmentNotFound: no alignment stored for strain '{strain}'")]
    AlignmentNotFound { strain: String },

    /// A stored alignment failed its integrity check or has the wrong length.
    #[error("AlignmentCorrupt: alignment for strain '{strain}': {reason}")]
    AlignmentCorrupt { strain: String, reason: String },

    /// An append to the alignment store collided with a different blob for
    /// the same strain.
    #[error("StrainConflict: strain '{strain}' already stored with different bytes")]
    StrainConflict { strain: String },

    /// A post-commit check found the ARG tables in an inconsistent state.
    #[error("ArgInvariantViolation: {0}")]
    ArgInvariantViolation(String),

    /// Any I/O or serialization failure in the on-disk stores. Fatal for the
    /// current day; the base ARG on disk is never touched.
    #[error("StoreIoError: {0}")]
    StoreIo(String),

    /// Invalid CLI or configuration input, rejected before any mutation.
    #[error("ConfigError: {0}")]
    Config(String),
}

impl ArgrowError {
    /// The stable kind string, independent of the message details.
    pub fn kind(&self) -> &'static str {
        match self {
            ArgrowError::AlignmentNotFound { .. } => "AlignmentNotFound",
            ArgrowError::AlignmentCorrupt { .. } => "AlignmentCorrupt",
            ArgrowError::StrainConflict { .. } => "StrainConflict",
            ArgrowError::ArgInvariantViolation(_) => "ArgInvariantViolation",
            ArgrowError::StoreIo(_) => "StoreIoError",
            ArgrowError::Config(_) => "ConfigError",
        }
    }

    pub fn store_io<E: std::fmt::Display>(err: E) -> Self {
        ArgrowError::StoreIo(err.to_string())
    }
}

impl From<std::io::Error> for ArgrowError {
    fn from(err: std::io::Error) -> Self {
        ArgrowError::StoreIo(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArgrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        let err = ArgrowError::AlignmentNotFound {
            strain: "SRR000001".to_string(),
        };
        assert_eq!(err.kind(), "AlignmentNotFound");
        assert!(err.to_string().starts_with("AlignmentNotFound:"));

        let err = ArgrowError::Config("bad value".to_string());
        assert_eq!(err.kind(), "ConfigError");
        assert_eq!(err.to_string(), "ConfigError: bad value");
    }
}
