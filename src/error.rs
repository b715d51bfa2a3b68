//! Error kinds raised while loading or saving a save file.
//!
//! Library functions return [anyhow::Result]; the failures below are carried inside the
//! [anyhow::Error] so callers can classify them with `err.downcast_ref::<SaveError>()`.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    /// The container itself is damaged: bad magic, dangling ids, size mismatches.
    #[error("Structural corruption: {reason}")]
    StructuralCorruption { reason: String },

    /// A node codec did not find the layout it expects.
    #[error("Codec mismatch in node [{id}] {name}: {reason}")]
    CodecMismatch {
        id: i32,
        name: String,
        reason: String,
    },

    /// A node could not be written back.
    #[error("Failed to encode node [{id}] {name}: {reason}")]
    Encode {
        id: i32,
        name: String,
        reason: String,
    },
}

impl SaveError {
    pub fn corruption<S: Into<String>>(reason: S) -> Self {
        SaveError::StructuralCorruption {
            reason: reason.into(),
        }
    }

    pub fn codec_mismatch<N: Into<String>, S: Into<String>>(id: i32, name: N, reason: S) -> Self {
        SaveError::CodecMismatch {
            id,
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn encode<N: Into<String>, S: Into<String>>(id: i32, name: N, reason: S) -> Self {
        SaveError::Encode {
            id,
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, SaveError::StructuralCorruption { .. })
    }
}

/// Find the [SaveError] carried by an error chain, if any.
pub fn save_error(err: &anyhow::Error) -> Option<&SaveError> {
    err.chain().find_map(|e| e.downcast_ref::<SaveError>())
}
