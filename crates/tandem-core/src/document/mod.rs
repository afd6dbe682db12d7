//! Replicated document capability.
//!
//! The engine never looks inside a document's state. It only needs four
//! capabilities: turn a local edit into a frame, merge a remote frame, encode
//! the full state, and merge a full state. Any implementation whose merge is
//! commutative and idempotent can be plugged into the sync provider.

mod lww;
mod yrs_text;

pub use lww::LwwDocument;
pub use yrs_text::YrsDocument;

use crate::types::UpdateFrame;
use std::ops::Range;
use thiserror::Error;

/// Errors raised by a replicated document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// The bytes could not be decoded as a frame or state
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// The decoded payload could not be merged
    #[error("Failed to apply update: {0}")]
    Apply(String),

    /// A local edit addressed text outside the document
    #[error("Invalid range {start}..{end} for document of length {len}")]
    InvalidRange { start: u32, end: u32, len: u32 },

    /// Encoding the state failed
    #[error("Encoding error: {0}")]
    Encode(String),
}

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// A local edit coming from the editor binding: replace `range` with `content`.
///
/// Offsets are UTF-8 byte offsets into the document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<u32>,
    pub content: String,
}

impl TextEdit {
    pub fn insert(at: u32, content: impl Into<String>) -> Self {
        Self {
            range: at..at,
            content: content.into(),
        }
    }

    pub fn delete(range: Range<u32>) -> Self {
        Self {
            range,
            content: String::new(),
        }
    }

    pub fn replace(range: Range<u32>, content: impl Into<String>) -> Self {
        Self {
            range,
            content: content.into(),
        }
    }

    pub(crate) fn check_bounds(&self, len: u32) -> DocumentResult<()> {
        if self.range.start > self.range.end || self.range.end > len {
            return Err(DocumentError::InvalidRange {
                start: self.range.start,
                end: self.range.end,
                len,
            });
        }
        Ok(())
    }
}

/// Capability interface over a conflict-free replicated document.
///
/// Implementations must guarantee that `apply_remote_frame` and `merge` are
/// commutative and idempotent: replicas that have seen the same set of frames,
/// in any order and with duplicates, encode to the same state.
pub trait ReplicatedDocument: Send + 'static {
    /// Short name of the implementation, used in logs.
    fn kind(&self) -> &'static str;

    /// Apply an edit made on this replica and return the frame describing it.
    fn apply_local_change(&mut self, edit: &TextEdit) -> DocumentResult<UpdateFrame>;

    /// Merge a frame produced by another replica.
    fn apply_remote_frame(&mut self, frame: &UpdateFrame) -> DocumentResult<()>;

    /// Encode the full current state.
    fn serialize(&self) -> DocumentResult<Vec<u8>>;

    /// Merge a full encoded state (durable record, cache entry, peer state).
    fn merge(&mut self, state: &[u8]) -> DocumentResult<()>;

    /// Current rendered text.
    fn content(&self) -> String;

    /// Replace the current content with the content encoded in `state`,
    /// as a new local change. History is never rewritten.
    fn restore_from(&mut self, state: &[u8]) -> DocumentResult<UpdateFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_edit_bounds() {
        assert!(TextEdit::insert(3, "x").check_bounds(3).is_ok());
        assert!(TextEdit::insert(4, "x").check_bounds(3).is_err());
        assert!(TextEdit::delete(0..3).check_bounds(3).is_ok());

        #[allow(clippy::reversed_empty_ranges)]
        let backwards = TextEdit::delete(2..1);
        assert_eq!(
            backwards.check_bounds(3),
            Err(DocumentError::InvalidRange {
                start: 2,
                end: 1,
                len: 3
            })
        );
    }
}
