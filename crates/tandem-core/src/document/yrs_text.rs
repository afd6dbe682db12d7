use super::{DocumentError, DocumentResult, ReplicatedDocument, TextEdit};
use crate::types::UpdateFrame;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update};

/// Name of the shared text inside the yrs document.
const TEXT_NAME: &str = "content";

/// A shared text document backed by `yrs`.
///
/// Frames and states are yrs v1 updates, so a frame can be merged as a state
/// and vice versa.
pub struct YrsDocument {
    doc: Doc,
}

impl YrsDocument {
    /// Create an empty document with a random client id.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Create an empty document with a fixed client id.
    ///
    /// Client ids break ties between concurrent inserts at the same position,
    /// so tests use fixed ids to get a deterministic interleaving.
    pub fn with_client_id(client_id: u64) -> Self {
        Self {
            doc: Doc::with_client_id(client_id),
        }
    }

    /// Create a document hydrated from an encoded state.
    pub fn from_state(state: &[u8]) -> DocumentResult<Self> {
        let mut document = Self::new();
        document.merge(state)?;
        Ok(document)
    }

    /// Encoded state vector, for diagnostics and convergence checks.
    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    fn apply_bytes(&mut self, bytes: &[u8]) -> DocumentResult<()> {
        let update =
            Update::decode_v1(bytes).map_err(|e| DocumentError::Malformed(e.to_string()))?;

        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))?;
        Ok(())
    }
}

impl Default for YrsDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedDocument for YrsDocument {
    fn kind(&self) -> &'static str {
        "yrs-text"
    }

    fn apply_local_change(&mut self, edit: &TextEdit) -> DocumentResult<UpdateFrame> {
        let text = self.doc.get_or_insert_text(TEXT_NAME);
        let before = self.doc.transact().state_vector();

        {
            let mut txn = self.doc.transact_mut();
            edit.check_bounds(text.len(&txn))?;

            // yrs splits blocks at byte offsets and panics inside a code point.
            let current = text.get_string(&txn);
            let (start, end) = (edit.range.start as usize, edit.range.end as usize);
            if !current.is_char_boundary(start) || !current.is_char_boundary(end) {
                return Err(DocumentError::InvalidRange {
                    start: edit.range.start,
                    end: edit.range.end,
                    len: current.len() as u32,
                });
            }

            let start = edit.range.start;
            let removed = edit.range.end - start;
            if removed > 0 {
                text.remove_range(&mut txn, start, removed);
            }
            if !edit.content.is_empty() {
                text.insert(&mut txn, start, &edit.content);
            }
        }

        // Everything the peer is missing relative to the pre-edit state vector,
        // including the full delete set.
        let delta = self.doc.transact().encode_state_as_update_v1(&before);
        Ok(UpdateFrame::from(delta))
    }

    fn apply_remote_frame(&mut self, frame: &UpdateFrame) -> DocumentResult<()> {
        self.apply_bytes(frame.as_bytes())
    }

    fn serialize(&self) -> DocumentResult<Vec<u8>> {
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&StateVector::default()))
    }

    fn merge(&mut self, state: &[u8]) -> DocumentResult<()> {
        self.apply_bytes(state)
    }

    fn content(&self) -> String {
        let text = self.doc.get_or_insert_text(TEXT_NAME);
        let txn = self.doc.transact();
        text.get_string(&txn)
    }

    fn restore_from(&mut self, state: &[u8]) -> DocumentResult<UpdateFrame> {
        let restored = YrsDocument::from_state(state)?.content();
        let len = {
            let text = self.doc.get_or_insert_text(TEXT_NAME);
            let txn = self.doc.transact();
            text.len(&txn)
        };
        self.apply_local_change(&TextEdit::replace(0..len, restored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_edits_render() {
        let mut doc = YrsDocument::with_client_id(1);
        doc.apply_local_change(&TextEdit::insert(0, "Hello")).unwrap();
        doc.apply_local_change(&TextEdit::insert(5, ", World")).unwrap();
        assert_eq!(doc.content(), "Hello, World");

        doc.apply_local_change(&TextEdit::delete(5..7)).unwrap();
        assert_eq!(doc.content(), "HelloWorld");

        doc.apply_local_change(&TextEdit::replace(0..5, "Howdy"))
            .unwrap();
        assert_eq!(doc.content(), "HowdyWorld");
    }

    #[test]
    fn test_frame_replays_on_peer() {
        let mut a = YrsDocument::with_client_id(1);
        let mut b = YrsDocument::with_client_id(2);

        let f1 = a.apply_local_change(&TextEdit::insert(0, "hello")).unwrap();
        let f2 = a.apply_local_change(&TextEdit::delete(0..1)).unwrap();

        b.apply_remote_frame(&f1).unwrap();
        b.apply_remote_frame(&f2).unwrap();
        assert_eq!(b.content(), "ello");
    }

    #[test]
    fn test_out_of_order_frames_converge() {
        let mut a = YrsDocument::with_client_id(1);
        let f1 = a.apply_local_change(&TextEdit::insert(0, "abc")).unwrap();
        let f2 = a.apply_local_change(&TextEdit::insert(3, "def")).unwrap();

        let mut b = YrsDocument::with_client_id(2);
        b.apply_remote_frame(&f2).unwrap();
        b.apply_remote_frame(&f1).unwrap();

        assert_eq!(b.content(), "abcdef");
        assert_eq!(b.serialize().unwrap(), a.serialize().unwrap());
    }

    #[test]
    fn test_duplicate_frame_is_idempotent() {
        let mut a = YrsDocument::with_client_id(1);
        let frame = a.apply_local_change(&TextEdit::insert(0, "once")).unwrap();

        let mut b = YrsDocument::with_client_id(2);
        b.apply_remote_frame(&frame).unwrap();
        let after_one = b.serialize().unwrap();
        b.apply_remote_frame(&frame).unwrap();

        assert_eq!(b.content(), "once");
        assert_eq!(b.serialize().unwrap(), after_one);
    }

    #[test]
    fn test_concurrent_inserts_keep_both_edits() {
        let mut a = YrsDocument::with_client_id(1);
        let mut b = YrsDocument::with_client_id(2);

        let fa = a.apply_local_change(&TextEdit::insert(0, "hello")).unwrap();
        let fb = b.apply_local_change(&TextEdit::insert(0, "world")).unwrap();

        a.apply_remote_frame(&fb).unwrap();
        b.apply_remote_frame(&fa).unwrap();

        assert_eq!(a.content(), b.content());
        assert!(a.content().contains("hello"));
        assert!(a.content().contains("world"));
        assert_eq!(a.serialize().unwrap(), b.serialize().unwrap());
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let mut doc = YrsDocument::with_client_id(1);
        doc.apply_local_change(&TextEdit::insert(0, "keep me")).unwrap();

        let garbage = UpdateFrame::from(vec![0xFF; 4]);
        let err = doc.apply_remote_frame(&garbage).unwrap_err();
        assert!(matches!(err, DocumentError::Malformed(_)));
        assert_eq!(doc.content(), "keep me");
    }

    #[test]
    fn test_invalid_range_leaves_document_untouched() {
        let mut doc = YrsDocument::with_client_id(1);
        doc.apply_local_change(&TextEdit::insert(0, "abc")).unwrap();

        let err = doc
            .apply_local_change(&TextEdit::delete(1..10))
            .unwrap_err();
        assert!(matches!(err, DocumentError::InvalidRange { len: 3, .. }));
        assert_eq!(doc.content(), "abc");
    }

    #[test]
    fn test_rejects_split_code_point() {
        let mut doc = YrsDocument::with_client_id(1);
        doc.apply_local_change(&TextEdit::insert(0, "é")).unwrap();

        let err = doc.apply_local_change(&TextEdit::insert(1, "x")).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidRange { len: 2, .. }));
        let err = doc.apply_local_change(&TextEdit::delete(0..1)).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidRange { .. }));
        assert_eq!(doc.content(), "é");

        doc.apply_local_change(&TextEdit::insert(2, "!")).unwrap();
        assert_eq!(doc.content(), "é!");
    }

    #[test]
    fn test_merge_full_state() {
        let mut a = YrsDocument::with_client_id(1);
        a.apply_local_change(&TextEdit::insert(0, "persisted")).unwrap();
        let state = a.serialize().unwrap();

        let b = YrsDocument::from_state(&state).unwrap();
        assert_eq!(b.content(), "persisted");
    }

    #[test]
    fn test_restore_is_a_new_local_change() {
        let mut doc = YrsDocument::with_client_id(1);
        doc.apply_local_change(&TextEdit::insert(0, "version one"))
            .unwrap();
        let checkpoint = doc.serialize().unwrap();

        doc.apply_local_change(&TextEdit::replace(0..11, "version two"))
            .unwrap();
        let mut peer = YrsDocument::from_state(&doc.serialize().unwrap()).unwrap();
        assert_eq!(peer.content(), "version two");

        let frame = doc.restore_from(&checkpoint).unwrap();
        assert_eq!(doc.content(), "version one");

        // A peer that only saw "version two" catches up through the restore frame.
        peer.apply_remote_frame(&frame).unwrap();
        assert_eq!(peer.content(), "version one");
    }
}
