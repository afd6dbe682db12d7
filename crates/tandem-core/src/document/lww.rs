use super::{DocumentError, DocumentResult, ReplicatedDocument, TextEdit};
use crate::types::UpdateFrame;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Highest clock a frame may carry; every integer up to it survives a JSON
/// round trip through an f64.
const MAX_CLOCK: u64 = (1 << 53) - 1;

/// Whole-content register stamped with a Lamport clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LwwState {
    clock: u64,
    replica: Uuid,
    content: String,
}

impl LwwState {
    fn stamp(&self) -> (u64, Uuid) {
        (self.clock, self.replica)
    }
}

/// Last-writer-wins document for editors without a CRDT binding.
///
/// Every local change broadcasts the whole content with a Lamport stamp. A
/// replica keeps whichever state carries the greatest `(clock, replica)` pair,
/// so merging is commutative and idempotent, but concurrent edits are not
/// combined: the later writer wins.
#[derive(Debug, Clone)]
pub struct LwwDocument {
    replica: Uuid,
    state: LwwState,
}

impl LwwDocument {
    pub fn new() -> Self {
        Self::with_replica(Uuid::new_v4())
    }

    /// Create a document with a fixed replica id, which decides ties.
    pub fn with_replica(replica: Uuid) -> Self {
        Self {
            replica,
            state: LwwState {
                clock: 0,
                replica: Uuid::nil(),
                content: String::new(),
            },
        }
    }

    /// Current Lamport clock.
    pub fn clock(&self) -> u64 {
        self.state.clock
    }

    fn decode(bytes: &[u8]) -> DocumentResult<LwwState> {
        let state: LwwState =
            serde_json::from_slice(bytes).map_err(|e| DocumentError::Malformed(e.to_string()))?;
        if state.clock > MAX_CLOCK {
            return Err(DocumentError::Malformed(format!(
                "clock {} exceeds {MAX_CLOCK}",
                state.clock
            )));
        }
        Ok(state)
    }

    fn encode(state: &LwwState) -> DocumentResult<Vec<u8>> {
        serde_json::to_vec(state).map_err(|e| DocumentError::Encode(e.to_string()))
    }

    fn absorb(&mut self, incoming: LwwState) {
        if incoming.stamp().cmp(&self.state.stamp()) == Ordering::Greater {
            self.state = incoming;
        }
    }

    fn write(&mut self, content: String) -> DocumentResult<UpdateFrame> {
        let clock = self
            .state
            .clock
            .checked_add(1)
            .filter(|clock| *clock <= MAX_CLOCK)
            .ok_or_else(|| DocumentError::Apply("lamport clock exhausted".into()))?;
        let next = LwwState {
            clock,
            replica: self.replica,
            content,
        };
        let frame = Self::encode(&next)?;
        self.state = next;
        Ok(UpdateFrame::from(frame))
    }
}

impl Default for LwwDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedDocument for LwwDocument {
    fn kind(&self) -> &'static str {
        "lww-text"
    }

    fn apply_local_change(&mut self, edit: &TextEdit) -> DocumentResult<UpdateFrame> {
        let current = &self.state.content;
        edit.check_bounds(current.len() as u32)?;

        let start = edit.range.start as usize;
        let end = edit.range.end as usize;
        if !current.is_char_boundary(start) || !current.is_char_boundary(end) {
            return Err(DocumentError::InvalidRange {
                start: edit.range.start,
                end: edit.range.end,
                len: current.len() as u32,
            });
        }

        let mut content = String::with_capacity(current.len() + edit.content.len());
        content.push_str(&current[..start]);
        content.push_str(&edit.content);
        content.push_str(&current[end..]);
        self.write(content)
    }

    fn apply_remote_frame(&mut self, frame: &UpdateFrame) -> DocumentResult<()> {
        let incoming = Self::decode(frame.as_bytes())?;
        self.absorb(incoming);
        Ok(())
    }

    fn serialize(&self) -> DocumentResult<Vec<u8>> {
        Self::encode(&self.state)
    }

    fn merge(&mut self, state: &[u8]) -> DocumentResult<()> {
        let incoming = Self::decode(state)?;
        self.absorb(incoming);
        Ok(())
    }

    fn content(&self) -> String {
        self.state.content.clone()
    }

    fn restore_from(&mut self, state: &[u8]) -> DocumentResult<UpdateFrame> {
        let restored = Self::decode(state)?;
        self.write(restored.content)
    }
}
