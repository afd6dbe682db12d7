//! Ephemeral presence payloads.

use crate::types::{Identity, ParticipantId};
use serde::{Deserialize, Serialize};

/// A caret or selection in the shared text, as UTF-8 byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub anchor: u32,
    pub head: u32,
}

impl CursorPosition {
    pub fn caret(at: u32) -> Self {
        Self {
            anchor: at,
            head: at,
        }
    }

    pub fn is_selection(&self) -> bool {
        self.anchor != self.head
    }
}

/// What a participant advertises about itself on a document's presence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default)]
    pub typing: bool,
}

impl PresenceState {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            cursor: None,
            typing: false,
        }
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.identity.participant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_state_omits_missing_cursor() {
        let identity = Identity::new(ParticipantId::new(), "Ada", "#ff8800");
        let state = PresenceState::new(identity);

        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("cursor").is_none());
        assert_eq!(json["typing"], false);
    }

    #[test]
    fn test_caret_is_not_a_selection() {
        assert!(!CursorPosition::caret(4).is_selection());
        assert!(CursorPosition { anchor: 1, head: 4 }.is_selection());
    }
}
