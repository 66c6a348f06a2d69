//! Protocol Messages
//!
//! Wire format for client-server communication. Every message in either
//! direction is a `Pdu`: a type tag plus free text, serialized as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// MESSAGE KINDS
// =============================================================================

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PduKind {
    /// A numbered list of choices.
    Menu,
    /// Prompt for free input, or a client's reply.
    Input,
    /// Prompt for a selection from a list just sent.
    Select,
    /// Informational text.
    Info,
    /// A rejected action or failure.
    Error,
    /// A completed action.
    Success,
    /// Outcome of an attack or match.
    Result,
    /// Something that happened to the player's side.
    Event,
    /// Status snapshot (JSON text).
    Status,
    /// Sent to both players in a session.
    Broadcast,
}

impl fmt::Display for PduKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PduKind::Menu => "menu",
            PduKind::Input => "input",
            PduKind::Select => "select",
            PduKind::Info => "info",
            PduKind::Error => "error",
            PduKind::Success => "success",
            PduKind::Result => "result",
            PduKind::Event => "event",
            PduKind::Status => "status",
            PduKind::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

// =============================================================================
// PDU
// =============================================================================

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pdu {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: PduKind,
    /// Free-text payload.
    #[serde(default)]
    pub payload: String,
}

impl Pdu {
    /// Build a message.
    pub fn new(kind: PduKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Client reply carrying `text`.
    pub fn input(text: impl Into<String>) -> Self {
        Self::new(PduKind::Input, text)
    }

    /// Payload with surrounding whitespace removed.
    pub fn text(&self) -> &str {
        self.payload.trim()
    }

    /// Parse the payload as a 1-based list choice, returning the 0-based index.
    pub fn choice(&self) -> Option<usize> {
        self.text().parse::<usize>().ok()?.checked_sub(1)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Render a 1-based numbered list.
pub fn numbered<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: fmt::Display,
{
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let pdu = Pdu::new(PduKind::Broadcast, "Game started!");
        let json = pdu.to_json().unwrap();

        assert_eq!(json, r#"{"type":"broadcast","payload":"Game started!"}"#);
        assert_eq!(Pdu::from_json(&json).unwrap(), pdu);
    }

    #[test]
    fn test_missing_payload_defaults_empty() {
        let pdu = Pdu::from_json(r#"{"type":"input"}"#).unwrap();
        assert_eq!(pdu.kind, PduKind::Input);
        assert_eq!(pdu.payload, "");
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(Pdu::from_json(r#"{"type":"teleport","payload":"x"}"#).is_err());
    }

    #[test]
    fn test_choice_parsing() {
        assert_eq!(Pdu::input(" 2 ").choice(), Some(1));
        assert_eq!(Pdu::input("1").choice(), Some(0));
        assert_eq!(Pdu::input("0").choice(), None);
        assert_eq!(Pdu::input("-1").choice(), None);
        assert_eq!(Pdu::input("two").choice(), None);
    }

    #[test]
    fn test_numbered_list() {
        assert_eq!(numbered(["Attack Tower", "Show Status"]), "1. Attack Tower\n2. Show Status");
        assert_eq!(numbered(Vec::<String>::new()), "");
    }

    #[test]
    fn test_kind_display_matches_wire() {
        for kind in [PduKind::Menu, PduKind::Select, PduKind::Status, PduKind::Result] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }
}
