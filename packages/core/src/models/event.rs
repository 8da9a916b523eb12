//! Domain Event Envelope
//!
//! Every committed write publishes a `ModelEvent` on the manager-action
//! channel. The envelope is a small self-describing JSON document so that
//! listeners (and external consumers draining the channel) can react without
//! loading the node first.

use crate::models::Reference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Write action carried by a [`ModelEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelAction {
    /// First insert of a node
    Create,
    /// Revision bump of an existing node
    Update,
    /// Soft deletion routed through the update path
    SoftDelete,
}

/// Event published on the manager-action channel after a committed write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvent {
    /// Type tag of the written node
    #[serde(rename = "type")]
    pub node_type: String,

    /// Node name at write time
    pub name: String,

    /// What happened
    pub action: ModelAction,

    /// Identity of the written node
    pub subject: Reference,

    /// Revision after the write
    pub revision: i64,

    /// Timestamp of the write
    pub date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Contract test: the JSON field names are consumed by channel listeners
    /// and external drains; changing them is a wire-format break.
    #[test]
    fn test_model_event_serialization_contract() {
        let event = ModelEvent {
            node_type: "media.image".to_string(),
            name: "The image".to_string(),
            action: ModelAction::Create,
            subject: Reference::root(),
            revision: 1,
            date: Utc::now(),
        };

        let parsed: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();

        assert_eq!(parsed.get("type").unwrap(), "media.image");
        assert_eq!(parsed.get("name").unwrap(), "The image");
        assert_eq!(parsed.get("action").unwrap(), "Create");
        assert_eq!(
            parsed.get("subject").unwrap(),
            "11111111-1111-1111-1111-111111111111"
        );
        assert_eq!(parsed.get("revision").unwrap(), 1);
        assert!(parsed.get("date").is_some());
        // The discriminator must not be nested under an "action" object
        assert!(parsed.get("node_type").is_none());
    }

    #[test]
    fn test_model_event_round_trip() {
        let event = ModelEvent {
            node_type: "core.user".to_string(),
            name: "Alice".to_string(),
            action: ModelAction::SoftDelete,
            subject: Reference::new_random(),
            revision: 4,
            date: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let back: ModelEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
