//! Remote door commands received on the command topic.
//!
//! The only command is a JSON object naming the door to toggle:
//! `{"door": "garage_door_1"}`.

use super::{DoorSet, GarageDoor};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorCommand {
    pub door: String,
}

impl DoorCommand {
    pub fn new(door: impl Into<String>) -> Self {
        Self { door: door.into() }
    }

    /// Parse a command payload.
    pub fn parse(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Serialize for publishing.
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Find the door this command addresses.
    pub fn resolve<'a>(&self, doors: &'a DoorSet) -> Result<&'a Arc<GarageDoor>> {
        doors
            .get(&self.door)
            .ok_or_else(|| BridgeError::UnknownDoor(self.door.clone()))
    }
}

/// Parse a command payload and find the door it addresses.
pub fn resolve_payload(doors: &DoorSet, payload: &str) -> Result<Arc<GarageDoor>> {
    let command = DoorCommand::parse(payload)?;
    Ok(command.resolve(doors)?.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::simulation::SimulatedDoor;
    use std::time::Duration;

    fn doors() -> (SimulatedDoor, SimulatedDoor, DoorSet) {
        let first = SimulatedDoor::new(false);
        let second = SimulatedDoor::new(false);
        let set = DoorSet::new(vec![
            first.door("garage_door_1", Duration::from_millis(5)),
            second.door("garage_door_2", Duration::from_millis(5)),
        ]);
        (first, second, set)
    }

    #[test]
    fn test_parse_command() {
        let command = DoorCommand::parse(r#"{"door": "garage_door_2"}"#).unwrap();
        assert_eq!(command, DoorCommand::new("garage_door_2"));
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let command =
            DoorCommand::parse(r#"{"door": "garage_door_1", "requested_by": "alexa"}"#).unwrap();
        assert_eq!(command.door, "garage_door_1");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(DoorCommand::parse("garage_door_1").is_err());
        assert!(DoorCommand::parse(r#"{"doors": "garage_door_1"}"#).is_err());
        assert!(DoorCommand::parse(r#"{"door": 1}"#).is_err());
    }

    #[test]
    fn test_payload_shape() {
        let payload = DoorCommand::new("garage_door_1").to_payload().unwrap();
        assert_eq!(payload, r#"{"door":"garage_door_1"}"#);
    }

    #[tokio::test]
    async fn test_resolved_door_triggers_alone() {
        let (first, second, set) = doors();

        let door = match resolve_payload(&set, r#"{"door": "garage_door_2"}"#) {
            Ok(door) => door,
            Err(e) => panic!("command did not resolve: {}", e),
        };
        assert_eq!(door.name(), "garage_door_2");
        assert!(door.trigger().await);
        assert_eq!(first.pulse_count(), 0);
        assert_eq!(second.pulse_count(), 1);
    }

    #[test]
    fn test_resolve_unknown_door() {
        let (first, second, set) = doors();

        let err = resolve_payload(&set, r#"{"door": "front_door"}"#)
            .err()
            .expect("unknown door resolved");
        assert!(matches!(err, BridgeError::UnknownDoor(name) if name == "front_door"));
        assert_eq!(first.pulse_count() + second.pulse_count(), 0);
    }

    #[test]
    fn test_resolve_malformed_json() {
        let (_, _, set) = doors();
        let err = resolve_payload(&set, "{not json")
            .err()
            .expect("malformed payload resolved");
        assert!(matches!(err, BridgeError::SerdeJsonError(_)));
    }
}
