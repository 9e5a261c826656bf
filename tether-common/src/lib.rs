#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod payload;

mod string;
pub use payload::{OnOffPayload, ValueKind};
pub use string::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tether_string_serde() {
        assert_eq!(
            serde_json::to_string(&TetherString::from("living_room")).unwrap(),
            r#""living_room""#
        );

        assert_eq!(
            serde_json::from_str::<TetherString>(r#""living_room""#).unwrap(),
            TetherString::from("living_room")
        );
    }

    #[test]
    fn topic_name_matches_literally() {
        let topic = TopicName::from("zigbee2mqtt/lamp");

        assert!(topic.matches("zigbee2mqtt/lamp"));
        assert!(!topic.matches("zigbee2mqtt/lamp/set"));
        assert!(!topic.matches("zigbee2mqtt/+"));
        assert!(!TopicName::WILDCARD.matches("zigbee2mqtt/lamp"));
    }

    #[test]
    fn topic_name_display() {
        assert_eq!(TopicName::from("a/b").to_string(), "a/b");
        assert_eq!(TopicName::WILDCARD.to_string(), "#");
    }
}
