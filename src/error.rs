// MIT License - Copyright (c) 2026 Peter Wright
// Bridge error type

use crate::category::{Category, ChannelId};

/// All errors that can occur in the satel bridge library.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Channel {channel} in category {category} claimed by both {first} and {second}")]
    ChannelCollision {
        category: Category,
        channel: ChannelId,
        first: String,
        second: String,
    },

    #[error("Invalid ordinal {ordinal} for {device} (ordinals start at 1)")]
    InvalidOrdinal { device: String, ordinal: u32 },

    #[error("An alarm code is required to use switchable outputs")]
    MissingAlarmCode,

    #[error("Unknown entity: {unique_id}")]
    UnknownEntity { unique_id: String },

    #[error("Entity {unique_id} does not accept commands")]
    NotControllable { unique_id: String },

    #[error("Panel rejected command: {reason}")]
    CommandRejected { reason: String },

    #[error("Command timeout: {command}")]
    CommandTimeout { command: String },

    #[error("Connector does not support {operation}")]
    Unsupported { operation: String },

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Panel link disconnected")]
    Disconnected,

    #[error("Notification router closed")]
    RouterClosed,

    #[error("Channel closed")]
    ChannelClosed,
}

impl BridgeError {
    /// Whether this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Io(_)
                | BridgeError::CommandTimeout { .. }
                | BridgeError::Mqtt(_)
                | BridgeError::Disconnected
                | BridgeError::ChannelClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BridgeError::Disconnected.is_retryable());
        assert!(BridgeError::CommandTimeout { command: "SET_OUTPUT".into() }.is_retryable());
        assert!(!BridgeError::MissingAlarmCode.is_retryable());
        assert!(!BridgeError::CommandRejected { reason: "bad code".into() }.is_retryable());
    }

    #[test]
    fn test_collision_message_names_both_devices() {
        let err = BridgeError::ChannelCollision {
            category: Category::Trouble2,
            channel: ChannelId::new(129).unwrap(),
            first: "expander 65".into(),
            second: "keypad 1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("trouble2"));
        assert!(msg.contains("129"));
        assert!(msg.contains("expander 65"));
        assert!(msg.contains("keypad 1"));
    }
}
