//! Frame definitions for the location-broker connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::Command;
use crate::events::Push;

/// Correlates a blocking command with its reply.
pub type RequestId = u64;

/// Frames sent from the location to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opens the handshake.
    Hello {
        /// Location (broker fqdn) being addressed.
        location: String,
        /// Base64 Ed25519 public key of the user.
        public_key: String,
    },
    /// Answers the broker challenge.
    Proof {
        /// Base64 Ed25519 signature over the challenge nonce.
        signature: String,
    },
    /// A command, with a request id when a reply is expected.
    Command {
        /// Request id for blocking commands.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<RequestId>,
        /// The command.
        command: Command,
    },
}

impl ClientFrame {
    /// A fire-and-forget command frame.
    #[must_use]
    pub const fn command(command: Command) -> Self {
        Self::Command { id: None, command }
    }

    /// A command frame expecting a reply.
    #[must_use]
    pub const fn request(id: RequestId, command: Command) -> Self {
        Self::Command {
            id: Some(id),
            command,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, crate::ProtoError> {
        serde_json::to_string(self).map_err(|e| crate::ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, crate::ProtoError> {
        serde_json::from_str(json).map_err(|e| crate::ProtoError::Decoding(e.to_string()))
    }
}

/// Frames sent from the broker to the location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerFrame {
    /// Nonce the client must sign.
    Challenge {
        /// Base64 nonce.
        nonce: String,
    },
    /// Handshake accepted.
    Welcome {
        /// Broker-side session identifier.
        session: String,
    },
    /// Handshake refused.
    Rejected {
        /// Why.
        reason: String,
    },
    /// Reply to a blocking command.
    Reply {
        /// Request id of the command.
        id: RequestId,
        /// Result payload on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error message on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Unsolicited notification.
    Push {
        /// The notification.
        event: Push,
    },
}

impl BrokerFrame {
    /// A successful reply.
    #[must_use]
    pub const fn ok(id: RequestId, result: Value) -> Self {
        Self::Reply {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A failed reply.
    #[must_use]
    pub fn err(id: RequestId, error: impl Into<String>) -> Self {
        Self::Reply {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Wrap a push.
    #[must_use]
    pub const fn push(event: Push) -> Self {
        Self::Push { event }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, crate::ProtoError> {
        serde_json::to_string(self).map_err(|e| crate::ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, crate::ProtoError> {
        serde_json::from_str(json).map_err(|e| crate::ProtoError::Decoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    #[test]
    fn test_request_frame_carries_id() {
        let frame = ClientFrame::request(7, Command::Heartbeat);
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"type\":\"command\""));
        assert!(json.contains("\"id\":7"));
        assert_eq!(ClientFrame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn test_fire_and_forget_frame_has_no_id() {
        let json = ClientFrame::command(Command::Heartbeat).to_json().unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_reply_variants() {
        let ok = BrokerFrame::ok(3, serde_json::json!({"volume": "x"}));
        let json = ok.to_json().unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));

        let err = BrokerFrame::err(4, "tag in use");
        let json = err.to_json().unwrap();
        assert!(json.contains("tag in use"));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_push_frame_nested_event() {
        let frame = BrokerFrame::push(Push::NodeDestroyed {
            node: NodeId::new(),
        });
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "push");
        assert_eq!(value["event"]["event"], "node_destroyed");
    }

    #[test]
    fn test_garbage_is_decoding_error() {
        let err = BrokerFrame::from_json("{not json").unwrap_err();
        assert!(matches!(err, crate::ProtoError::Decoding(_)));
    }
}
