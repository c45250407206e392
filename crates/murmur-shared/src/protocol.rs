//! Wire protocol between two installations.
//!
//! Every operation is an HTTP `POST` of a JSON body to a fixed path on the
//! peer's onion service. Answers are a bare JSON boolean, except for
//! [`IntroduceAnswer`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ContactId, GlobalId, PeerAddress, PeerKey};

/// Fixed request paths, one per handshake stage.
pub mod paths {
    pub const INTRODUCE: &str = "/introduce";
    pub const CONFIRM_KEY: &str = "/confirm-key";
    pub const SET_SESSION_KEY: &str = "/set-session-key";
    pub const DELIVER: &str = "/deliver";
}

/// Stage 1: "I have your link; here is who I am."
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntroduceRequest {
    pub name: String,
    pub hello: String,
    /// The sender's own address, so the recipient can reach back.
    pub address: PeerAddress,
    #[serde(with = "crate::encoding::bytes")]
    pub shared_secret: Vec<u8>,
    pub public_key: PeerKey,
    /// The sender's contact id for the recipient.
    pub proposed_remote_id: ContactId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IntroduceAnswer {
    pub accepted: bool,
    /// The recipient's contact id for the sender.
    pub assigned_remote_id: Option<ContactId>,
}

impl IntroduceAnswer {
    pub fn rejected() -> Self {
        Self {
            accepted: false,
            assigned_remote_id: None,
        }
    }

    pub fn accepted(id: ContactId) -> Self {
        Self {
            accepted: true,
            assigned_remote_id: Some(id),
        }
    }
}

/// Stage 2: the sender proves it holds the shared secret and hands over
/// its public key. Both identifying fields are sealed to the recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmKeyRequest {
    pub name: String,
    /// Sealed little-endian `u64`: the sender's contact id for the recipient.
    #[serde(with = "crate::encoding::bytes")]
    pub remote_id_encrypted: Vec<u8>,
    /// Sealed shared secret.
    #[serde(with = "crate::encoding::bytes")]
    pub secret_encrypted: Vec<u8>,
    pub public_key: PeerKey,
}

/// Stage 3 payload. Travels sealed as [`SealedBody`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyProposal {
    /// The recipient's contact id for the sender.
    pub remote_id: ContactId,
    #[serde(with = "crate::encoding::bytes")]
    pub secret: Vec<u8>,
    #[serde(with = "crate::encoding::array32")]
    pub session_key: [u8; 32],
}

/// A sealed JSON document, sent as a base64 string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedBody(#[serde(with = "crate::encoding::bytes")] pub Vec<u8>);

/// Stage 4: a batch of messages encrypted under the session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverRequest {
    /// The recipient's contact id for the sender.
    pub remote_id: ContactId,
    /// Padded-AES encryption of a JSON array of [`DeliveredMessage`].
    #[serde(with = "crate::encoding::bytes")]
    pub batch: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    pub global_id: GlobalId,
    pub time: DateTime<Utc>,
    pub text: String,
}

pub fn encode_id(id: ContactId) -> [u8; 8] {
    id.0.to_le_bytes()
}

pub fn decode_id(bytes: &[u8]) -> Option<ContactId> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(ContactId(u64::from_le_bytes(arr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introduce_uses_camel_case_fields() {
        let req = IntroduceRequest {
            name: "user1".into(),
            hello: "hi".into(),
            address: PeerAddress::parse("abc.onion").unwrap(),
            shared_secret: vec![1, 2],
            public_key: PeerKey([3u8; 32]),
            proposed_remote_id: ContactId(4),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["proposedRemoteId"], 4);
        assert_eq!(json["sharedSecret"], "AQI=");
        assert_eq!(json["address"], "abc.onion");
    }

    #[test]
    fn test_answer_shape() {
        let json = serde_json::to_value(IntroduceAnswer::accepted(ContactId(9))).unwrap();
        assert_eq!(json, serde_json::json!({ "accepted": true, "assignedRemoteId": 9 }));
    }

    #[test]
    fn test_id_codec() {
        assert_eq!(decode_id(&encode_id(ContactId(77))), Some(ContactId(77)));
        assert_eq!(decode_id(&[1, 2, 3]), None);
    }
}
