use serde::{Deserialize, Serialize};

/// Position of a contact in the local `contacts` table.
///
/// Assigned once by the store's sequence and never reused. The same number
/// is what the peer knows as its `remote_id` for us.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ContactId(pub u64);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a message inside its contact's message sub-table.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer's X25519 public key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PeerKey(#[serde(with = "crate::encoding::array32")] pub [u8; 32]);

impl PeerKey {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

/// Content hash identifying a text message on both ends of a contact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct GlobalId(#[serde(with = "crate::encoding::array32")] pub [u8; 32]);

/// A peer's network address (an onion host, optionally with a port).
///
/// This is also the invite link users exchange out of band. Addresses read
/// off the wire or from storage go through [`PeerAddress::parse`] too.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Normalise a pasted link: trims whitespace, a leading `http://` and a
    /// trailing `/`, and lowercases the host.
    pub fn parse(link: &str) -> Result<Self, AddressError> {
        let trimmed = link.trim();
        let trimmed = trimmed.strip_prefix("http://").unwrap_or(trimmed);
        let trimmed = trimmed.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        if trimmed.chars().any(|c| !c.is_ascii_graphic() || c == '/') {
            return Err(AddressError::Malformed(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `host:port`, defaulting the port to the onion service port.
    pub fn authority(&self) -> String {
        if self.0.contains(':') {
            self.0.clone()
        } else {
            format!("{}:{}", self.0, crate::constants::ONION_PORT)
        }
    }

    /// Abbreviated form for status lines: `abc.xyz`.
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.trim_end_matches(".onion").chars().collect();
        if chars.len() <= 6 {
            return chars.into_iter().collect();
        }
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{head}.{tail}")
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = AddressError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<PeerAddress> for String {
    fn from(address: PeerAddress) -> Self {
        address.0
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("empty address")]
    Empty,

    #[error("malformed address: {0}")]
    Malformed(String),
}
