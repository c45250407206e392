//! Serde adapters that write byte fields as base64 strings.
//!
//! JSON has no byte type; without these every key and ciphertext would be
//! written as an array of numbers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{de, Deserialize, Deserializer, Serializer};

pub mod bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(de::Error::custom)
    }
}

pub mod array32 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let bytes = super::bytes::deserialize(deserializer)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| de::Error::invalid_length(bytes.len(), &"32 bytes"))
    }
}

pub mod option_array32 {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<[u8; 32]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&STANDARD.encode(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; 32]>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| {
            let bytes = STANDARD.decode(s.as_bytes()).map_err(de::Error::custom)?;
            <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| de::Error::invalid_length(bytes.len(), &"32 bytes"))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        #[serde(with = "super::bytes")]
        blob: Vec<u8>,
        #[serde(with = "super::array32")]
        key: [u8; 32],
        #[serde(with = "super::option_array32", default)]
        maybe: Option<[u8; 32]>,
    }

    #[test]
    fn test_fields_are_strings() {
        let s = Sample {
            blob: vec![1, 2, 3],
            key: [9u8; 32],
            maybe: None,
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["blob"], "AQID");
        assert!(json["key"].is_string());
        assert!(json["maybe"].is_null());
        let back: Sample = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_missing_optional_defaults_to_none() {
        let json = serde_json::json!({ "blob": "", "key": base64_of(&[1u8; 32]) });
        let s: Sample = serde_json::from_value(json).unwrap();
        assert_eq!(s.maybe, None);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let json = serde_json::json!({ "blob": "", "key": "AQID" });
        assert!(serde_json::from_value::<Sample>(json).is_err());
    }

    fn base64_of(data: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(data)
    }
}
