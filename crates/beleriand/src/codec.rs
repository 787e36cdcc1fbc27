//! Value envelope stored in both cache levels.
//!
//! ```text
//! {"format":1,"type":"my_app::Config","data":{"name":"A"}}
//! ```
//!
//! The format number lets the layout change without misreading old entries.
//! The type tag records what the writer stored. Reads are structural: any
//! type the data deserializes into is accepted (a struct can be read back as
//! `serde_json::Value`, a `&str` as `String`). When the data does not fit the
//! requested type and the tags differ, the error is
//! [`CacheError::TypeMismatch`] naming both types.

use std::any::type_name;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Current envelope format.
pub const FORMAT_VERSION: u8 = 1;

/// Encoded envelope bytes, shared between the local store and callers.
pub type Payload = Arc<Vec<u8>>;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format: u8,
    #[serde(rename = "type")]
    type_tag: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    format: u8,
    #[serde(rename = "type")]
    type_tag: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Encode `value` for `key`. Values that serialize to JSON `null` are rejected.
pub fn encode<T: Serialize>(key: &str, value: &T) -> Result<Payload> {
    let data = serde_json::to_value(value)?;
    if data.is_null() {
        return Err(CacheError::NullValue(key.to_string()));
    }
    let bytes = serde_json::to_vec(&EnvelopeRef {
        format: FORMAT_VERSION,
        type_tag: type_tag::<T>(),
        data: &data,
    })?;
    Ok(Arc::new(bytes))
}

/// Decode a payload produced by [`encode`] as `T`.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    let header: EnvelopeHeader = serde_json::from_slice(payload)?;
    if header.format != FORMAT_VERSION {
        return Err(CacheError::UnsupportedFormat(header.format));
    }
    match serde_json::from_slice::<Envelope<T>>(payload) {
        Ok(envelope) => Ok(envelope.data),
        Err(e) => {
            let expected = type_tag::<T>();
            if header.type_tag != expected {
                return Err(CacheError::type_mismatch(expected, header.type_tag));
            }
            Err(e.into())
        }
    }
}

/// Type name with reference prefixes removed, so `&Config` is tagged `Config`.
fn type_tag<T: ?Sized>() -> &'static str {
    let mut name = type_name::<T>();
    while let Some(rest) = name.strip_prefix('&') {
        name = rest.strip_prefix("mut ").unwrap_or(rest);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AppConfig {
        name: String,
        retries: u32,
    }

    #[test]
    fn test_round_trip_struct() {
        let config = AppConfig {
            name: "A".into(),
            retries: 3,
        };
        let payload = encode("Config:1", &config).unwrap();
        let decoded: AppConfig = decode(&payload).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_envelope_layout() {
        let payload = encode("k", &42u32).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["format"], 1);
        assert_eq!(json["type"], "u32");
        assert_eq!(json["data"], 42);
    }

    #[test]
    fn test_null_value_rejected() {
        let err = encode("k", &Option::<u32>::None).unwrap_err();
        assert!(matches!(err, CacheError::NullValue(key) if key == "k"));
        assert!(encode("k", &()).is_err());
    }

    #[test]
    fn test_type_mismatch() {
        let payload = encode("k", &"text".to_string()).unwrap();
        let err = decode::<u64>(&payload).unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { .. }));
    }

    #[test]
    fn test_references_are_tagged_as_their_target() {
        let payload = encode("k", &"abc").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["type"], "str");

        let config = AppConfig {
            name: "A".into(),
            retries: 1,
        };
        let by_ref = encode("k", &&config).unwrap();
        assert_eq!(by_ref, encode("k", &config).unwrap());
    }

    #[test]
    fn test_str_reads_back_as_string() {
        let payload = encode("k", &"abc").unwrap();
        assert_eq!(decode::<String>(&payload).unwrap(), "abc");
    }

    #[test]
    fn test_struct_reads_back_as_json_value() {
        let config = AppConfig {
            name: "A".into(),
            retries: 3,
        };
        let payload = encode("k", &config).unwrap();

        let value: serde_json::Value = decode(&payload).unwrap();
        assert_eq!(value, serde_json::json!({"name": "A", "retries": 3}));

        // And a JSON value written by a tool reads back as the struct
        let written = encode("k", &value).unwrap();
        assert_eq!(decode::<AppConfig>(&written).unwrap(), config);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let payload = br#"{"format":9,"type":"u32","data":1}"#;
        assert!(matches!(
            decode::<u32>(payload),
            Err(CacheError::UnsupportedFormat(9))
        ));
    }

    #[test]
    fn test_untagged_text_rejected() {
        assert!(matches!(
            decode::<AppConfig>(br#"{"name":"A","retries":1}"#),
            Err(CacheError::Json(_))
        ));
    }
}
