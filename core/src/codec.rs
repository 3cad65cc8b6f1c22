//! JSON encoding and decoding of typed values.
//!
//! # Design
//! `JsonCodec` is a small, explicitly constructed value. It carries only its
//! `CodecConfig`, so one instance can be shared freely and every call is
//! independent. The target shape of a decode is the Rust type the caller
//! asks for: a struct with required fields, a `HashMap<String, String>`, or
//! `serde_json::Value` when any JSON is acceptable.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DecodingError, EncodingError};
use crate::finite;

/// What to do with NaN and the infinities, which JSON cannot express.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonFiniteFloats {
    /// Fail the encode with `EncodingError::NonFiniteFloat`.
    #[default]
    Reject,
    /// Write `null` in place of the number. Such a payload no longer decodes
    /// back into a float field.
    Null,
}

/// Output options for `JsonCodec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Indent nested values with two spaces.
    pub pretty: bool,
    /// Emit object keys in lexicographic order instead of declaration or
    /// iteration order.
    ///
    /// Sorting goes through an in-memory `serde_json::Value`, which only
    /// holds integers that fit in 64 bits; a wider `i128`/`u128` then fails
    /// with `EncodingError::Json` even though unsorted output accepts it.
    pub sort_keys: bool,
    pub non_finite: NonFiniteFloats,
}

/// An immutable JSON document as produced by `JsonCodec::encode`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedPayload(Vec<u8>);

impl EncodedPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload as text, or `None` if the bytes are not UTF-8. Payloads
    /// produced by the codec always are.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for EncodedPayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for EncodedPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<String> for EncodedPayload {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl From<&str> for EncodedPayload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

/// Converts values to and from JSON bytes.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    config: CodecConfig,
}

impl JsonCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encode `value` as JSON.
    ///
    /// Fails if the value holds something JSON cannot represent: a
    /// non-finite float (unless configured to write `null`), a map whose keys
    /// are not strings, or an error raised by the value's `Serialize` impl.
    /// With `sort_keys` set, integers outside the 64-bit range fail too.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<EncodedPayload, EncodingError> {
        if self.config.non_finite == NonFiniteFloats::Reject {
            finite::check(value)?;
        }
        let bytes = if self.config.sort_keys {
            let tree = sort_keys(serde_json::to_value(value)?);
            self.write(&tree)?
        } else {
            self.write(value)?
        };
        Ok(EncodedPayload(bytes))
    }

    /// Encode `value` and return the JSON text.
    pub fn encode_to_string<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, EncodingError> {
        let payload = self.encode(value)?;
        // serde_json only ever writes UTF-8.
        Ok(String::from_utf8_lossy(payload.as_bytes()).into_owned())
    }

    /// Decode `payload` into `T`.
    ///
    /// The whole input must be one JSON value: trailing bytes, truncation and
    /// syntax errors all fail, as does a document that does not fit `T`.
    pub fn decode<T: DeserializeOwned>(&self, payload: impl AsRef<[u8]>) -> Result<T, DecodingError> {
        Ok(serde_json::from_slice(payload.as_ref())?)
    }

    /// Decode `payload` into a dynamic JSON value.
    pub fn decode_value(&self, payload: impl AsRef<[u8]>) -> Result<Value, DecodingError> {
        self.decode(payload)
    }

    fn write<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, EncodingError> {
        let bytes = if self.config.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }
}

/// Rebuild every object in `value` with its keys in lexicographic order.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
