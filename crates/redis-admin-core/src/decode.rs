//! Value decoding
//!
//! Turns raw replies into display values. The decode strategy is picked by the
//! key's type:
//!
//! | type   | raw                 | decoded                                  |
//! |--------|---------------------|------------------------------------------|
//! | string | bytes               | text, optionally base64 then JSON        |
//! | list   | bytes sequence      | ordered text sequence                    |
//! | set    | bytes sequence      | set of text                              |
//! | hash   | field/value pairs   | text -> scalar-decoded value             |
//! | zset   | member/score pairs  | member -> score, in score order          |
//!
//! Base64 and JSON are only attempted for scalars whose key matches the
//! configured pattern. A failed step keeps the previous value and leaves the
//! flag unset.

use crate::{AdminConfig, AdminError, KeyType, RawValue, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A decoded, display-ready value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    /// No value (never fetched, or a type that is not shown)
    Empty,
    Text(String),
    Json(serde_json::Value),
    List(Vec<String>),
    Set(BTreeSet<String>),
    Hash(IndexMap<String, DecodedValue>),
    SortedSet(IndexMap<String, String>),
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Empty => Ok(()),
            DecodedValue::Text(text) => f.write_str(text),
            DecodedValue::Json(value) => write!(f, "{}", value),
            other => {
                let rendered = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

/// A decoded value plus the flags recording which optional steps succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: DecodedValue,
    pub is_base64: bool,
    pub is_json: bool,
}

/// A JSON parser that can be selected by name in the configuration
pub trait JsonCodec: Send + Sync + fmt::Debug {
    /// Name used in the `json_codec` setting
    fn name(&self) -> &str;

    /// Parse a document
    fn parse(&self, text: &str) -> Result<serde_json::Value>;
}

/// The default codec, backed by `serde_json`
#[derive(Debug, Default, Clone, Copy)]
pub struct SerdeJsonCodec;

impl JsonCodec for SerdeJsonCodec {
    fn name(&self) -> &str {
        "serde_json"
    }

    fn parse(&self, text: &str) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Look up a built-in codec by its configured name
pub fn json_codec_by_name(name: &str) -> Result<Arc<dyn JsonCodec>> {
    match name {
        // "json" is accepted so configurations naming the stdlib-style module keep working
        "serde_json" | "json" => Ok(Arc::new(SerdeJsonCodec)),
        other => Err(AdminError::Configuration(format!(
            "Unknown JSON codec: {}",
            other
        ))),
    }
}

/// Crop `value` to at most `crop_size` characters plus an ellipsis.
///
/// Values of at least `crop_size` characters keep `crop_size / 2` characters
/// from each end around `...`.
pub fn crop(value: &str, crop_size: usize) -> String {
    let len = value.chars().count();
    if len < crop_size {
        return value.to_string();
    }

    let half = crop_size / 2;
    let head: String = value.chars().take(half).collect();
    let tail: String = value.chars().skip(len - half).collect();
    format!("{}...{}", head, tail)
}

/// Process-wide decoding settings, compiled once from the configuration
#[derive(Debug, Clone)]
pub struct DecoderSettings {
    base64_key_re: Regex,
    json_key_re: Regex,
    json_codec: Arc<dyn JsonCodec>,
    crop_size: usize,
}

impl DecoderSettings {
    /// Compile key patterns. Patterns match at the start of the key name.
    pub fn new(base64_key_re: &str, json_key_re: &str, crop_size: usize) -> Result<Self> {
        Ok(Self {
            base64_key_re: compile_key_pattern(base64_key_re, "base64_key_re")?,
            json_key_re: compile_key_pattern(json_key_re, "json_key_re")?,
            json_codec: Arc::new(SerdeJsonCodec),
            crop_size,
        })
    }

    /// Build from the admin configuration
    pub fn from_config(config: &AdminConfig) -> Result<Self> {
        let settings = Self::new(&config.base64_key_re, &config.json_key_re, config.crop_size)?
            .with_json_codec(json_codec_by_name(&config.json_codec)?);

        tracing::debug!(
            base64_key_re = %config.base64_key_re,
            json_key_re = %config.json_key_re,
            json_codec = %config.json_codec,
            crop_size = config.crop_size,
            "compiled decoder settings"
        );

        Ok(settings)
    }

    /// Replace the JSON codec
    pub fn with_json_codec(mut self, codec: Arc<dyn JsonCodec>) -> Self {
        self.json_codec = codec;
        self
    }

    pub fn crop_size(&self) -> usize {
        self.crop_size
    }

    pub fn json_codec(&self) -> &dyn JsonCodec {
        self.json_codec.as_ref()
    }

    /// Whether string values of `key` are base64-decoded
    pub fn is_base64_key(&self, key: &str) -> bool {
        self.base64_key_re.is_match(key)
    }

    /// Whether string values of `key` are JSON-parsed
    pub fn is_json_key(&self, key: &str) -> bool {
        self.json_key_re.is_match(key)
    }

    /// Crop a display string to the configured size
    pub fn crop(&self, value: &str) -> String {
        crop(value, self.crop_size)
    }

    /// Decode a raw value according to the key's type.
    ///
    /// Fails only when the raw reply does not have the shape the type
    /// implies; base64/JSON failures are not errors.
    pub fn decode(&self, key: &str, key_type: KeyType, raw: Option<&RawValue>) -> Result<Decoded> {
        let plain = |value| Decoded {
            value,
            is_base64: false,
            is_json: false,
        };

        let Some(raw) = raw else {
            return Ok(plain(DecodedValue::Empty));
        };

        match (key_type, raw) {
            (KeyType::String, RawValue::Bytes(bytes)) => Ok(self.decode_scalar(key, bytes)),
            (KeyType::String, RawValue::Nil) => Ok(self.decode_scalar(key, b"")),
            (KeyType::List, RawValue::Sequence(items)) => Ok(plain(DecodedValue::List(
                items.iter().map(|item| text(item)).collect(),
            ))),
            (KeyType::Set, RawValue::Sequence(items)) => Ok(plain(DecodedValue::Set(
                items.iter().map(|item| text(item)).collect(),
            ))),
            (KeyType::Hash, RawValue::Pairs(pairs)) => Ok(plain(DecodedValue::Hash(
                pairs
                    .iter()
                    .map(|(field, value)| (text(field), self.decode_scalar(key, value).value))
                    .collect(),
            ))),
            (KeyType::Zset, RawValue::Pairs(pairs)) => Ok(plain(DecodedValue::SortedSet(
                pairs
                    .iter()
                    .map(|(member, score)| (text(member), text(score)))
                    .collect(),
            ))),
            (KeyType::List | KeyType::Set | KeyType::Hash | KeyType::Zset, RawValue::Nil) => {
                Ok(plain(DecodedValue::Empty))
            }
            (KeyType::Stream | KeyType::None, _) => Ok(plain(DecodedValue::Empty)),
            (key_type, raw) => Err(AdminError::Decode(format!(
                "{} value of {:?} has unexpected shape {:?}",
                key_type,
                key,
                raw_shape(raw)
            ))),
        }
    }

    /// Decode one scalar: bytes to text, then base64 and JSON when the key
    /// matches the respective pattern
    pub fn decode_scalar(&self, key: &str, raw: &[u8]) -> Decoded {
        let mut value = text(raw);

        let mut is_base64 = false;
        if self.is_base64_key(key) {
            match STANDARD.decode(value.trim_end().as_bytes()) {
                Ok(decoded) => {
                    value = text(&decoded);
                    is_base64 = true;
                }
                Err(e) => tracing::trace!(key, error = %e, "value is not base64"),
            }
        }

        if self.is_json_key(key) {
            match self.json_codec.parse(&value) {
                Ok(json) => {
                    return Decoded {
                        value: DecodedValue::Json(json),
                        is_base64,
                        is_json: true,
                    };
                }
                Err(e) => tracing::trace!(key, error = %e, "value is not JSON"),
            }
        }

        Decoded {
            value: DecodedValue::Text(value),
            is_base64,
            is_json: false,
        }
    }
}

fn compile_key_pattern(pattern: &str, field: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})", pattern))
        .map_err(|e| AdminError::Configuration(format!("Invalid {}: {}", field, e)))
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn raw_shape(raw: &RawValue) -> &'static str {
    match raw {
        RawValue::Nil => "nil",
        RawValue::Bytes(_) => "bytes",
        RawValue::Sequence(_) => "sequence",
        RawValue::Pairs(_) => "pairs",
    }
}
