//! Key records - one Redis key presented as an admin row

use crate::{DecodedValue, DecoderSettings, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Redis key types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// String value
    String,
    /// List (linked list)
    List,
    /// Set (unordered unique strings)
    Set,
    /// Hash (field-value pairs)
    Hash,
    /// Sorted set (ordered by score)
    Zset,
    /// Stream (append-only log), listed but never fetched
    Stream,
    /// Key doesn't exist (anymore), or a type this admin does not know
    None,
}

/// The command that fetches a key's whole value: `name key args...`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueCommand {
    pub name: &'static str,
    pub args: &'static [&'static str],
}

impl KeyType {
    /// Parse from Redis TYPE command response
    pub fn from_redis_type(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "string" => KeyType::String,
            "list" => KeyType::List,
            "set" => KeyType::Set,
            "hash" => KeyType::Hash,
            "zset" => KeyType::Zset,
            "stream" => KeyType::Stream,
            _ => KeyType::None,
        }
    }

    /// Get the Redis type string
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::Hash => "hash",
            KeyType::Zset => "zset",
            KeyType::Stream => "stream",
            KeyType::None => "none",
        }
    }

    /// Command fetching the full value, `None` for types that are not shown
    pub fn value_command(&self) -> Option<ValueCommand> {
        let (name, args): (&'static str, &'static [&'static str]) = match self {
            KeyType::String => ("GET", &[]),
            KeyType::List => ("LRANGE", &["0", "-1"]),
            KeyType::Set => ("SMEMBERS", &[]),
            KeyType::Hash => ("HGETALL", &[]),
            KeyType::Zset => ("ZRANGEBYSCORE", &["-inf", "+inf", "WITHSCORES"]),
            KeyType::Stream | KeyType::None => return None,
        };
        Some(ValueCommand { name, args })
    }

    /// Whether values of this type are fetched and decoded
    pub fn is_fetchable(&self) -> bool {
        self.value_command().is_some()
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value as returned by its fetch command, before decoding
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Nil reply, e.g. the key expired between scan and fetch
    Nil,
    /// Bulk string (`GET`)
    Bytes(Vec<u8>),
    /// Array of bulk strings (`LRANGE`, `SMEMBERS`)
    Sequence(Vec<Vec<u8>>),
    /// Flat array read as pairs (`HGETALL`, `ZRANGEBYSCORE ... WITHSCORES`)
    Pairs(Vec<(Vec<u8>, Vec<u8>)>),
}

impl RawValue {
    /// Lossy text rendering, used when a value could not be decoded
    pub fn to_lossy_string(&self) -> String {
        fn text(bytes: &[u8]) -> String {
            String::from_utf8_lossy(bytes).into_owned()
        }

        match self {
            RawValue::Nil => String::new(),
            RawValue::Bytes(bytes) => text(bytes),
            RawValue::Sequence(items) => {
                let items: Vec<String> = items.iter().map(|i| text(i)).collect();
                format!("[{}]", items.join(", "))
            }
            RawValue::Pairs(pairs) => {
                let pairs: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", text(k), text(v)))
                    .collect();
                format!("{{{}}}", pairs.join(", "))
            }
        }
    }
}

/// One Redis key as an admin row
///
/// Records are built from the metadata round trip (type, TTL, idle time) and
/// later receive their raw value from the value round trip. Nothing else
/// changes after construction except the cached decode.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecord {
    /// The key name
    pub key: String,
    /// Redis data type reported by TYPE
    pub key_type: KeyType,
    /// Raw value, `None` until fetched (and for types that are never fetched)
    pub raw_value: Option<RawValue>,
    /// When the key expires, if it has a TTL
    pub expires_at: Option<DateTime<Utc>>,
    /// When the key was last accessed, if the server tracks idle time
    pub idle_since: Option<DateTime<Utc>>,
    /// Whether the string value was successfully base64-decoded
    pub is_base64: bool,
    /// Whether the string value was successfully parsed as JSON
    pub is_json: bool,
    decoded: Option<DecodedValue>,
}

impl KeyRecord {
    /// Create a record without metadata
    pub fn new(key: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            key: key.into(),
            key_type,
            raw_value: None,
            expires_at: None,
            idle_since: None,
            is_base64: false,
            is_json: false,
            decoded: None,
        }
    }

    /// Create a record from `TYPE`, `PTTL` and `OBJECT IDLETIME` replies.
    ///
    /// `now` is captured once per page so every record shares one reference
    /// instant. Non-positive TTL means no expiry, non-positive idle time means
    /// unknown.
    pub fn from_metadata(
        key: impl Into<String>,
        key_type: KeyType,
        ttl_ms: i64,
        idle_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::new(key, key_type);
        if ttl_ms > 0 {
            record.expires_at = Some(now + Duration::milliseconds(ttl_ms));
        }
        if idle_secs > 0 {
            record.idle_since = Some(now - Duration::seconds(idle_secs));
        }
        record
    }

    /// Attach the raw value, dropping any earlier decode
    pub fn with_raw_value(mut self, raw_value: RawValue) -> Self {
        self.set_raw_value(raw_value);
        self
    }

    /// Replace the raw value, dropping any earlier decode
    pub fn set_raw_value(&mut self, raw_value: RawValue) {
        self.raw_value = Some(raw_value);
        self.decoded = None;
        self.is_base64 = false;
        self.is_json = false;
    }

    /// Decode the raw value and cache the result along with its flags
    pub fn decode(&mut self, settings: &DecoderSettings) -> Result<&DecodedValue> {
        let decoded = settings.decode(&self.key, self.key_type, self.raw_value.as_ref())?;
        self.is_base64 = decoded.is_base64;
        self.is_json = decoded.is_json;
        Ok(self.decoded.insert(decoded.value))
    }

    /// The decoded value, if `decode` has succeeded
    pub fn decoded_value(&self) -> Option<&DecodedValue> {
        self.decoded.as_ref()
    }

    /// Text shown for the value: the decoded value, or the raw value when
    /// decoding failed or has not happened yet
    pub fn display_value(&self) -> String {
        match (&self.decoded, &self.raw_value) {
            (Some(decoded), _) => decoded.to_string(),
            (None, Some(raw)) => raw.to_lossy_string(),
            (None, None) => String::new(),
        }
    }

    /// The display value cropped to `crop_size` characters
    pub fn cropped_value(&self, crop_size: usize) -> String {
        crate::crop(&self.display_value(), crop_size)
    }

    /// Time left before expiry, relative to now
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_at(Utc::now())
    }

    /// Time left before expiry, relative to `now`
    pub fn ttl_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|expires_at| expires_at - now)
    }

    /// Time since last access, relative to now
    pub fn idle(&self) -> Option<Duration> {
        self.idle_at(Utc::now())
    }

    /// Time since last access, relative to `now`
    pub fn idle_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.idle_since.map(|idle_since| now - idle_since)
    }
}
