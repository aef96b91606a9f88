//! In-memory keyspace for tests

use crate::keyspace::{KeyMetadata, Keyspace};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis_admin_core::{AdminError, KeyType, RawValue, Result};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MockKey {
    pub key: String,
    pub key_type: KeyType,
    pub ttl_ms: i64,
    pub idle_secs: i64,
    pub value: RawValue,
}

/// Keys held in insertion order, which is also the scan order.
///
/// Every trait call is appended to the call log as the command it stands
/// for, so tests can assert on round trips.
#[derive(Debug)]
pub struct MockKeyspace {
    pub keys: Vec<MockKey>,
    /// Names SCAN returns, in order; may repeat a key or hold non-UTF-8 bytes
    pub scan_order: Vec<Vec<u8>>,
    pub database: i64,
    pub info: String,
    /// Fail the value pipeline with an error reply
    pub fail_values_pipeline: bool,
    /// Fail the value pipeline with a transport error
    pub drop_connection_on_values: bool,
    pub call_log: Arc<Mutex<Vec<String>>>,
}

impl Default for MockKeyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl MockKeyspace {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            scan_order: Vec::new(),
            database: 0,
            info: "# Keyspace\r\n".to_string(),
            fail_values_pipeline: false,
            drop_connection_on_values: false,
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>, key_type: KeyType, value: RawValue) -> Self {
        let key = key.into();
        self.scan_order.push(key.as_bytes().to_vec());
        self.keys.push(MockKey {
            key,
            key_type,
            ttl_ms: -1,
            idle_secs: 0,
            value,
        });
        self
    }

    pub fn with_string(self, key: impl Into<String>, value: &str) -> Self {
        self.with_key(key, KeyType::String, RawValue::Bytes(value.as_bytes().to_vec()))
    }

    /// Set TTL and idle time of the most recently added key
    pub fn with_metadata(mut self, ttl_ms: i64, idle_secs: i64) -> Self {
        if let Some(last) = self.keys.last_mut() {
            last.ttl_ms = ttl_ms;
            last.idle_secs = idle_secs;
        }
        self
    }

    /// Make SCAN return `key` again at this point, as it may during a rehash
    pub fn with_repeated_scan(mut self, key: &str) -> Self {
        self.scan_order.push(key.as_bytes().to_vec());
        self
    }

    /// Make SCAN return a name that is not valid UTF-8
    pub fn with_binary_name(mut self, name: &[u8]) -> Self {
        self.scan_order.push(name.to_vec());
        self
    }

    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn with_failing_values_pipeline(mut self) -> Self {
        self.fail_values_pipeline = true;
        self
    }

    pub fn with_dropped_connection_on_values(mut self) -> Self {
        self.drop_connection_on_values = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.call_log.lock().clone()
    }

    /// Number of logged calls whose command starts with `prefix`
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.call_log
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn log(&self, call: String) {
        self.call_log.lock().push(call);
    }

    fn find(&self, key: &str) -> Option<&MockKey> {
        self.keys.iter().find(|entry| entry.key == key)
    }

    fn value_of(&self, key: &str, key_type: KeyType) -> Result<RawValue> {
        match self.find(key) {
            None => Ok(RawValue::Nil),
            Some(entry) if entry.key_type == key_type => Ok(entry.value.clone()),
            Some(_) => Err(AdminError::Response(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            )),
        }
    }
}

/// Redis glob matching for `*`, `?` and literal characters
pub fn glob_match(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[char], key: &[char]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some('?'), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    matches(&pattern, &key)
}

#[async_trait]
impl Keyspace for MockKeyspace {
    fn database(&self) -> i64 {
        self.database
    }

    async fn scan(&self, pattern: &str, count: usize, limit: usize) -> Result<Vec<Vec<u8>>> {
        self.log(format!("SCAN MATCH {} COUNT {} LIMIT {}", pattern, count, limit));
        Ok(self
            .scan_order
            .iter()
            .filter(|name| glob_match(pattern, &String::from_utf8_lossy(name)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn metadata(&self, keys: &[String]) -> Result<Vec<KeyMetadata>> {
        self.log(format!("METADATA {}", keys.join(" ")));
        Ok(keys
            .iter()
            .map(|key| match self.find(key) {
                Some(entry) => KeyMetadata {
                    key_type: entry.key_type,
                    ttl_ms: entry.ttl_ms,
                    idle_secs: entry.idle_secs,
                },
                None => KeyMetadata {
                    key_type: KeyType::None,
                    ttl_ms: -2,
                    idle_secs: -1,
                },
            })
            .collect())
    }

    async fn values(&self, requests: &[(&str, KeyType)]) -> Result<Vec<RawValue>> {
        let keys: Vec<&str> = requests.iter().map(|(key, _)| *key).collect();
        self.log(format!("VALUES {}", keys.join(" ")));

        if self.drop_connection_on_values {
            return Err(AdminError::Connection("connection reset by peer".to_string()));
        }
        if self.fail_values_pipeline {
            return Err(AdminError::Response(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            ));
        }

        requests
            .iter()
            .map(|(key, key_type)| self.value_of(key, *key_type))
            .collect()
    }

    async fn value(&self, key: &str, key_type: KeyType) -> Result<RawValue> {
        self.log(format!("VALUE {}", key));
        self.value_of(key, key_type)
    }

    async fn keyspace_info(&self) -> Result<String> {
        self.log("INFO keyspace".to_string());
        Ok(self.info.clone())
    }
}
