//! Paging over a keyspace
//!
//! A page costs three steps: a `SCAN` loop for the key names, one pipeline for
//! the metadata of every key, and one pipeline for the values. Counting without
//! a filter reads `INFO keyspace` instead of scanning.

use crate::keyspace::Keyspace;
use chrono::Utc;
use redis_admin_core::{AdminError, DecoderSettings, KeyRecord, KeyType, RawValue, Result};
use std::collections::HashSet;

/// Count reported when `INFO keyspace` has no line for the database
pub const DEFAULT_KEY_COUNT: u64 = 1000;

/// Positions of a page within the scan order: `start..stop` every `step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub start: usize,
    pub stop: usize,
    pub step: usize,
}

impl PageWindow {
    pub fn new(start: usize, stop: usize) -> Self {
        Self {
            start,
            stop,
            step: 1,
        }
    }

    /// A window with an explicit step, which must be positive
    pub fn with_step(start: usize, stop: usize, step: usize) -> Result<Self> {
        if step == 0 {
            return Err(AdminError::Lookup("slice step cannot be zero".to_string()));
        }
        Ok(Self { start, stop, step })
    }

    /// Window of `limit` keys starting at `offset`
    pub fn page(offset: usize, limit: usize) -> Self {
        Self::new(offset, offset.saturating_add(limit))
    }

    /// Most keys the window can select
    pub fn len(&self) -> usize {
        if self.stop <= self.start {
            return 0;
        }
        (self.stop - self.start).div_ceil(self.step)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .take(self.stop)
            .skip(self.start)
            .step_by(self.step)
            .collect()
    }
}

impl std::fmt::Display for PageWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.step == 1 {
            write!(f, "[{}:{}]", self.start, self.stop)
        } else {
            write!(f, "[{}:{}:{}]", self.start, self.stop, self.step)
        }
    }
}

/// Distinct key names in scan order. Names that are not valid UTF-8 cannot
/// be sent back through the metadata and value commands, so they are skipped.
fn unique_keys(raw_keys: Vec<Vec<u8>>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw_keys
        .into_iter()
        .filter_map(|raw| match String::from_utf8(raw) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(
                    key = %String::from_utf8_lossy(e.as_bytes()),
                    "skipping key name that is not valid UTF-8"
                );
                None
            }
        })
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Scan until `wanted` usable keys are collected or the keyspace runs out.
///
/// Repeated and skipped names do not count, so the scan limit grows by the
/// shortfall and the scan runs again.
async fn scan_unique(
    conn: &dyn Keyspace,
    pattern: &str,
    scan_count: usize,
    wanted: usize,
) -> Result<Vec<String>> {
    let mut limit = wanted;
    loop {
        let raw_keys = conn.scan(pattern, scan_count, limit).await?;
        let exhausted = raw_keys.len() < limit;
        let mut keys = unique_keys(raw_keys);
        if exhausted || keys.len() >= wanted {
            keys.truncate(wanted);
            return Ok(keys);
        }

        tracing::debug!(
            pattern,
            limit,
            short = wanted - keys.len(),
            "scan returned repeated names, scanning further"
        );
        limit = limit.saturating_add(wanted - keys.len());
    }
}

/// Scan the keys matching `pattern` inside `window` and build their records
/// from one metadata round trip. Values are not fetched.
///
/// `scan_count` is the `COUNT` hint for every `SCAN` call. SCAN may return a
/// key more than once; duplicates are dropped before windowing and do not
/// shorten the page.
#[tracing::instrument(skip(conn), fields(db = conn.database()))]
pub async fn fetch_page(
    conn: &dyn Keyspace,
    pattern: &str,
    window: PageWindow,
    scan_count: usize,
) -> Result<Vec<KeyRecord>> {
    if window.is_empty() {
        return Ok(Vec::new());
    }

    let keys = window.select(scan_unique(conn, pattern, scan_count, window.stop).await?);
    if keys.is_empty() {
        tracing::info!(pattern, %window, "no keys matched");
        return Ok(Vec::new());
    }

    let metadata = conn.metadata(&keys).await?;
    if metadata.len() != keys.len() {
        return Err(AdminError::Response(format!(
            "got metadata for {} of {} keys",
            metadata.len(),
            keys.len()
        )));
    }

    let now = Utc::now();
    let records: Vec<KeyRecord> = keys
        .into_iter()
        .zip(metadata)
        .map(|(key, meta)| {
            KeyRecord::from_metadata(key, meta.key_type, meta.ttl_ms, meta.idle_secs, now)
        })
        .collect();

    tracing::info!(pattern, %window, found = records.len(), "fetched key page");
    Ok(records)
}

/// Fill in the raw value of every record whose type is fetched.
///
/// All values come from one pipeline. When that pipeline fails on a reply
/// (typically a key that changed type since the metadata round trip), each
/// value is fetched again on its own; errors from that second pass propagate.
#[tracing::instrument(skip_all, fields(db = conn.database(), records = records.len()))]
pub async fn fill_values(conn: &dyn Keyspace, records: &mut [KeyRecord]) -> Result<()> {
    let fetchable: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.key_type.is_fetchable())
        .map(|(idx, _)| idx)
        .collect();
    if fetchable.is_empty() {
        return Ok(());
    }

    let values = {
        let requests: Vec<(&str, KeyType)> = fetchable
            .iter()
            .map(|&idx| (records[idx].key.as_str(), records[idx].key_type))
            .collect();
        conn.values(&requests).await
    };

    match values {
        Ok(values) => {
            for (idx, value) in fetchable.into_iter().zip(values) {
                records[idx].set_raw_value(value);
            }
        }
        Err(e) if e.is_response_error() => {
            tracing::warn!(
                error = %e,
                keys = fetchable.len(),
                "value pipeline failed, fetching keys one by one"
            );
            for idx in fetchable {
                let record = &mut records[idx];
                let value: RawValue = conn.value(&record.key, record.key_type).await?;
                record.set_raw_value(value);
            }
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

/// Decode every record once. A record that fails to decode is logged and
/// keeps its raw value.
pub fn decode_records(records: &mut [KeyRecord], settings: &DecoderSettings) {
    for record in records.iter_mut() {
        if let Err(e) = record.decode(settings).map(|_| ()) {
            tracing::error!(key = %record.key, key_type = %record.key_type, error = %e, "failed to decode value");
        }
    }
}

/// Number of keys matching `pattern`, scanning at most `limit` of them
#[tracing::instrument(skip(conn), fields(db = conn.database()))]
pub async fn count_matches(
    conn: &dyn Keyspace,
    pattern: &str,
    scan_count: usize,
    limit: usize,
) -> Result<usize> {
    Ok(scan_unique(conn, pattern, scan_count, limit).await?.len())
}

/// Keys in the connection's database as reported by `INFO keyspace`, or
/// [`DEFAULT_KEY_COUNT`] when the server does not list the database
pub async fn approximate_count(conn: &dyn Keyspace) -> Result<u64> {
    let info = conn.keyspace_info().await?;
    let db = conn.database();
    Ok(match parse_keyspace_info(&info, db) {
        Some(keys) => keys,
        None => {
            tracing::debug!(db, "database missing from INFO keyspace, using default count");
            DEFAULT_KEY_COUNT
        }
    })
}

/// Extract `keys` for `db<N>` from `INFO keyspace` output such as
/// `db0:keys=12,expires=0,avg_ttl=0`
pub fn parse_keyspace_info(info: &str, db: i64) -> Option<u64> {
    let prefix = format!("db{}", db);
    info.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(name, _)| *name == prefix)
        .and_then(|(_, fields)| {
            fields
                .split(',')
                .filter_map(|field| field.split_once('='))
                .find(|(name, _)| *name == "keys")
                .and_then(|(_, value)| value.trim().parse().ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_len() {
        assert_eq!(PageWindow::new(0, 10).len(), 10);
        assert_eq!(PageWindow::page(20, 5), PageWindow::new(20, 25));
        assert_eq!(PageWindow::with_step(0, 10, 3).unwrap().len(), 4);
        assert!(PageWindow::new(5, 5).is_empty());
        assert!(PageWindow::new(7, 3).is_empty());
        assert!(PageWindow::with_step(0, 10, 0).is_err());
    }

    #[test]
    fn test_window_select() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(PageWindow::new(2, 5).select(items.clone()), vec![2, 3, 4]);
        assert_eq!(
            PageWindow::with_step(1, 8, 3).unwrap().select(items.clone()),
            vec![1, 4, 7]
        );
        assert_eq!(PageWindow::new(8, 20).select(items), vec![8, 9]);
    }

    #[test]
    fn test_unique_keys_preserves_order() {
        let keys = unique_keys(vec![
            b"b".to_vec(),
            b"a".to_vec(),
            b"b".to_vec(),
            vec![b'c', 0xff],
            b"c".to_vec(),
        ]);
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_parse_keyspace_info() {
        let info = "# Keyspace\r\ndb0:keys=1523,expires=3,avg_ttl=0\r\ndb3:keys=7,expires=0,avg_ttl=0\r\n";
        assert_eq!(parse_keyspace_info(info, 0), Some(1523));
        assert_eq!(parse_keyspace_info(info, 3), Some(7));
        assert_eq!(parse_keyspace_info(info, 1), None);
        assert_eq!(parse_keyspace_info("# Keyspace\r\n", 0), None);
    }
}
