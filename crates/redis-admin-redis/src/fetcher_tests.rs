//! Tests for key paging, value filling and counting

use super::fetcher::*;
use super::mock::MockKeyspace;
use chrono::Duration;
use redis_admin_core::{AdminError, DecoderSettings, KeyRecord, KeyType, RawValue};

fn bytes(items: &[&str]) -> Vec<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

fn pairs(items: &[(&str, &str)]) -> Vec<(Vec<u8>, Vec<u8>)> {
    items
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

fn mixed_keyspace() -> MockKeyspace {
    MockKeyspace::new()
        .with_string("greeting", "hello")
        .with_metadata(1_500, 90)
        .with_key("queue", KeyType::List, RawValue::Sequence(bytes(&["a", "b"])))
        .with_key("tags", KeyType::Set, RawValue::Sequence(bytes(&["y", "x"])))
        .with_key(
            "user:1",
            KeyType::Hash,
            RawValue::Pairs(pairs(&[("a", "1"), ("b", "2")])),
        )
        .with_key(
            "scores",
            KeyType::Zset,
            RawValue::Pairs(pairs(&[("m1", "1.0"), ("m2", "2.0")])),
        )
        .with_key("events", KeyType::Stream, RawValue::Nil)
}

fn settings() -> DecoderSettings {
    DecoderSettings::new("^$", "^$", 150).unwrap()
}

async fn page_with_values(conn: &MockKeyspace) -> Vec<KeyRecord> {
    let mut records = fetch_page(conn, "*", PageWindow::new(0, 100), 100)
        .await
        .unwrap();
    fill_values(conn, &mut records).await.unwrap();
    records
}

#[cfg(test)]
mod fetch_page_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_records_share_one_reference_instant() {
        let conn = MockKeyspace::new()
            .with_string("expiring", "x")
            .with_metadata(1_500, -1)
            .with_string("idle", "y")
            .with_metadata(-1, 90);

        let records = fetch_page(&conn, "*", PageWindow::new(0, 10), 10)
            .await
            .unwrap();

        let expires_at = records[0].expires_at.unwrap();
        let idle_since = records[1].idle_since.unwrap();
        assert_eq!(
            expires_at - Duration::milliseconds(1_500),
            idle_since + Duration::seconds(90)
        );
        assert_eq!(records[0].idle_since, None);
        assert_eq!(records[1].expires_at, None);
    }

    #[tokio::test]
    async fn test_non_positive_ttl_and_idle_are_absent() {
        let conn = MockKeyspace::new()
            .with_string("persistent", "x")
            .with_metadata(-1, 0)
            .with_string("zero", "y")
            .with_metadata(0, -1);

        let records = fetch_page(&conn, "*", PageWindow::new(0, 10), 10)
            .await
            .unwrap();
        for record in &records {
            assert_eq!(record.expires_at, None, "{}", record.key);
            assert_eq!(record.idle_since, None, "{}", record.key);
        }
    }

    #[tokio::test]
    async fn test_metadata_only() {
        let conn = mixed_keyspace();
        let records = fetch_page(&conn, "*", PageWindow::new(0, 100), 100)
            .await
            .unwrap();

        let types: Vec<KeyType> = records.iter().map(|r| r.key_type).collect();
        assert_eq!(
            types,
            vec![
                KeyType::String,
                KeyType::List,
                KeyType::Set,
                KeyType::Hash,
                KeyType::Zset,
                KeyType::Stream
            ]
        );
        assert!(records.iter().all(|r| r.raw_value.is_none()));
        assert_eq!(conn.count_calls("METADATA"), 1);
        assert_eq!(conn.count_calls("VALUES"), 0);
    }

    #[tokio::test]
    async fn test_window_selects_scan_positions() {
        let mut conn = MockKeyspace::new();
        for i in 0..10 {
            conn = conn.with_string(format!("k{}", i), "v");
        }

        let records = fetch_page(&conn, "k*", PageWindow::new(2, 5), 5)
            .await
            .unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["k2", "k3", "k4"]);
        assert_eq!(conn.calls()[0], "SCAN MATCH k* COUNT 5 LIMIT 5");

        let stepped = fetch_page(&conn, "*", PageWindow::with_step(0, 10, 4).unwrap(), 10)
            .await
            .unwrap();
        let keys: Vec<&str> = stepped.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["k0", "k4", "k8"]);
    }

    #[tokio::test]
    async fn test_no_matches_skips_metadata() {
        let conn = mixed_keyspace();
        let records = fetch_page(&conn, "missing:*", PageWindow::new(0, 10), 10)
            .await
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(conn.count_calls("METADATA"), 0);
    }

    #[tokio::test]
    async fn test_repeated_scan_names_do_not_shorten_page() {
        let conn = MockKeyspace::new()
            .with_string("a", "1")
            .with_string("b", "2")
            .with_repeated_scan("a")
            .with_string("c", "3")
            .with_string("d", "4");

        let records = fetch_page(&conn, "*", PageWindow::new(0, 3), 3)
            .await
            .unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(
            conn.calls()[..2],
            [
                "SCAN MATCH * COUNT 3 LIMIT 3".to_string(),
                "SCAN MATCH * COUNT 3 LIMIT 4".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_binary_key_names_are_skipped() {
        let conn = MockKeyspace::new()
            .with_string("a", "1")
            .with_binary_name(&[b'x', 0xff, 0xfe])
            .with_string("b", "2");

        let records = fetch_page(&conn, "*", PageWindow::new(0, 2), 2)
            .await
            .unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(conn.count_calls("METADATA a b"), 1);
    }

    #[tokio::test]
    async fn test_empty_window_does_nothing() {
        let conn = mixed_keyspace();
        let records = fetch_page(&conn, "*", PageWindow::new(3, 3), 10)
            .await
            .unwrap();
        assert!(records.is_empty());
        assert!(conn.calls().is_empty());
    }
}

#[cfg(test)]
mod fill_values_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_values_come_from_one_pipeline() {
        let conn = mixed_keyspace();
        let records = page_with_values(&conn).await;

        assert_eq!(conn.count_calls("VALUES"), 1);
        assert_eq!(conn.count_calls("VALUE "), 0);
        assert_eq!(
            records[0].raw_value,
            Some(RawValue::Bytes(b"hello".to_vec()))
        );
        assert_eq!(
            records[3].raw_value,
            Some(RawValue::Pairs(pairs(&[("a", "1"), ("b", "2")])))
        );
        // streams are listed but never fetched
        assert_eq!(records[5].raw_value, None);
        assert!(!conn.calls()[2].contains("events"));
    }

    #[tokio::test]
    async fn test_response_error_falls_back_to_single_fetches() {
        let pipelined = page_with_values(&mixed_keyspace()).await;

        let failing = mixed_keyspace().with_failing_values_pipeline();
        let fallback = page_with_values(&failing).await;

        let values = |records: &[KeyRecord]| -> Vec<(String, Option<RawValue>)> {
            records
                .iter()
                .map(|r| (r.key.clone(), r.raw_value.clone()))
                .collect()
        };
        assert_eq!(values(&fallback), values(&pipelined));
        assert_eq!(failing.count_calls("VALUES"), 1);
        assert_eq!(failing.count_calls("VALUE "), 5);
    }

    #[tokio::test]
    async fn test_fallback_values_decode_like_pipelined_ones() {
        let settings = settings();

        let mut pipelined = page_with_values(&mixed_keyspace()).await;
        decode_records(&mut pipelined, &settings);

        let mut fallback = page_with_values(&mixed_keyspace().with_failing_values_pipeline()).await;
        decode_records(&mut fallback, &settings);

        let shown = |records: &[KeyRecord]| -> Vec<String> {
            records.iter().map(KeyRecord::display_value).collect()
        };
        assert_eq!(shown(&fallback), shown(&pipelined));
        assert_eq!(pipelined[3].display_value(), r#"{"a":"1","b":"2"}"#);
        assert_eq!(pipelined[4].display_value(), r#"{"m1":"1.0","m2":"2.0"}"#);
    }

    #[tokio::test]
    async fn test_connection_errors_are_not_retried() {
        let conn = mixed_keyspace().with_dropped_connection_on_values();
        let mut records = fetch_page(&conn, "*", PageWindow::new(0, 10), 10)
            .await
            .unwrap();

        let err = fill_values(&conn, &mut records).await.unwrap_err();
        assert!(matches!(err, AdminError::Connection(_)));
        assert_eq!(conn.count_calls("VALUE "), 0);
    }

    #[tokio::test]
    async fn test_fallback_errors_propagate() {
        // TYPE said string, but the key now holds a list
        let mut records = vec![KeyRecord::new("queue", KeyType::String)];
        let conn = MockKeyspace::new()
            .with_key("queue", KeyType::List, RawValue::Sequence(bytes(&["a"])))
            .with_failing_values_pipeline();

        let err = fill_values(&conn, &mut records).await.unwrap_err();
        assert!(err.is_response_error());
    }

    #[tokio::test]
    async fn test_vanished_keys_fill_as_nil() {
        let mut records = vec![KeyRecord::new("gone", KeyType::Hash)];
        let conn = MockKeyspace::new();

        fill_values(&conn, &mut records).await.unwrap();
        assert_eq!(records[0].raw_value, Some(RawValue::Nil));
    }
}

#[cfg(test)]
mod decode_records_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_decode_failure_keeps_raw_value() {
        // a hash whose reply came back as a plain string
        let conn = MockKeyspace::new()
            .with_key("odd", KeyType::Hash, RawValue::Bytes(b"raw".to_vec()))
            .with_string("fine", "ok");
        let mut records = page_with_values(&conn).await;

        decode_records(&mut records, &settings());

        assert_eq!(records[0].decoded_value(), None);
        assert_eq!(records[0].display_value(), "raw");
        assert_eq!(records[1].display_value(), "ok");
    }

    #[tokio::test]
    async fn test_string_flags_follow_key_patterns() {
        let conn = MockKeyspace::new()
            .with_string("b64:greeting", "aGVsbG8=")
            .with_string("json:doc", r#"{"n":1}"#)
            .with_string("plain", "aGVsbG8=");
        let mut records = page_with_values(&conn).await;

        decode_records(&mut records, &DecoderSettings::new("^b64:", "^json:", 150).unwrap());

        assert!(records[0].is_base64);
        assert_eq!(records[0].display_value(), "hello");
        assert!(records[1].is_json);
        assert_eq!(records[1].display_value(), r#"{"n":1}"#);
        assert!(!records[2].is_base64 && !records[2].is_json);
        assert_eq!(records[2].display_value(), "aGVsbG8=");
    }
}

#[cfg(test)]
mod count_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_approximate_count_reads_info() {
        let conn = MockKeyspace::new()
            .with_string("only", "one")
            .with_database(3)
            .with_info("# Keyspace\r\ndb0:keys=5,expires=0,avg_ttl=0\r\ndb3:keys=4211,expires=2,avg_ttl=10\r\n");

        assert_eq!(approximate_count(&conn).await.unwrap(), 4211);
        assert_eq!(conn.count_calls("SCAN"), 0);
    }

    #[tokio::test]
    async fn test_approximate_count_default() {
        let conn = MockKeyspace::new().with_string("only", "one");
        assert_eq!(approximate_count(&conn).await.unwrap(), DEFAULT_KEY_COUNT);
    }

    #[tokio::test]
    async fn test_count_matches_is_capped() {
        let mut conn = MockKeyspace::new();
        for i in 0..50 {
            conn = conn.with_string(format!("user:{}", i), "v");
        }
        conn = conn.with_string("other", "v");

        assert_eq!(count_matches(&conn, "user:*", 10, 10).await.unwrap(), 10);
        assert_eq!(count_matches(&conn, "user:*", 100, 100).await.unwrap(), 50);
        assert_eq!(count_matches(&conn, "oth*", 10, 10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_count_matches_ignores_repeated_names() {
        let conn = MockKeyspace::new()
            .with_string("user:1", "v")
            .with_repeated_scan("user:1")
            .with_string("user:2", "v")
            .with_string("user:3", "v");

        assert_eq!(count_matches(&conn, "user:*", 10, 10).await.unwrap(), 3);
        assert_eq!(count_matches(&conn, "user:*", 2, 2).await.unwrap(), 2);
    }
}
