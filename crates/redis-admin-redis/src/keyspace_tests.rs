//! Tests for reply parsing and error mapping on the wire layer

use super::keyspace::*;
use redis::{ErrorKind, RedisError, Value};
use redis_admin_core::{AdminError, KeyType, RawValue};

fn bulk(s: &str) -> Value {
    Value::BulkString(s.as_bytes().to_vec())
}

fn bytes(items: &[&str]) -> Vec<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

fn pairs(items: &[(&str, &str)]) -> Vec<(Vec<u8>, Vec<u8>)> {
    items
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_error_replies_are_response_errors() {
        let wrongtype = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
        ));
        assert!(matches!(redis_error(wrongtype), AdminError::Response(_)));

        let shape = RedisError::from((ErrorKind::TypeError, "Response was of incompatible type"));
        assert!(redis_error(shape).is_response_error());

        let extension = RedisError::from((ErrorKind::ExtensionError, "unknown server error"));
        assert!(redis_error(extension).is_response_error());
    }

    #[test]
    fn test_transport_errors_are_connection_errors() {
        let reset = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        let err = redis_error(reset);
        assert!(matches!(err, AdminError::Connection(_)));
        assert!(!err.is_response_error());

        let config = RedisError::from((ErrorKind::InvalidClientConfig, "bad url"));
        assert!(matches!(redis_error(config), AdminError::Configuration(_)));
    }

    #[test]
    fn test_rediscovery_after_lost_link_or_demotion() {
        let reset = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert!(needs_rediscovery(&reset));

        let demoted = RedisError::from((
            ErrorKind::ReadOnly,
            "READONLY You can't write against a read only replica.",
        ));
        assert!(needs_rediscovery(&demoted));

        let wrongtype = RedisError::from((ErrorKind::ResponseError, "WRONGTYPE"));
        assert!(!needs_rediscovery(&wrongtype));
        let shape = RedisError::from((ErrorKind::TypeError, "incompatible type"));
        assert!(!needs_rediscovery(&shape));
    }
}

#[cfg(test)]
mod metadata_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_metadata_triples_in_key_order() {
        let keys = vec!["greeting".to_string(), "user:1".to_string()];
        let replies = vec![
            Value::SimpleString("string".to_string()),
            Value::Int(1_500),
            Value::Int(7),
            Value::SimpleString("hash".to_string()),
            Value::Int(-1),
            Value::Int(0),
        ];

        let metadata = metadata_from_pipeline(&keys, &replies).unwrap();
        assert_eq!(
            metadata,
            vec![
                KeyMetadata {
                    key_type: KeyType::String,
                    ttl_ms: 1_500,
                    idle_secs: 7,
                },
                KeyMetadata {
                    key_type: KeyType::Hash,
                    ttl_ms: -1,
                    idle_secs: 0,
                },
            ]
        );
    }

    #[test]
    fn test_vanished_key_has_nil_idle_time() {
        let keys = vec!["gone".to_string()];
        let replies = vec![
            Value::SimpleString("none".to_string()),
            Value::Int(-2),
            Value::Nil,
        ];

        let metadata = metadata_from_pipeline(&keys, &replies).unwrap();
        assert_eq!(metadata[0].key_type, KeyType::None);
        assert_eq!(metadata[0].ttl_ms, -2);
        assert_eq!(metadata[0].idle_secs, -1);
    }

    #[test]
    fn test_reply_count_mismatch() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let replies = vec![
            Value::SimpleString("string".to_string()),
            Value::Int(-1),
            Value::Int(0),
        ];

        let err = metadata_from_pipeline(&keys, &replies).unwrap_err();
        assert!(matches!(err, AdminError::Response(_)));
    }

    #[test]
    fn test_malformed_ttl_is_a_response_error() {
        let keys = vec!["a".to_string()];
        let replies = vec![
            Value::SimpleString("string".to_string()),
            Value::SimpleString("soon".to_string()),
            Value::Int(0),
        ];

        assert!(metadata_from_pipeline(&keys, &replies)
            .unwrap_err()
            .is_response_error());
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_string_reply() {
        assert_eq!(
            raw_from_reply(KeyType::String, bulk("hello")).unwrap(),
            RawValue::Bytes(b"hello".to_vec())
        );
    }

    #[test]
    fn test_list_and_set_replies() {
        let reply = Value::Array(vec![bulk("a"), bulk("b")]);
        assert_eq!(
            raw_from_reply(KeyType::List, reply.clone()).unwrap(),
            RawValue::Sequence(bytes(&["a", "b"]))
        );
        assert_eq!(
            raw_from_reply(KeyType::Set, reply).unwrap(),
            RawValue::Sequence(bytes(&["a", "b"]))
        );
    }

    #[test]
    fn test_flat_hash_and_zset_replies_become_pairs() {
        let hgetall = Value::Array(vec![bulk("a"), bulk("1"), bulk("b"), bulk("2")]);
        assert_eq!(
            raw_from_reply(KeyType::Hash, hgetall).unwrap(),
            RawValue::Pairs(pairs(&[("a", "1"), ("b", "2")]))
        );

        let withscores = Value::Array(vec![bulk("m1"), bulk("1.5"), bulk("m2"), bulk("2")]);
        assert_eq!(
            raw_from_reply(KeyType::Zset, withscores).unwrap(),
            RawValue::Pairs(pairs(&[("m1", "1.5"), ("m2", "2")]))
        );
    }

    #[test]
    fn test_map_reply_becomes_pairs() {
        let reply = Value::Map(vec![(bulk("field"), bulk("value"))]);
        assert_eq!(
            raw_from_reply(KeyType::Hash, reply).unwrap(),
            RawValue::Pairs(pairs(&[("field", "value")]))
        );
    }

    #[test]
    fn test_nil_reply_for_any_type() {
        for key_type in [KeyType::String, KeyType::List, KeyType::Hash, KeyType::Zset] {
            assert_eq!(raw_from_reply(key_type, Value::Nil).unwrap(), RawValue::Nil);
        }
        assert_eq!(
            raw_from_reply(KeyType::Stream, bulk("ignored")).unwrap(),
            RawValue::Nil
        );
    }

    #[test]
    fn test_wrong_shape_is_a_response_error() {
        let err = raw_from_reply(KeyType::List, Value::Int(3)).unwrap_err();
        assert!(err.is_response_error());
    }

    #[test]
    fn test_value_pipeline_follows_request_order() {
        let requests = [("greeting", KeyType::String), ("queue", KeyType::List)];
        let replies = vec![bulk("hi"), Value::Array(vec![bulk("x")])];

        assert_eq!(
            values_from_pipeline(&requests, replies).unwrap(),
            vec![
                RawValue::Bytes(b"hi".to_vec()),
                RawValue::Sequence(bytes(&["x"]))
            ]
        );
    }

    #[test]
    fn test_value_pipeline_count_mismatch() {
        let requests = [("greeting", KeyType::String), ("queue", KeyType::List)];
        let err = values_from_pipeline(&requests, vec![bulk("hi")]).unwrap_err();
        assert!(matches!(err, AdminError::Response(_)));
    }
}
