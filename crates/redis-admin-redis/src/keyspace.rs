//! Read access to one Redis keyspace
//!
//! `Keyspace` is the seam between paging logic and the wire: scanning, the
//! pipelined metadata and value round trips, single-key fallback fetches and
//! the keyspace statistics used for approximate counts.

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager, ConnectionManagerConfig, MultiplexedConnection};
use redis::sentinel::SentinelClient;
use redis::{AsyncConnectionConfig, ErrorKind, RedisFuture};
use redis_admin_core::{AdminError, KeyType, RawValue, Result};
use std::time::Duration;
use tokio::sync::Mutex;

/// Reconnect attempts a direct connection makes before giving up
const CONNECT_RETRIES: usize = 2;

/// Replies to `TYPE`, `PTTL` and `OBJECT IDLETIME` for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMetadata {
    pub key_type: KeyType,
    /// Remaining time to live in milliseconds (-1 no expiry, -2 missing)
    pub ttl_ms: i64,
    /// Seconds since last access (-1 when unavailable)
    pub idle_secs: i64,
}

/// Read operations the admin needs from a Redis connection
#[async_trait]
pub trait Keyspace: Send + Sync + std::fmt::Debug {
    /// Logical database index this connection reads from
    fn database(&self) -> i64;

    /// Iterate `SCAN cursor MATCH pattern COUNT count` until `limit` keys are
    /// collected or the cursor wraps around
    async fn scan(&self, pattern: &str, count: usize, limit: usize) -> Result<Vec<Vec<u8>>>;

    /// One pipelined round trip with `TYPE`, `PTTL` and `OBJECT IDLETIME` per
    /// key, returned in key order
    async fn metadata(&self, keys: &[String]) -> Result<Vec<KeyMetadata>>;

    /// One pipelined round trip with each key's value command, returned in
    /// request order. Only fetchable types may be requested.
    async fn values(&self, requests: &[(&str, KeyType)]) -> Result<Vec<RawValue>>;

    /// Fetch a single key's value
    async fn value(&self, key: &str, key_type: KeyType) -> Result<RawValue>;

    /// Raw `INFO keyspace` text
    async fn keyspace_info(&self) -> Result<String>;
}

/// Map a redis-rs error onto the admin error kinds.
///
/// Error replies and replies of the wrong shape are response errors, which
/// the value round trip recovers from; everything else is a connection
/// problem.
pub fn redis_error(err: redis::RedisError) -> AdminError {
    match err.kind() {
        ErrorKind::ResponseError | ErrorKind::ExtensionError | ErrorKind::TypeError => {
            AdminError::Response(err.to_string())
        }
        ErrorKind::InvalidClientConfig => AdminError::Configuration(err.to_string()),
        _ => AdminError::Connection(err.to_string()),
    }
}

/// Whether a node handed out by Sentinel should be looked up again after
/// `err`: the link is gone, or the node was demoted to a read-only replica.
pub(crate) fn needs_rediscovery(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_unrecoverable_error() || err.kind() == ErrorKind::ReadOnly
}

fn connect_error(label: &str, err: &dyn std::fmt::Display) -> AdminError {
    let message = err.to_string();
    if message.contains("NOAUTH") || message.contains("Authentication") {
        return AdminError::Connection(format!("Redis authentication required for {}", label));
    }
    AdminError::Connection(format!("Failed to connect to {}: {}", label, message))
}

fn value_cmd(key: &str, key_type: KeyType) -> Result<redis::Cmd> {
    let command = key_type.value_command().ok_or_else(|| {
        AdminError::Other(format!("Values of {} keys are not fetched", key_type))
    })?;

    let mut cmd = redis::cmd(command.name);
    cmd.arg(key);
    for arg in command.args {
        cmd.arg(*arg);
    }
    Ok(cmd)
}

/// Convert a value-command reply into the raw shape for `key_type`
pub fn raw_from_reply(key_type: KeyType, reply: redis::Value) -> Result<RawValue> {
    if reply == redis::Value::Nil {
        return Ok(RawValue::Nil);
    }

    let raw = match key_type {
        KeyType::String => RawValue::Bytes(redis::from_owned_redis_value(reply).map_err(redis_error)?),
        KeyType::List | KeyType::Set => {
            RawValue::Sequence(redis::from_owned_redis_value(reply).map_err(redis_error)?)
        }
        KeyType::Hash | KeyType::Zset => {
            RawValue::Pairs(redis::from_owned_redis_value(reply).map_err(redis_error)?)
        }
        KeyType::Stream | KeyType::None => RawValue::Nil,
    };
    Ok(raw)
}

fn metadata_from_replies(key: &str, replies: &[redis::Value]) -> Result<KeyMetadata> {
    let [key_type, ttl, idle] = replies else {
        return Err(AdminError::Response(format!(
            "expected 3 metadata replies for {:?}, got {}",
            key,
            replies.len()
        )));
    };

    let key_type: String = redis::from_redis_value(key_type).map_err(redis_error)?;
    let ttl_ms: i64 = redis::from_redis_value(ttl).map_err(redis_error)?;
    // nil when the key vanished after TYPE
    let idle_secs: Option<i64> = redis::from_redis_value(idle).map_err(redis_error)?;

    Ok(KeyMetadata {
        key_type: KeyType::from_redis_type(&key_type),
        ttl_ms,
        idle_secs: idle_secs.unwrap_or(-1),
    })
}

/// Split the metadata pipeline's replies into one record per key
pub(crate) fn metadata_from_pipeline(
    keys: &[String],
    replies: &[redis::Value],
) -> Result<Vec<KeyMetadata>> {
    if replies.len() != keys.len() * 3 {
        return Err(AdminError::Response(format!(
            "metadata pipeline returned {} replies for {} keys",
            replies.len(),
            keys.len()
        )));
    }

    keys.iter()
        .zip(replies.chunks(3))
        .map(|(key, chunk)| metadata_from_replies(key, chunk))
        .collect()
}

/// Convert the value pipeline's replies, one per request
pub(crate) fn values_from_pipeline(
    requests: &[(&str, KeyType)],
    replies: Vec<redis::Value>,
) -> Result<Vec<RawValue>> {
    if replies.len() != requests.len() {
        return Err(AdminError::Response(format!(
            "value pipeline returned {} replies for {} keys",
            replies.len(),
            requests.len()
        )));
    }

    requests
        .iter()
        .zip(replies)
        .map(|((_, key_type), reply)| raw_from_reply(*key_type, reply))
        .collect()
}

/// A connection handle for one command or pipeline
#[derive(Clone)]
enum Handle {
    Managed(ConnectionManager),
    Discovered(MultiplexedConnection),
}

impl ConnectionLike for Handle {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a redis::Cmd) -> RedisFuture<'a, redis::Value> {
        match self {
            Handle::Managed(conn) => conn.req_packed_command(cmd),
            Handle::Discovered(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        pipe: &'a redis::Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<redis::Value>> {
        match self {
            Handle::Managed(conn) => conn.req_packed_commands(pipe, offset, count),
            Handle::Discovered(conn) => conn.req_packed_commands(pipe, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Handle::Managed(conn) => conn.get_db(),
            Handle::Discovered(conn) => conn.get_db(),
        }
    }
}

enum Link {
    /// Reconnects to the same address after a dropped connection
    Direct(ConnectionManager),
    /// Asks Sentinel for the current node again once the cached one fails
    Sentinel {
        client: Mutex<SentinelClient>,
        config: AsyncConnectionConfig,
        current: Mutex<Option<MultiplexedConnection>>,
    },
}

/// `Keyspace` over a redis-rs connection that survives reconnects and
/// Sentinel failovers
pub struct RedisKeyspace {
    link: Link,
    database: i64,
    label: String,
}

impl RedisKeyspace {
    /// Connect directly to the server `client` points at and verify the
    /// connection with PING. `label` names it in log lines.
    pub async fn connect(
        client: redis::Client,
        timeout: Duration,
        label: impl Into<String>,
    ) -> Result<Self> {
        let label = label.into();
        let database = client.get_connection_info().redis.db;

        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(timeout)
            .set_response_timeout(timeout)
            .set_number_of_retries(CONNECT_RETRIES);
        let manager = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(|e| connect_error(&label, &e))?;

        let keyspace = Self {
            link: Link::Direct(manager),
            database,
            label,
        };
        keyspace.verify().await?;
        Ok(keyspace)
    }

    /// Connect to the node `client` discovers and verify it with PING
    pub async fn discover(
        client: SentinelClient,
        database: i64,
        timeout: Duration,
        label: impl Into<String>,
    ) -> Result<Self> {
        let config = AsyncConnectionConfig::new()
            .set_connection_timeout(timeout)
            .set_response_timeout(timeout);

        let keyspace = Self {
            link: Link::Sentinel {
                client: Mutex::new(client),
                config,
                current: Mutex::new(None),
            },
            database,
            label: label.into(),
        };
        keyspace.verify().await?;
        Ok(keyspace)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Surfaces authentication problems at connect time instead of on the
    /// first real command
    async fn verify(&self) -> Result<()> {
        let ping: Result<String> = self.query(&redis::cmd("PING")).await;
        match ping {
            Ok(response) => {
                if response != "PONG" {
                    tracing::warn!(connection = %self.label, "unexpected PING response: {}", response);
                }
                tracing::debug!(
                    connection = %self.label,
                    database = self.database,
                    "Redis connection verified with PING"
                );
                Ok(())
            }
            Err(e) => Err(connect_error(&self.label, &e)),
        }
    }

    async fn handle(&self) -> Result<Handle> {
        match &self.link {
            Link::Direct(manager) => Ok(Handle::Managed(manager.clone())),
            Link::Sentinel {
                client,
                config,
                current,
            } => {
                let mut current = current.lock().await;
                if let Some(conn) = current.as_ref() {
                    return Ok(Handle::Discovered(conn.clone()));
                }

                tracing::debug!(connection = %self.label, "asking sentinel for the current node");
                let conn = client
                    .lock()
                    .await
                    .get_async_connection_with_config(config)
                    .await
                    .map_err(redis_error)?;
                *current = Some(conn.clone());
                Ok(Handle::Discovered(conn))
            }
        }
    }

    async fn settle<T>(&self, reply: redis::RedisResult<T>) -> Result<T> {
        let err = match reply {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if let Link::Sentinel { current, .. } = &self.link {
            if needs_rediscovery(&err) {
                tracing::warn!(
                    connection = %self.label,
                    error = %err,
                    "dropping sentinel node, the next command looks it up again"
                );
                current.lock().await.take();
            }
        }
        Err(redis_error(err))
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.handle().await?;
        let reply = cmd.query_async(&mut conn).await;
        self.settle(reply).await
    }

    async fn query_pipeline(&self, pipe: &redis::Pipeline) -> Result<Vec<redis::Value>> {
        let mut conn = self.handle().await?;
        let reply = pipe.query_async(&mut conn).await;
        self.settle(reply).await
    }
}

#[async_trait]
impl Keyspace for RedisKeyspace {
    fn database(&self) -> i64 {
        self.database
    }

    async fn scan(&self, pattern: &str, count: usize, limit: usize) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        if limit == 0 {
            return Ok(keys);
        }

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count.max(1));
            let (next_cursor, batch): (u64, Vec<Vec<u8>>) = self.query(&cmd).await?;

            keys.extend(batch);
            if keys.len() >= limit {
                keys.truncate(limit);
                break;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!(
            connection = %self.label,
            pattern,
            found = keys.len(),
            "scan completed"
        );
        Ok(keys)
    }

    async fn metadata(&self, keys: &[String]) -> Result<Vec<KeyMetadata>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("TYPE").arg(key);
            pipe.cmd("PTTL").arg(key);
            pipe.cmd("OBJECT").arg("IDLETIME").arg(key);
        }

        let replies = self.query_pipeline(&pipe).await?;
        metadata_from_pipeline(keys, &replies)
    }

    async fn values(&self, requests: &[(&str, KeyType)]) -> Result<Vec<RawValue>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for (key, key_type) in requests {
            pipe.add_command(value_cmd(key, *key_type)?);
        }

        let replies = self.query_pipeline(&pipe).await?;
        values_from_pipeline(requests, replies)
    }

    async fn value(&self, key: &str, key_type: KeyType) -> Result<RawValue> {
        let reply: redis::Value = self.query(&value_cmd(key, key_type)?).await?;
        raw_from_reply(key_type, reply)
    }

    async fn keyspace_info(&self) -> Result<String> {
        let mut cmd = redis::cmd("INFO");
        cmd.arg("keyspace");
        self.query(&cmd).await
    }
}

impl std::fmt::Debug for RedisKeyspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = match self.link {
            Link::Direct(_) => "direct",
            Link::Sentinel { .. } => "sentinel",
        };
        f.debug_struct("RedisKeyspace")
            .field("label", &self.label)
            .field("database", &self.database)
            .field("link", &link)
            .finish()
    }
}
