//! Connection resolution
//!
//! Every configured server has a read connection (replica if one is
//! configured or discovered) and a write connection (primary). Connections are
//! created on first use and cached for the registry's lifetime. A cached
//! direct connection reconnects after a drop; a cached Sentinel connection
//! asks Sentinel for the current node again after a failure.

use crate::keyspace::{Keyspace, RedisKeyspace};
use redis::sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType};
use redis_admin_core::{
    AdminConfig, AdminError, ConnectionParams, Result, SentinelOptions, ServerSpec,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Which side of a primary/replica split a connection serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Reads, served by a replica when available
    Read,
    /// Writes, always served by the primary
    Write,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Read => "slave",
            Role::Write => "master",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ServerSlot {
    spec: ServerSpec,
    read: OnceCell<Arc<dyn Keyspace>>,
    write: OnceCell<Arc<dyn Keyspace>>,
}

impl ServerSlot {
    fn cell(&self, role: Role) -> &OnceCell<Arc<dyn Keyspace>> {
        match role {
            Role::Read => &self.read,
            Role::Write => &self.write,
        }
    }
}

/// Resolves logical server names to cached connections
pub struct ConnectionRegistry {
    servers: BTreeMap<String, ServerSlot>,
    sentinels: Vec<String>,
    sentinel_options: SentinelOptions,
    socket_timeout: Duration,
}

impl ConnectionRegistry {
    /// Validate the configuration and prepare (but do not open) connections
    pub fn new(config: &AdminConfig) -> Result<Self> {
        config.validate()?;
        let socket_timeout = config.socket_timeout()?;

        let servers = config
            .servers
            .iter()
            .map(|(name, spec)| {
                let slot = ServerSlot {
                    spec: spec.clone(),
                    read: OnceCell::new(),
                    write: OnceCell::new(),
                };
                (name.clone(), slot)
            })
            .collect();

        tracing::debug!(
            servers = config.servers.len(),
            sentinels = config.sentinels.len(),
            "connection registry initialized"
        );

        Ok(Self {
            servers,
            sentinels: config
                .sentinels
                .iter()
                .map(|(host, port)| format!("redis://{}:{}", host, port))
                .collect(),
            sentinel_options: config.sentinel_options.clone(),
            socket_timeout,
        })
    }

    /// Install an already-open connection for `name` and `role`.
    ///
    /// Fails if the server is unknown or the slot is already filled.
    pub fn with_connection(
        self,
        name: &str,
        role: Role,
        connection: Arc<dyn Keyspace>,
    ) -> Result<Self> {
        self.slot(name)?.cell(role).set(connection).map_err(|_| {
            AdminError::Configuration(format!("{} connection for {} is already open", role, name))
        })?;
        Ok(self)
    }

    /// Configured server names, sorted
    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    /// The configuration of a server
    pub fn spec(&self, name: &str) -> Result<&ServerSpec> {
        self.slot(name).map(|slot| &slot.spec)
    }

    /// Connection for reads, preferring a replica
    pub async fn read_connection(&self, name: &str) -> Result<Arc<dyn Keyspace>> {
        self.connection(name, Role::Read).await
    }

    /// Connection to the primary
    pub async fn write_connection(&self, name: &str) -> Result<Arc<dyn Keyspace>> {
        self.connection(name, Role::Write).await
    }

    /// Cached connection for `name` and `role`, created on first use
    pub async fn connection(&self, name: &str, role: Role) -> Result<Arc<dyn Keyspace>> {
        let slot = self.slot(name)?;
        let connection = slot
            .cell(role)
            .get_or_try_init(|| async {
                let keyspace = match &slot.spec.service_name {
                    Some(service) => {
                        let params = slot.spec.sentinel_params(&self.sentinel_options);
                        self.connect_sentinel(name, service, &params, role).await?
                    }
                    None => {
                        let params = match role {
                            Role::Read => slot.spec.read_params(),
                            Role::Write => slot.spec.write_params(),
                        };
                        self.connect_direct(name, params, role).await?
                    }
                };
                Ok::<_, AdminError>(Arc::new(keyspace) as Arc<dyn Keyspace>)
            })
            .await?;

        Ok(connection.clone())
    }

    fn slot(&self, name: &str) -> Result<&ServerSlot> {
        self.servers
            .get(name)
            .ok_or_else(|| AdminError::Configuration(format!("Unknown Redis server: {}", name)))
    }

    #[tracing::instrument(skip(self, params), fields(address = %params.display_target()))]
    async fn connect_direct(
        &self,
        name: &str,
        params: &ConnectionParams,
        role: Role,
    ) -> Result<RedisKeyspace> {
        tracing::debug!("connecting to {} {}", role, name);

        let timeout = params.socket_timeout(self.socket_timeout)?;
        let client = redis::Client::open(params.connection_url().as_str()).map_err(|e| {
            AdminError::Configuration(format!("Invalid connection for server {}: {}", name, e))
        })?;

        RedisKeyspace::connect(client, timeout, format!("{}/{}", name, role)).await
    }

    #[tracing::instrument(skip(self, params), fields(db = params.db))]
    async fn connect_sentinel(
        &self,
        name: &str,
        service: &str,
        params: &ConnectionParams,
        role: Role,
    ) -> Result<RedisKeyspace> {
        tracing::debug!(sentinels = ?self.sentinels, "getting {} for {} from sentinel", role, name);

        let timeout = params.socket_timeout(self.socket_timeout)?;
        let server_type = match role {
            Role::Read => SentinelServerType::Replica,
            Role::Write => SentinelServerType::Master,
        };
        let client = SentinelClient::build(
            self.sentinels.clone(),
            service.to_string(),
            Some(sentinel_node(params)),
            server_type,
        )
        .map_err(|e| {
            AdminError::Configuration(format!("Invalid sentinels for server {}: {}", name, e))
        })?;

        RedisKeyspace::discover(client, params.db, timeout, format!("{}/{}", name, role)).await
    }
}

/// How to reach a node Sentinel hands out for a server
pub(crate) fn sentinel_node(params: &ConnectionParams) -> SentinelNodeConnectionInfo {
    SentinelNodeConnectionInfo {
        tls_mode: params.tls.then_some(redis::TlsMode::Secure),
        redis_connection_info: Some(redis::RedisConnectionInfo {
            db: params.db,
            username: params.username.clone(),
            password: params.password.clone(),
            ..Default::default()
        }),
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("servers", &self.servers.keys().collect::<Vec<_>>())
            .field("sentinels", &self.sentinels)
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}
