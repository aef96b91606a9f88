//! Admin configuration
//!
//! The whole configuration surface is one TOML document. Every field has a
//! default, so an empty file describes a single `default` server on
//! `127.0.0.1:6379/0`:
//!
//! ```toml
//! socket_timeout = 0.3
//! crop_size = 150
//! json_key_re = "^json:"
//! base64_key_re = "^b64:"
//! sentinels = [["sentinel-a", 26379], ["sentinel-b", 26379]]
//!
//! [servers.cache]
//! host = "cache.internal"
//! db = 2
//!
//! [servers.sessions]
//! master = { host = "sessions-primary" }
//! slave = { host = "sessions-replica" }
//!
//! [servers.queue]
//! service_name = "queue"
//! meta = { verbose_name = "Job queue" }
//! ```

use crate::{AdminError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Socket timeout used when neither the server nor the Sentinel options set one
pub const DEFAULT_SOCKET_TIMEOUT_SECS: f64 = 0.3;
/// Characters shown in list views before a value is cropped
pub const DEFAULT_CROP_SIZE: usize = 150;
/// Rows per list page
pub const DEFAULT_LIST_PER_PAGE: usize = 100;
/// Name of the JSON codec used when none is configured
pub const DEFAULT_JSON_CODEC: &str = "serde_json";
/// Server configured when the `servers` table is missing
pub const DEFAULT_SERVER_NAME: &str = "default";
/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "REDIS_ADMIN_CONFIG";

/// Complete admin configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Default socket timeout in seconds
    pub socket_timeout: f64,
    /// Maximum characters of a value shown before cropping
    pub crop_size: usize,
    /// Keys matching this pattern get their string values JSON-parsed
    pub json_key_re: String,
    /// Keys matching this pattern get their string values base64-decoded
    pub base64_key_re: String,
    /// Name of the JSON codec (see `json_codec_by_name`)
    pub json_codec: String,
    /// Rows per list page; one extra row is fetched to detect a next page
    pub list_per_page: usize,
    /// Sentinel endpoints as `(host, port)` pairs
    pub sentinels: Vec<(String, u16)>,
    /// Options applied to connections handed out by Sentinel
    pub sentinel_options: SentinelOptions,
    /// Configured servers by logical name. Each gets its own admin binding.
    pub servers: BTreeMap<String, ServerSpec>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        let mut servers = BTreeMap::new();
        servers.insert(DEFAULT_SERVER_NAME.to_string(), ServerSpec::default());

        Self {
            socket_timeout: DEFAULT_SOCKET_TIMEOUT_SECS,
            crop_size: DEFAULT_CROP_SIZE,
            json_key_re: "^$".to_string(),
            base64_key_re: "^$".to_string(),
            json_codec: DEFAULT_JSON_CODEC.to_string(),
            list_per_page: DEFAULT_LIST_PER_PAGE,
            sentinels: Vec::new(),
            sentinel_options: SentinelOptions::default(),
            servers,
        }
    }
}

impl AdminConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: AdminConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading admin configuration");
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Load the configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location yields the default
    /// configuration; a missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(path),
            _ => {
                tracing::debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| AdminError::Other(format!("Failed to write config: {}", e)))
    }

    /// Add or replace a server
    pub fn with_server(mut self, name: impl Into<String>, spec: ServerSpec) -> Self {
        self.servers.insert(name.into(), spec);
        self
    }

    /// Add a Sentinel endpoint
    pub fn with_sentinel(mut self, host: impl Into<String>, port: u16) -> Self {
        self.sentinels.push((host.into(), port));
        self
    }

    /// Set the crop size
    pub fn with_crop_size(mut self, crop_size: usize) -> Self {
        self.crop_size = crop_size;
        self
    }

    /// Set the JSON and base64 key patterns
    pub fn with_key_patterns(mut self, json_key_re: &str, base64_key_re: &str) -> Self {
        self.json_key_re = json_key_re.to_string();
        self.base64_key_re = base64_key_re.to_string();
        self
    }

    /// Look up a server by logical name
    pub fn server(&self, name: &str) -> Result<&ServerSpec> {
        self.servers
            .get(name)
            .ok_or_else(|| AdminError::Configuration(format!("Unknown Redis server: {}", name)))
    }

    /// Default socket timeout as a Duration
    pub fn socket_timeout(&self) -> Result<Duration> {
        timeout_from_secs(self.socket_timeout, "socket_timeout")
    }

    /// Check everything that can be checked without a network round trip
    pub fn validate(&self) -> Result<()> {
        self.socket_timeout()?;

        if self.servers.is_empty() {
            return Err(AdminError::Configuration(
                "At least one Redis server must be configured".to_string(),
            ));
        }
        if self.crop_size == 0 {
            return Err(AdminError::Configuration(
                "crop_size must be greater than 0".to_string(),
            ));
        }
        if self.list_per_page == 0 {
            return Err(AdminError::Configuration(
                "list_per_page must be greater than 0".to_string(),
            ));
        }
        if let Some(timeout) = self.sentinel_options.socket_timeout {
            timeout_from_secs(timeout, "sentinel_options.socket_timeout")?;
        }

        for (name, server) in &self.servers {
            server.validate(name)?;
            if server.service_name.is_some() && self.sentinels.is_empty() {
                return Err(AdminError::Configuration(format!(
                    "Server {} uses Sentinel service {:?} but no sentinels are configured",
                    name,
                    server.service_name.as_deref().unwrap_or_default()
                )));
            }
        }

        Ok(())
    }
}

/// Location of the configuration file: `$REDIS_ADMIN_CONFIG`, else
/// `<config dir>/redis-admin/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|p| p.join("redis-admin").join("config.toml"))
}

fn timeout_from_secs(secs: f64, field: &str) -> Result<Duration> {
    if secs <= 0.0 {
        return Err(AdminError::Configuration(format!(
            "{} must be positive, got {}",
            field, secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| AdminError::Configuration(format!("Invalid {}: {}", field, e)))
}

/// Options for connections discovered through Sentinel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelOptions {
    /// Socket timeout in seconds, defaults to the global socket timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_timeout: Option<f64>,
    /// Database index selected on discovered nodes
    pub db: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Connect to discovered nodes with TLS
    pub tls: bool,
}

/// Parameters for one direct connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Full connection URL; takes precedence over the individual fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    /// Database index
    pub db: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Connect with TLS (`rediss://`)
    pub tls: bool,
    /// Socket timeout in seconds, defaults to the global socket timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_timeout: Option<f64>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            username: None,
            password: None,
            tls: false,
            socket_timeout: None,
        }
    }
}

impl ConnectionParams {
    /// Parameters for `host:port` with everything else defaulted
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parameters taken verbatim from a URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set the database index
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Set credentials
    pub fn with_credentials(mut self, username: Option<&str>, password: &str) -> Self {
        self.username = username.map(str::to_string);
        self.password = Some(password.to_string());
        self
    }

    /// Set the socket timeout in seconds
    pub fn with_socket_timeout(mut self, secs: f64) -> Self {
        self.socket_timeout = Some(secs);
        self
    }

    /// Effective socket timeout given the global default
    pub fn socket_timeout(&self, default: Duration) -> Result<Duration> {
        match self.socket_timeout {
            Some(secs) => timeout_from_secs(secs, "socket_timeout"),
            None => Ok(default),
        }
    }

    /// Build the `redis://` URL for these parameters
    pub fn connection_url(&self) -> String {
        if let Some(url) = self.url.as_ref().filter(|u| !u.is_empty()) {
            return url.clone();
        }

        let host = if self.host.is_empty() {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        let scheme = if self.tls { "rediss" } else { "redis" };
        let username = self.username.as_deref().filter(|s| !s.is_empty());
        let password = self.password.as_deref().filter(|s| !s.is_empty());

        match (username, password) {
            (Some(user), Some(pass)) => format!(
                "{}://{}:{}@{}:{}/{}",
                scheme, user, pass, host, self.port, self.db
            ),
            (None, Some(pass)) => {
                format!("{}://:{}@{}:{}/{}", scheme, pass, host, self.port, self.db)
            }
            _ => format!("{}://{}:{}/{}", scheme, host, self.port, self.db),
        }
    }

    /// Connection target for log lines, without credentials
    pub fn display_target(&self) -> String {
        match &self.url {
            Some(url) if !url.is_empty() => match url.rsplit_once('@') {
                Some((_, rest)) => rest.to_string(),
                None => url.clone(),
            },
            _ => format!("{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Display overrides for a server's admin binding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose_name_plural: Option<String>,
    /// Overrides the global `list_per_page`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_per_page: Option<usize>,
}

/// A named Redis target
///
/// Either a Sentinel service (`service_name`), an explicit `master`/`slave`
/// pair, or a single direct connection used for both reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSpec {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    /// Sentinel service name; when set, nodes are discovered through Sentinel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Connection used for writes when it differs from the top-level one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<ConnectionParams>,
    /// Connection used for reads when it differs from the top-level one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slave: Option<ConnectionParams>,
    pub meta: ServerMeta,
}

impl ServerSpec {
    /// A direct server
    pub fn direct(connection: ConnectionParams) -> Self {
        Self {
            connection,
            ..Self::default()
        }
    }

    /// A server discovered through Sentinel
    pub fn sentinel(service_name: impl Into<String>) -> Self {
        Self {
            service_name: Some(service_name.into()),
            ..Self::default()
        }
    }

    /// A direct server with separate primary and replica connections
    pub fn split(master: ConnectionParams, slave: ConnectionParams) -> Self {
        Self {
            master: Some(master),
            slave: Some(slave),
            ..Self::default()
        }
    }

    /// Set display overrides
    pub fn with_meta(mut self, meta: ServerMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Whether nodes are discovered through Sentinel
    pub fn uses_sentinel(&self) -> bool {
        self.service_name.is_some()
    }

    /// Settings for nodes handed out by Sentinel. The server's own `db`,
    /// credentials, `tls` and `socket_timeout` win over `options`.
    pub fn sentinel_params(&self, options: &SentinelOptions) -> ConnectionParams {
        let own = &self.connection;
        ConnectionParams {
            db: if own.db != 0 { own.db } else { options.db },
            username: own.username.clone().or_else(|| options.username.clone()),
            password: own.password.clone().or_else(|| options.password.clone()),
            tls: own.tls || options.tls,
            socket_timeout: own.socket_timeout.or(options.socket_timeout),
            ..own.clone()
        }
    }

    /// Parameters for read connections (replica if configured)
    pub fn read_params(&self) -> &ConnectionParams {
        self.slave.as_ref().unwrap_or(&self.connection)
    }

    /// Parameters for write connections (master if configured)
    pub fn write_params(&self) -> &ConnectionParams {
        self.master.as_ref().unwrap_or(&self.connection)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(AdminError::Configuration(
                "Server names must not be empty".to_string(),
            ));
        }
        if let Some(service) = &self.service_name {
            if service.is_empty() {
                return Err(AdminError::Configuration(format!(
                    "Server {} has an empty service_name",
                    name
                )));
            }
        }

        for params in [Some(&self.connection), self.master.as_ref(), self.slave.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Some(secs) = params.socket_timeout {
                timeout_from_secs(secs, &format!("servers.{}.socket_timeout", name))?;
            }
        }

        Ok(())
    }
}
