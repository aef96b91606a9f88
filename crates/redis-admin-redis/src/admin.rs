//! Admin bindings, one per configured server
//!
//! `AdminSite` is built from the configuration at startup. Each `ServerAdmin`
//! answers the list/count/get calls of a front end by creating a fresh
//! `Queryset` on the server's read connection.

use crate::client::ConnectionRegistry;
use crate::queryset::Queryset;
use chrono::{DateTime, Duration, Utc};
use redis_admin_core::{
    AdminConfig, AdminError, DecoderSettings, KeyRecord, Lookup, Result, ServerSpec,
};
use std::sync::Arc;

/// Columns of the key list, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Key,
    Type,
    ExpiresAt,
    Ttl,
    Idle,
    CroppedValue,
    Json,
    Base64,
}

impl Column {
    /// The list view columns
    pub const LIST_DISPLAY: [Column; 8] = [
        Column::Key,
        Column::Type,
        Column::ExpiresAt,
        Column::Ttl,
        Column::Idle,
        Column::CroppedValue,
        Column::Json,
        Column::Base64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::Key => "key",
            Column::Type => "type",
            Column::ExpiresAt => "expires_at",
            Column::Ttl => "ttl",
            Column::Idle => "idle",
            Column::CroppedValue => "cropped_value",
            Column::Json => "json",
            Column::Base64 => "base64",
        }
    }

    /// Cell text for `record`, with durations taken relative to `now`
    pub fn render(&self, record: &KeyRecord, crop_size: usize, now: DateTime<Utc>) -> String {
        match self {
            Column::Key => record.key.clone(),
            Column::Type => record.key_type.to_string(),
            Column::ExpiresAt => record
                .expires_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            Column::Ttl => record.ttl_at(now).map(format_duration).unwrap_or_default(),
            Column::Idle => record.idle_at(now).map(format_duration).unwrap_or_default(),
            Column::CroppedValue => record.cropped_value(crop_size),
            Column::Json => record.is_json.to_string(),
            Column::Base64 => record.is_base64.to_string(),
        }
    }
}

/// Compact `1d 2h 3m 4s` rendering; negative durations are shown as `0s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (days, rem) = (total / 86_400, total % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, seconds) = (rem / 60, rem % 60);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}

/// Admin binding for one server
#[derive(Debug, Clone)]
pub struct ServerAdmin {
    name: String,
    verbose_name: String,
    verbose_name_plural: String,
    list_per_page: usize,
    registry: Arc<ConnectionRegistry>,
    settings: Arc<DecoderSettings>,
}

impl ServerAdmin {
    pub fn new(
        name: impl Into<String>,
        spec: &ServerSpec,
        default_list_per_page: usize,
        registry: Arc<ConnectionRegistry>,
        settings: Arc<DecoderSettings>,
    ) -> Self {
        let name = name.into();
        let verbose_name = spec.meta.verbose_name.clone().unwrap_or_else(|| name.clone());
        let verbose_name_plural = spec
            .meta
            .verbose_name_plural
            .clone()
            .unwrap_or_else(|| format!("{}s", verbose_name));

        Self {
            name,
            verbose_name,
            verbose_name_plural,
            list_per_page: spec.meta.list_per_page.unwrap_or(default_list_per_page),
            registry,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verbose_name(&self) -> &str {
        &self.verbose_name
    }

    pub fn verbose_name_plural(&self) -> &str {
        &self.verbose_name_plural
    }

    pub fn list_per_page(&self) -> usize {
        self.list_per_page
    }

    pub fn crop_size(&self) -> usize {
        self.settings.crop_size()
    }

    /// Lookup used by the list view's search box
    pub fn search_lookup(&self, term: impl Into<String>) -> Lookup {
        Lookup::contains(term)
    }

    /// A fresh queryset on the read connection. One extra row past the page
    /// size lets a caller tell whether another page exists.
    pub async fn queryset(&self) -> Result<Queryset> {
        let conn = self.registry.read_connection(&self.name).await?;
        Ok(Queryset::new(
            conn,
            self.settings.clone(),
            self.list_per_page + 1,
        ))
    }

    /// Up to `limit` records starting at `offset`
    pub async fn list(
        &self,
        filter: Option<Lookup>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<KeyRecord>> {
        let mut queryset = self.queryset().await?;
        queryset.filter(filter)?;
        queryset.slice(offset, offset.saturating_add(limit), 1)?;
        Ok(queryset.records().await?.to_vec())
    }

    pub async fn count(&self, filter: Option<Lookup>) -> Result<usize> {
        let mut queryset = self.queryset().await?;
        queryset.filter(filter)?;
        queryset.count().await
    }

    /// The one key matching `lookup`
    pub async fn get(&self, lookup: Lookup) -> Result<KeyRecord> {
        let mut queryset = self.queryset().await?;
        queryset.get([lookup]).await
    }
}

/// Every server's admin binding
#[derive(Debug, Clone)]
pub struct AdminSite {
    registry: Arc<ConnectionRegistry>,
    settings: Arc<DecoderSettings>,
    admins: Vec<ServerAdmin>,
}

impl AdminSite {
    /// Validate `config` and build one binding per server. No connection is
    /// opened until a binding is used.
    pub fn from_config(config: &AdminConfig) -> Result<Self> {
        let registry = Arc::new(ConnectionRegistry::new(config)?);
        Self::with_registry(config, registry)
    }

    /// Build the bindings on an existing registry
    pub fn with_registry(config: &AdminConfig, registry: Arc<ConnectionRegistry>) -> Result<Self> {
        let settings = Arc::new(DecoderSettings::from_config(config)?);
        let admins = config
            .servers
            .iter()
            .map(|(name, spec)| {
                ServerAdmin::new(
                    name.as_str(),
                    spec,
                    config.list_per_page,
                    registry.clone(),
                    settings.clone(),
                )
            })
            .collect::<Vec<_>>();

        tracing::debug!(servers = admins.len(), "admin site ready");
        Ok(Self {
            registry,
            settings,
            admins,
        })
    }

    pub fn admins(&self) -> &[ServerAdmin] {
        &self.admins
    }

    pub fn admin(&self, name: &str) -> Result<&ServerAdmin> {
        self.admins
            .iter()
            .find(|admin| admin.name == name)
            .ok_or_else(|| AdminError::Configuration(format!("Unknown Redis server: {}", name)))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &Arc<DecoderSettings> {
        &self.settings
    }
}
