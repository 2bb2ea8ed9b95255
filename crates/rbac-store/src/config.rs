//! Adapter configuration sourced from environment variables with an optional
//! YAML override file.
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_GROUPING_PTYPE: &str = "g";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

/// Settings for the grouping synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Grouping type used for principal -> group and group -> role rows.
    pub ptype: String,
    /// When set, grouping rows carry this domain as their third value.
    pub domain: Option<String>,
    /// Serialize passes for the same principal within this process.
    pub serialize_per_principal: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ptype: DEFAULT_GROUPING_PTYPE.to_string(),
            domain: None,
            serialize_per_principal: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub storage: StorageBackend,
    pub database: Option<DatabaseConfig>,
    pub run_migrations: bool,
    pub role_mappings_path: Option<PathBuf>,
    pub sync: SyncConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            database: None,
            run_migrations: true,
            role_mappings_path: None,
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AdapterConfigOverride {
    storage: Option<StorageBackend>,
    database_url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
    run_migrations: Option<bool>,
    role_mappings_path: Option<PathBuf>,
    sync: Option<SyncConfigOverride>,
}

#[derive(Debug, Deserialize)]
struct SyncConfigOverride {
    ptype: Option<String>,
    domain: Option<String>,
    serialize_per_principal: Option<bool>,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self> {
        let storage = match std::env::var("RBAC_STORE_BACKEND") {
            Ok(value) => value.parse().with_context(|| "parse RBAC_STORE_BACKEND")?,
            Err(_) => StorageBackend::Memory,
        };
        let max_connections = parse_env("RBAC_STORE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let acquire_timeout_ms =
            parse_env("RBAC_STORE_ACQUIRE_TIMEOUT_MS", DEFAULT_ACQUIRE_TIMEOUT_MS)?;
        let database = std::env::var("RBAC_STORE_DATABASE_URL")
            .ok()
            .map(|url| DatabaseConfig {
                url,
                max_connections,
                acquire_timeout_ms,
            });
        let run_migrations = parse_env("RBAC_STORE_RUN_MIGRATIONS", true)?;
        let role_mappings_path = std::env::var("RBAC_STORE_ROLE_MAPPINGS")
            .ok()
            .map(PathBuf::from);
        let sync = SyncConfig {
            ptype: std::env::var("RBAC_SYNC_PTYPE")
                .unwrap_or_else(|_| DEFAULT_GROUPING_PTYPE.to_string()),
            domain: std::env::var("RBAC_SYNC_DOMAIN").ok(),
            serialize_per_principal: parse_env("RBAC_SYNC_SERIALIZE", false)?,
        };
        Ok(Self {
            storage,
            database,
            run_migrations,
            role_mappings_path,
            sync,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("RBAC_STORE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read RBAC_STORE_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: AdapterConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse rbac store config yaml")?;
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(url) = override_cfg.database_url {
            let db = self.database.get_or_insert_with(|| DatabaseConfig {
                url: String::new(),
                max_connections: DEFAULT_MAX_CONNECTIONS,
                acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            });
            db.url = url;
        }
        if let Some(db) = self.database.as_mut() {
            if let Some(value) = override_cfg.max_connections {
                db.max_connections = value;
            }
            if let Some(value) = override_cfg.acquire_timeout_ms {
                db.acquire_timeout_ms = value;
            }
        }
        if let Some(value) = override_cfg.run_migrations {
            self.run_migrations = value;
        }
        if let Some(value) = override_cfg.role_mappings_path {
            self.role_mappings_path = Some(value);
        }
        if let Some(sync) = override_cfg.sync {
            if let Some(value) = sync.ptype {
                self.sync.ptype = value;
            }
            if let Some(value) = sync.domain {
                self.sync.domain = Some(value);
            }
            if let Some(value) = sync.serialize_per_principal {
                self.sync.serialize_per_principal = value;
            }
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}
