use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Serialize, Deserialize};

use crate::region::Region;

/// Process configuration, read once at startup from a single YAML file.
///
/// The `redis`, `backend` and `gorm` blocks are schema pass-through for the
/// outer service (router, user auth, caching). The core only consumes
/// `proxy`, `jp_sekai_cookie_url`, `git`, `apphash_sources`,
/// `asset_updater_servers` and `servers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy: Option<String>,
    pub jp_sekai_cookie_url: String,
    pub git: GitConfig,
    pub redis: RedisConfig,
    pub backend: BackendConfig,
    pub gorm: GormConfig,
    pub apphash_sources: Vec<AppHashSource>,
    pub asset_updater_servers: Vec<AssetUpdaterInfo>,
    pub servers: HashMap<Region, ServerConfig>
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;

        serde_yaml::from_str(&raw)
            .context("Failed to parse config file")
    }

    /// Outbound proxy, with the empty string treated as unset.
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref().filter(|proxy| !proxy.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub enabled: bool,
    pub username: String,
    pub email: String,
    pub password: String
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: String
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub ssl_cert: String,
    pub ssl_key: String,
    pub log_level: String,
    pub main_log_file: String,
    pub access_log: String,
    pub access_log_path: String,
    pub sekai_user_jwt_signing_key: String,
    pub enable_trust_proxy: bool,
    pub trusted_proxies: Vec<String>,
    pub proxy_header: String
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GormConfig {
    pub enabled: bool,
    pub dialect: String,
    pub dsn: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime: String,
    pub prepare_stmt: bool,
    pub disable_fk_migrate: bool,
    pub logger: GormLoggerConfig,
    pub naming: GormNamingConfig
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GormLoggerConfig {
    pub level: String,
    pub slow_threshold: String,
    pub ignore_record_not_found_error: bool,
    pub colorful: bool
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GormNamingConfig {
    pub table_prefix: String,
    pub singular_table: bool
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppHashSourceKind {
    File,
    Url
}

/// Where the app-hash updater looks for `<REGION>.json` descriptors:
/// either a local directory or an HTTP base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppHashSource {
    #[serde(rename = "type")]
    pub kind: AppHashSourceKind,

    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default)]
    pub url: Option<String>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetUpdaterInfo {
    pub url: String,

    #[serde(default)]
    pub authorization: Option<String>
}

/// Per-region server block under the top-level `servers` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub master_dir: PathBuf,
    pub version_path: PathBuf,
    pub account_dir: PathBuf,
    pub api_url: String,
    pub nuverse_master_data_url: String,
    pub nuverse_structure_file_path: PathBuf,
    pub require_cookies: bool,
    pub headers: HashMap<String, String>,
    pub aes_key_hex: String,
    pub aes_iv_hex: String,
    pub enable_master_updater: bool,
    pub master_updater_cron: String,
    pub enable_app_hash_updater: bool,
    pub app_hash_updater_cron: String
}
