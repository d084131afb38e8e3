use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use serde_json::Value;

use crate::config::{AssetUpdaterInfo, ServerConfig};
use crate::error::{ApiError, ApiStatus, FailedResponse};
use crate::region::Region;
use crate::updater::git::GitPusher;

use super::{Account, CookieHelper, Deadline, GameClient, VersionHelper};

const MAX_RETRIES: u32 = 4;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-region pool of authenticated game clients with a fair round-robin
/// dispatcher and region-level fault recovery.
pub struct RegionManager {
    pub(crate) region: Region,
    pub(crate) config: ServerConfig,
    pub(crate) version_helper: Arc<VersionHelper>,
    pub(crate) cookie_helper: Option<Arc<CookieHelper>>,
    pub(crate) clients: Vec<Arc<GameClient>>,
    pub(crate) cursor: Mutex<usize>,
    pub(crate) asset_updater_servers: Vec<AssetUpdaterInfo>,
    pub(crate) git: Option<GitPusher>,
    pub(crate) proxy: Option<String>,
    pub(crate) updater_lock: Mutex<()>
}

impl RegionManager {
    pub fn new(
        region: Region,
        config: ServerConfig,
        asset_updater_servers: Vec<AssetUpdaterInfo>,
        git: Option<GitPusher>,
        proxy: Option<String>,
        jp_cookie_url: &str
    ) -> Self {
        let version_helper = Arc::new(VersionHelper::new(&config.version_path));

        let cookie_helper = (region == Region::Jp)
            .then(|| Arc::new(CookieHelper::new(jp_cookie_url, proxy.clone())));

        Self {
            region,
            config,
            version_helper,
            cookie_helper,
            clients: Vec::new(),
            cursor: Mutex::new(0),
            asset_updater_servers,
            git,
            proxy,
            updater_lock: Mutex::new(())
        }
    }

    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Build a client for every parsed account, then initialize and log in
    /// all of them in parallel. Fails fast on the first error seen.
    pub fn init(&mut self) -> anyhow::Result<()> {
        tracing::info!("{} initializing client manager...", self.region.tag());

        let accounts = self.parse_accounts()?;

        let mut clients = Vec::with_capacity(accounts.len());

        for account in accounts {
            clients.push(Arc::new(GameClient::new(
                self.region,
                self.config.clone(),
                account,
                self.cookie_helper.clone(),
                self.version_helper.clone(),
                self.proxy.clone()
            )?));
        }

        self.clients = clients;

        self.fan_out(|client| {
            client.init().map_err(|err| {
                tracing::error!("Error initializing client: {err:#}");
                err
            })
        })?;

        self.fan_out(|client| {
            client.login()
                .map(drop)
                .map_err(|err| {
                    tracing::error!("Error logging in: {err}");
                    anyhow!(err.to_string())
                })
        })?;

        tracing::info!("{} client manager initialized successfully", self.region.tag());

        Ok(())
    }

    /// Run a task against every client on its own thread, wait for all of
    /// them, and report the first error seen. No partial-success masking.
    pub(crate) fn fan_out(&self, task: impl Fn(&GameClient) -> anyhow::Result<()> + Sync) -> anyhow::Result<()> {
        std::thread::scope(|scope| {
            let task = &task;

            let handles = self.clients.iter()
                .map(|client| scope.spawn(move || task(client)))
                .collect::<Vec<_>>();

            let mut first_error = None;

            for handle in handles {
                let result = handle.join()
                    .unwrap_or_else(|_| Err(anyhow!("client worker panicked")));

                if let Err(err) = result {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }

            match first_error {
                Some(err) => Err(err),
                None => Ok(())
            }
        })
    }

    fn parse_accounts(&self) -> anyhow::Result<Vec<Account>> {
        let mut accounts = Vec::new();

        self.walk_account_dir(&self.config.account_dir, &mut accounts)?;

        if accounts.is_empty() {
            bail!("no accounts parsed from {:?}", self.config.account_dir);
        }

        Ok(accounts)
    }

    fn walk_account_dir(&self, dir: &Path, accounts: &mut Vec<Account>) -> anyhow::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                self.walk_account_dir(&path, accounts)?;
                continue;
            }

            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let raw = match std::fs::read(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::warn!("parseAccounts: read error {path:?}: {err}");
                    continue;
                }
            };

            let parsed: Value = match serde_json::from_slice(&raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!("parseAccounts: json decode error {path:?}: {err}");
                    continue;
                }
            };

            match &parsed {
                Value::Object(_) => accounts.extend(self.parse_account_entry(&parsed, &path, None)),

                Value::Array(items) => for (idx, item) in items.iter().enumerate() {
                    if item.is_object() {
                        accounts.extend(self.parse_account_entry(item, &path, Some(idx)));
                    } else {
                        tracing::warn!("parseAccounts: [{path:?}][{idx}] unexpected array element");
                    }
                }

                _ => tracing::warn!("parseAccounts: unexpected top-level value in {path:?}")
            }
        }

        Ok(())
    }

    fn parse_account_entry(&self, value: &Value, path: &Path, idx: Option<usize>) -> Option<Account> {
        match Account::from_json(self.region.family(), value) {
            Ok(account) => Some(account),

            Err(err) => {
                match idx {
                    Some(idx) => tracing::warn!("parseAccounts: [{path:?}][{idx}] unmarshal error: {err}"),
                    None => tracing::warn!("parseAccounts: unmarshal error {path:?}: {err}")
                }

                None
            }
        }
    }

    /// Fair round-robin pick. Callers must not assume session affinity:
    /// consecutive requests may land on different clients.
    pub(crate) fn next_client(&self) -> Option<Arc<GameClient>> {
        let mut cursor = self.cursor.lock().unwrap();

        if self.clients.is_empty() {
            return None;
        }

        let index = *cursor % self.clients.len();
        *cursor = (index + 1) % self.clients.len();

        Some(self.clients[index].clone())
    }

    /// Refresh JP cookies on every client, in parallel, fail-fast.
    pub fn parse_cookies(&self) -> anyhow::Result<()> {
        if self.region != Region::Jp {
            return Ok(());
        }

        self.fan_out(|client| {
            client.parse_cookies().map_err(|err| {
                tracing::warn!("Error parsing cookies: {err}");
                anyhow!(err.to_string())
            })
        })
    }

    /// Re-read the version file into every client's headers, in parallel,
    /// fail-fast. Run after the updater rewrites the version record.
    pub fn parse_version(&self) -> anyhow::Result<()> {
        self.fan_out(|client| {
            client.parse_version().map_err(|err| {
                tracing::warn!("Error parsing version: {err:#}");
                err
            })
        })
    }

    fn envelope(status: u16, message: impl Into<String>) -> (u16, Value) {
        let body = FailedResponse::new(status, message);

        (status, serde_json::to_value(&body).unwrap_or(Value::Null))
    }

    /// Proxy one GET to the region's game API with region-level recovery:
    /// upgrades re-read the version file, session faults re-parse cookies,
    /// maintenance is surfaced as a 503 envelope immediately.
    pub fn get_game_api(&self, deadline: Deadline, path: &str, params: Option<&HashMap<String, String>>) -> (u16, Value) {
        if self.clients.is_empty() {
            return Self::envelope(500, "No client initialized");
        }

        let mut attempt = 0;

        while attempt < MAX_RETRIES {
            let Some(client) = self.next_client() else {
                return Self::envelope(500, "No client is available, please try again later.");
            };

            match client.get(deadline, path, params) {
                Ok(response) => return match response.status {
                    ApiStatus::Ok => (200, Value::Object(response.body)),

                    // 400/404/409 bodies are passed through as-is
                    status => (status.code(), Value::Object(response.body))
                },

                Err(ApiError::UpgradeRequired) => {
                    tracing::warn!("{} Server upgrade required, re-parsing version...", self.region.tag());

                    if let Err(err) = self.parse_version() {
                        return Self::envelope(503, format!("Failed to parse version after upgrade: {err}"));
                    }
                }

                Err(ApiError::Session | ApiError::CookieExpired) => {
                    tracing::warn!("{} Server cookies expired, re-parsing...", self.region.tag());

                    if let Err(err) = self.parse_cookies() {
                        return Self::envelope(403, format!("Failed to parse cookies: {err}"));
                    }
                }

                Err(ApiError::UnderMaintenance) => {
                    return Self::envelope(503, format!("{} Game server is under maintenance.", self.region.tag()));
                }

                Err(err @ ApiError::DeadlineExceeded) => {
                    return Self::envelope(500, format!("Failed to get response: {err}"));
                }

                Err(err) => {
                    if attempt >= MAX_RETRIES - 1 {
                        return Self::envelope(500, format!("Failed to get response: {err}"));
                    }
                }
            }

            attempt += 1;
            std::thread::sleep(RETRY_DELAY);
        }

        Self::envelope(500, "Max retry attempts reached")
    }

    pub fn get_image_cp(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let Some(client) = self.next_client() else {
            return Err(ApiError::Unexpected(String::from("no client available")));
        };

        client.get_image_cp(path)
    }

    pub fn get_image_nv(&self, user_id: &str, index: &str) -> Result<Vec<u8>, ApiError> {
        let Some(client) = self.next_client() else {
            return Err(ApiError::Unexpected(String::from("no client available")));
        };

        client.get_image_nv(Deadline::outer(), user_id, index)
    }

    /// Close every client in parallel and report the first error seen.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.fan_out(|client| {
            client.close().map_err(|err| {
                tracing::warn!("Error closing client: {err}");
                anyhow!(err.to_string())
            })
        })?;

        tracing::debug!("{} client manager shut down", self.region.tag());

        Ok(())
    }
}
