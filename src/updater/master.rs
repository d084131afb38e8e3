//! Periodic master-data tick: detect new data/asset versions on login,
//! stream the master payloads, persist them, publish the new revision.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;

use crate::client::GameClient;
use crate::client::manager::RegionManager;
use crate::client::session::MASTER_FETCH_TIMEOUT;
use crate::client::Deadline;
use crate::codec::OrderedMap;
use crate::error::ApiStatus;
use crate::region::{Family, Region};
use crate::version::is_newer;

use super::{get_int, get_string, nuverse, save_json_file};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);
const WEBHOOK_RETRY_DELAY: Duration = Duration::from_secs(60);

/// At most 2 split paths in flight, at most 2 file writes per path.
const CP_PATH_CONCURRENCY: usize = 2;
const CP_FILE_CONCURRENCY: usize = 2;
const NV_FILE_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Serialize)]
struct AssetUpdaterPayload {
    server: Region,

    #[serde(rename = "assetVersion")]
    asset_version: String,

    #[serde(rename = "assetHash")]
    asset_hash: String
}

impl RegionManager {
    /// One updater tick. Ticks for the same region never overlap: the
    /// region updater lock is held for the whole run, HTTP included.
    pub fn check_master_update(&self) {
        let _tick = self.updater_lock.lock().unwrap();

        if let Err(err) = self.run_master_update() {
            tracing::error!("{} Sekai updater failed: {err:#}", self.region.tag());
        }
    }

    fn run_master_update(&self) -> anyhow::Result<()> {
        let mut version_file = self.load_version_file()
            .context("failed to load version file")?;

        let client = self.next_client()
            .context("failed to initialize client, skipped")?;

        let login = {
            let _api = client.lock_api();

            client.login().context("failed to login")?
        };

        let mut require_master = false;
        let mut require_asset = false;
        let mut split_paths = Vec::new();
        let mut cdn_version = 0;

        match self.region.family() {
            Family::ColorfulPalette => {
                let local_data = get_string(&version_file, "dataVersion");
                let local_asset = get_string(&version_file, "assetVersion");

                if is_newer(&login.data_version, &local_data).context("failed to compare data version")? {
                    tracing::warn!("{} Sekai updater found new master data version: {}", self.region.tag(), login.data_version);

                    match &login.suite_master_split_path {
                        Some(paths) => split_paths = paths.clone(),
                        None => tracing::warn!("Sekai updater can not found suiteMasterSplitPath")
                    }

                    require_master = true;
                }

                if is_newer(&login.asset_version, &local_asset).context("failed to compare asset version")? {
                    tracing::warn!("{} Sekai updater found new asset version: {}", self.region.tag(), login.asset_version);

                    require_asset = true;
                }
            }

            Family::Nuverse => {
                cdn_version = login.cdn_version;

                if get_int(&version_file, "cdnVersion") < cdn_version {
                    tracing::warn!("{} Sekai updater found new cdn version: {cdn_version}", self.region.tag());

                    require_master = true;
                    require_asset = true;
                }
            }
        }

        if require_asset {
            self.notify_asset_updaters(&login.asset_version, &login.asset_hash);
        }

        if require_master {
            tracing::info!("{} Sekai updater downloading new master data...", self.region.tag());

            match self.region.family() {
                Family::ColorfulPalette => self.stream_cp_master_data(&client, &split_paths)?,
                Family::Nuverse => self.stream_nuverse_master_data(&client, cdn_version)?
            }

            tracing::info!("{} Sekai updater saved new master data.", self.region.tag());
        }

        if require_master || require_asset {
            version_file.insert(String::from("dataVersion"), Value::String(login.data_version.clone()));
            version_file.insert(String::from("assetVersion"), Value::String(login.asset_version.clone()));
            version_file.insert(String::from("assetHash"), Value::String(login.asset_hash.clone()));

            if self.region.family() == Family::Nuverse {
                version_file.insert(String::from("cdnVersion"), Value::from(cdn_version));
            }

            self.save_version_files(&version_file, &login.data_version)
                .context("failed to save version file")?;
        }

        if require_master {
            self.push_master_repo(&login.data_version)?;
        }

        Ok(())
    }

    fn load_version_file(&self) -> anyhow::Result<OrderedMap> {
        let raw = std::fs::read(&self.config.version_path)?;

        Ok(serde_json::from_slice(&raw)?)
    }

    /// Rewrite the version record atomically (temp + rename) and drop the
    /// immutable `<dataVersion>.json` snapshot next to it. Only called once
    /// every master file of the new revision is durably written.
    fn save_version_files(&self, version: &OrderedMap, data_version: &str) -> anyhow::Result<()> {
        let path = &self.config.version_path;

        let temp = path.with_extension("json.tmp");

        save_json_file(&temp, version)?;
        std::fs::rename(&temp, path)?;

        let snapshot = match path.parent() {
            Some(parent) => parent.join(format!("{data_version}.json")),
            None => std::path::PathBuf::from(format!("{data_version}.json"))
        };

        save_json_file(&snapshot, version)?;

        Ok(())
    }

    /// Fire-and-forget fan-out to every configured asset-updater webhook.
    fn notify_asset_updaters(&self, asset_version: &str, asset_hash: &str) {
        if self.asset_updater_servers.is_empty() {
            return;
        }

        let payload = AssetUpdaterPayload {
            server: self.region,
            asset_version: asset_version.to_string(),
            asset_hash: asset_hash.to_string()
        };

        for info in self.asset_updater_servers.clone() {
            let payload = payload.clone();

            std::thread::spawn(move || call_asset_updater(info, payload));
        }
    }

    fn stream_cp_master_data(&self, client: &Arc<GameClient>, paths: &[String]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config.master_dir)
            .context("failed to create master data directory")?;

        let processed = Mutex::new(HashSet::new());
        let errors = Mutex::new(Vec::new());

        for chunk in paths.chunks(CP_PATH_CONCURRENCY) {
            std::thread::scope(|scope| {
                for raw_path in chunk {
                    if raw_path.is_empty() {
                        continue;
                    }

                    let processed = &processed;
                    let errors = &errors;

                    scope.spawn(move || self.process_cp_master_path(client, raw_path, processed, errors));
                }
            });
        }

        self.report_stream_errors(errors.into_inner().unwrap())
    }

    fn process_cp_master_path(
        &self,
        client: &Arc<GameClient>,
        raw_path: &str,
        processed: &Mutex<HashSet<String>>,
        errors: &Mutex<Vec<String>>
    ) {
        let path = match raw_path.starts_with('/') {
            true => raw_path.to_string(),
            false => format!("/{raw_path}")
        };

        let response = match client.get(Deadline::after(MASTER_FETCH_TIMEOUT), &path, None) {
            Ok(response) => response,

            Err(err) => {
                errors.lock().unwrap().push(format!("failed to get {raw_path}: {err}"));
                return;
            }
        };

        if response.status != ApiStatus::Ok {
            errors.lock().unwrap().push(format!("unexpected status {} for {raw_path}", response.status.code()));
            return;
        }

        self.save_master_entities(response.body, &path, CP_FILE_CONCURRENCY, Some(processed), errors);
    }

    fn stream_nuverse_master_data(&self, client: &Arc<GameClient>, cdn_version: i64) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config.master_dir)
            .context("failed to create master data directory")?;

        let master = client.fetch_nuverse_master_info(cdn_version)
            .context("unpack nuverse master info failed")?;

        let restored = nuverse::restore_master(master, &self.config.nuverse_structure_file_path)?;

        let errors = Mutex::new(Vec::new());

        self.save_master_entities(restored, "master-info", NV_FILE_CONCURRENCY, None, &errors);

        self.report_stream_errors(errors.into_inner().unwrap())
    }

    /// Write one `<entity>.json` per map entry with bounded concurrency.
    /// When a de-dup set is given, the first writer of an entity name wins
    /// and collisions are logged.
    fn save_master_entities(
        &self,
        entities: OrderedMap,
        origin: &str,
        concurrency: usize,
        processed: Option<&Mutex<HashSet<String>>>,
        errors: &Mutex<Vec<String>>
    ) {
        let entries = entities.into_iter().collect::<Vec<_>>();

        for chunk in entries.chunks(concurrency) {
            std::thread::scope(|scope| {
                for (name, value) in chunk {
                    if value.is_null() {
                        tracing::warn!("Key {name} has nil value");
                        continue;
                    }

                    if let Some(processed) = processed {
                        if !processed.lock().unwrap().insert(name.clone()) {
                            tracing::warn!("Duplicate master entity {name} from {origin}");
                            continue;
                        }
                    }

                    scope.spawn(move || {
                        let file_path = self.config.master_dir.join(format!("{name}.json"));

                        if let Err(err) = save_json_file(&file_path, value) {
                            tracing::error!("Failed to save {name} from {origin}: {err:#}");

                            errors.lock().unwrap().push(format!("failed to save {name} from {origin}: {err}"));
                        }
                    });
                }
            });
        }
    }

    fn report_stream_errors(&self, errors: Vec<String>) -> anyhow::Result<()> {
        if errors.is_empty() {
            return Ok(());
        }

        tracing::error!("{} encountered {} errors while processing master data", self.region.tag(), errors.len());

        for err in errors.iter().take(10) {
            tracing::error!("{err}");
        }

        anyhow::bail!("failed to save some master data files: {} errors encountered, first error: {}", errors.len(), errors[0]);
    }

    fn push_master_repo(&self, data_version: &str) -> anyhow::Result<()> {
        let Some(git) = &self.git else {
            tracing::warn!("Sekai updater Git is not configured, skipped pushing to remote repo.");
            return Ok(());
        };

        let repo_root = self.config.master_dir
            .parent()
            .context("master_dir has no parent directory")?;

        git.push_remote(repo_root, data_version)
            .context("failed to push repo")?;

        tracing::info!("{} Sekai updater pushed changes to remote with data version {data_version}", self.region.tag());

        Ok(())
    }
}

/// POST one asset-updater webhook. A 409 means the updater is busy: back
/// off a minute and try again, indefinitely. Any other outcome, success or
/// failure, terminates the call.
fn call_asset_updater(info: crate::config::AssetUpdaterInfo, payload: AssetUpdaterPayload) {
    let client = match reqwest::blocking::Client::builder().timeout(WEBHOOK_TIMEOUT).build() {
        Ok(client) => client,

        Err(err) => {
            tracing::error!("asset updater client error: {err}");
            return;
        }
    };

    loop {
        let mut request = client.post(&info.url)
            .json(&payload)
            .header("User-Agent", format!("Haruki-Sekai-API/{}", crate::VERSION));

        if let Some(token) = info.authorization.as_deref().filter(|token| !token.is_empty()) {
            request = request.bearer_auth(token);
        }

        match request.send() {
            Ok(response) if response.status().as_u16() == 409 => {
                tracing::warn!("asset updater {} is busy, retrying in a minute", info.url);

                std::thread::sleep(WEBHOOK_RETRY_DELAY);
            }

            _ => return
        }
    }
}
