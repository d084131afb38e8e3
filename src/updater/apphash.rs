//! App version/hash refresh. Sources publish a `<REGION>.json` descriptor
//! (either in a local directory or behind an HTTP base URL); the newest
//! version across all sources is folded into the on-disk version record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::OrderedMap;
use crate::config::{AppHashSource, AppHashSourceKind};
use crate::region::Region;
use crate::version::is_newer;

use super::{get_first_str, get_string, save_json_file};

const SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppInfo {
    pub app_version: String,
    pub app_hash: String
}

pub struct AppHashUpdater {
    sources: Vec<AppHashSource>,
    region: Region,
    version_path: PathBuf,
    client: reqwest::blocking::Client
}

impl AppHashUpdater {
    pub fn new(sources: Vec<AppHashSource>, region: Region, version_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(SOURCE_TIMEOUT)
            .build()?;

        Ok(Self {
            sources,
            region,
            version_path: version_path.into(),
            client
        })
    }

    fn descriptor_name(&self) -> String {
        format!("{}.json", self.region.tag())
    }

    fn parse_app_info(&self, raw: &[u8], origin: &str) -> Option<AppInfo> {
        let map: OrderedMap = match serde_json::from_slice(raw) {
            Ok(map) => map,

            Err(err) => {
                tracing::warn!("[{origin}] unmarshal to map failed: {err}");
                return None;
            }
        };

        let app_version = get_first_str(&map, &["appVersion", "app_version"]);

        if app_version.is_empty() {
            tracing::warn!("[{origin}] missing appVersion");
            return None;
        }

        Some(AppInfo {
            app_version,
            app_hash: get_first_str(&map, &["appHash", "app_hash"])
        })
    }

    fn read_from_file(&self, dir: &Path) -> Option<AppInfo> {
        let path = dir.join(self.descriptor_name());

        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,

            // a source without a descriptor for this region yields nothing
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,

            Err(err) => {
                tracing::warn!("[FILE] read error: {err}");
                return None;
            }
        };

        self.parse_app_info(&raw, "FILE")
    }

    fn read_from_url(&self, base: &str) -> Option<AppInfo> {
        let url = format!("{}/{}", base.trim_end_matches('/'), self.descriptor_name());

        let response = match self.client.get(&url).send() {
            Ok(response) => response,

            Err(err) => {
                tracing::warn!("[URL] request error: {err}");
                return None;
            }
        };

        if !response.status().is_success() {
            return None;
        }

        let raw = response.bytes().ok()?;

        if raw.is_empty() {
            return None;
        }

        self.parse_app_info(&raw, "URL")
    }

    fn read_source(&self, source: &AppHashSource) -> Option<AppInfo> {
        match source.kind {
            AppHashSourceKind::File => source.dir.as_deref().and_then(|dir| self.read_from_file(dir)),
            AppHashSourceKind::Url => source.url.as_deref().and_then(|url| self.read_from_url(url))
        }
    }

    /// Query every source in parallel and keep the maximum app version
    /// under semantic ordering.
    fn latest_remote(&self) -> Option<AppInfo> {
        let results = std::thread::scope(|scope| {
            let handles = self.sources.iter()
                .map(|source| scope.spawn(move || self.read_source(source)))
                .collect::<Vec<_>>();

            handles.into_iter()
                .filter_map(|handle| handle.join().ok().flatten())
                .collect::<Vec<_>>()
        });

        let mut latest: Option<AppInfo> = None;

        for app in results {
            if app.app_version.is_empty() {
                continue;
            }

            match &latest {
                None => latest = Some(app),

                Some(current) => match is_newer(&app.app_version, &current.app_version) {
                    Ok(true) => latest = Some(app),
                    Ok(false) => (),

                    Err(err) => tracing::warn!(
                        "Failed to compare versions: {err} (a={}, b={})",
                        app.app_version,
                        current.app_version
                    )
                }
            }
        }

        latest
    }

    fn current_local(&self) -> Option<AppInfo> {
        let raw = std::fs::read(&self.version_path).ok()?;
        let map: OrderedMap = serde_json::from_slice(&raw).ok()?;

        let app = AppInfo {
            app_version: get_string(&map, "appVersion"),
            app_hash: get_string(&map, "appHash")
        };

        if app.app_version.is_empty() && app.app_hash.is_empty() {
            return None;
        }

        Some(app)
    }

    /// Rewrite `appVersion`/`appHash` in the version record, preserving all
    /// other keys and their order.
    fn save_new_app_hash(&self, app: &AppInfo) -> anyhow::Result<()> {
        let mut map = match std::fs::read(&self.version_path) {
            Ok(raw) if !raw.is_empty() => serde_json::from_slice(&raw).unwrap_or_default(),
            _ => OrderedMap::new()
        };

        map.insert(String::from("appVersion"), app.app_version.clone().into());
        map.insert(String::from("appHash"), app.app_hash.clone().into());

        save_json_file(&self.version_path, &map)
    }

    /// One scheduler tick.
    pub fn check_app_version(&self) {
        let (Some(local), Some(remote)) = (self.current_local(), self.latest_remote()) else {
            tracing::warn!("{} Local or remote version unavailable", self.region.tag());
            return;
        };

        match is_newer(&remote.app_version, &local.app_version) {
            Err(err) => tracing::warn!("Failed to compare versions: {err}"),

            Ok(false) => tracing::info!("{} No new app version found", self.region.tag()),

            Ok(true) => {
                tracing::info!("Found new app version: {}, saving new app hash...", remote.app_version);

                match self.save_new_app_hash(&remote) {
                    Ok(()) => tracing::info!("Saved new app hash"),
                    Err(err) => tracing::warn!("Failed to save new app hash: {err:#}")
                }
            }
        }
    }
}
