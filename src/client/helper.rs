use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::ApiError;

const COOKIE_ATTEMPTS: usize = 4;
const COOKIE_TIMEOUT: Duration = Duration::from_secs(10);
const COOKIE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Single-flight fetcher for the JP login cookies. The served cookie is a
/// shared resource: one fetch at a time, the latest value cached until the
/// game server signals expiry.
pub struct CookieHelper {
    url: String,
    proxy: Option<String>,
    cookies: Mutex<String>
}

impl CookieHelper {
    pub fn new(url: impl Into<String>, proxy: Option<String>) -> Self {
        Self {
            url: url.into(),
            proxy,
            cookies: Mutex::new(String::new())
        }
    }

    /// POST the cookie endpoint with the fixed mobile-OS header set and
    /// capture the `Set-Cookie` answer verbatim. Up to 4 attempts with 1 s
    /// backoff; the helper lock is held for the whole fetch.
    pub fn fetch(&self) -> Result<String, ApiError> {
        let mut cookies = self.cookies.lock().unwrap();

        let mut last_err = None;

        for _ in 0..COOKIE_ATTEMPTS {
            let mut builder = reqwest::blocking::Client::builder()
                .timeout(COOKIE_TIMEOUT);

            if let Some(proxy) = &self.proxy {
                builder = builder.proxy(reqwest::Proxy::all(proxy)
                    .map_err(|err| ApiError::Http(err.to_string()))?);
            }

            let client = builder.build()
                .map_err(|err| ApiError::Http(err.to_string()))?;

            let response = client.post(&self.url)
                .header("Accept", "*/*")
                .header("User-Agent", "ProductName/134 CFNetwork/1408.0.4 Darwin/22.5.0")
                .header("Connection", "keep-alive")
                .header("Accept-Language", "zh-CN,zh-Hans;q=0.9")
                .header("Accept-Encoding", "gzip, deflate, br")
                .header("X-Unity-Version", "2022.3.21f1")
                .send();

            match response {
                Ok(response) if response.status().as_u16() == 200 => {
                    let cookie = response.headers()
                        .get(reqwest::header::SET_COOKIE)
                        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                        .unwrap_or_default();

                    *cookies = cookie.clone();

                    return Ok(cookie);
                }

                Ok(_) => last_err = Some(ApiError::Http(String::from("failed to fetch cookies"))),
                Err(err) => last_err = Some(ApiError::Http(err.to_string()))
            }

            std::thread::sleep(COOKIE_RETRY_DELAY);
        }

        Err(last_err.unwrap_or_else(|| ApiError::Http(String::from("failed to fetch cookies"))))
    }
}

/// Version headers carried on every game request, backed by the shared
/// on-disk version record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub app_version: String,
    pub app_hash: String,
    pub data_version: String,
    pub asset_version: String
}

pub struct VersionHelper {
    path: PathBuf,
    state: Mutex<VersionInfo>
}

impl VersionHelper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(VersionInfo::default())
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the version file. Single-flight; the updater rewrites the
    /// file and every client re-reads it through this helper.
    pub fn reload(&self) -> anyhow::Result<VersionInfo> {
        #[derive(Default, Deserialize)]
        #[serde(default, rename_all = "camelCase")]
        struct VersionFile {
            app_version: String,
            app_hash: String,
            data_version: String,
            asset_version: String
        }

        let mut state = self.state.lock().unwrap();

        let raw = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read version file {:?}", self.path))?;

        let file: VersionFile = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse version file {:?}", self.path))?;

        *state = VersionInfo {
            app_version: file.app_version,
            app_hash: file.app_hash,
            data_version: file.data_version,
            asset_version: file.asset_version
        };

        Ok(state.clone())
    }

    pub fn current(&self) -> VersionInfo {
        self.state.lock().unwrap().clone()
    }
}
