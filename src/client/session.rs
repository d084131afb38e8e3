use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder, Response};
use uuid::Uuid;

use crate::codec::{Codec, OrderedMap};
use crate::config::ServerConfig;
use crate::error::{ApiError, ApiStatus};
use crate::region::{Family, Region};

use super::{Account, CookieHelper, Deadline, LoginResponse, VersionHelper};

const MAX_ATTEMPTS: u32 = 4;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Master payloads run to hundreds of megabytes; their fetches get a far
/// wider deadline than interactive calls.
pub(crate) const MASTER_FETCH_TIMEOUT: Duration = Duration::from_secs(600);

const BINARY_CONTENT_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

/// Decoded answer for the statuses whose body is returned to the caller.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: ApiStatus,
    pub body: OrderedMap
}

/// One authenticated session against a game server.
///
/// All outbound API calls are serialized by the API lock, so session-token
/// rotation is strictly ordered: every response's new token is seen by the
/// next call. Headers are only touched under the header lock and are
/// snapshotted per attempt; a token never leaks across clients.
pub struct GameClient {
    region: Region,
    config: ServerConfig,
    account: Mutex<Account>,
    cookie_helper: Option<Arc<CookieHelper>>,
    version_helper: Arc<VersionHelper>,
    codec: Codec,
    session: Client,
    api_lock: Mutex<()>,
    headers: Mutex<HashMap<String, String>>
}

impl GameClient {
    pub fn new(
        region: Region,
        config: ServerConfig,
        account: Account,
        cookie_helper: Option<Arc<CookieHelper>>,
        version_helper: Arc<VersionHelper>,
        proxy: Option<String>
    ) -> Result<Self, ApiError> {
        let codec = Codec::from_hex(&config.aes_key_hex, &config.aes_iv_hex)?;

        let mut builder = Client::builder()
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5));

        if let Some(proxy) = &proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)
                .map_err(|err| ApiError::Http(err.to_string()))?);
        }

        let session = builder.build()
            .map_err(|err| ApiError::Http(err.to_string()))?;

        let headers = config.headers.clone();

        Ok(Self {
            region,
            config,
            account: Mutex::new(account),
            cookie_helper,
            version_helper,
            codec,
            session,
            api_lock: Mutex::new(()),
            headers: Mutex::new(headers)
        })
    }

    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    pub fn user_id(&self) -> String {
        self.account.lock().unwrap().user_id().to_string()
    }

    /// Serializes the whole API surface of this client; the updater takes
    /// it around its own login so a tick never interleaves with user calls.
    pub(crate) fn lock_api(&self) -> MutexGuard<'_, ()> {
        self.api_lock.lock().unwrap()
    }

    /// Fetch cookies and version headers. Does not log in; the owning
    /// manager performs the first login in parallel across clients.
    pub fn init(&self) -> anyhow::Result<()> {
        self.parse_cookies()?;
        self.parse_version()?;

        Ok(())
    }

    /// Refresh the `Cookie` header from the shared helper. JP only; a no-op
    /// everywhere else.
    pub fn parse_cookies(&self) -> Result<(), ApiError> {
        if self.region != Region::Jp {
            return Ok(());
        }

        let Some(helper) = &self.cookie_helper else {
            return Ok(());
        };

        let cookie = helper.fetch()?;

        self.headers.lock().unwrap().insert(String::from("Cookie"), cookie);

        Ok(())
    }

    /// Re-read the shared version file into the version headers.
    pub fn parse_version(&self) -> anyhow::Result<()> {
        let info = self.version_helper.reload()?;

        let mut headers = self.headers.lock().unwrap();

        headers.insert(String::from("X-App-Version"), info.app_version);
        headers.insert(String::from("X-Data-Version"), info.data_version);
        headers.insert(String::from("X-Asset-Version"), info.asset_version);
        headers.insert(String::from("X-App-Hash"), info.app_hash);

        Ok(())
    }

    fn snapshot_headers(&self) -> HashMap<String, String> {
        self.headers.lock().unwrap().clone()
    }

    fn update_session_token(&self, response: &Response) {
        let Some(token) = response.headers().get("X-Session-Token") else {
            tracing::debug!("account #{} no session token in response header", self.user_id());
            return;
        };

        let token = String::from_utf8_lossy(token.as_bytes()).into_owned();

        if !token.is_empty() {
            self.headers.lock().unwrap().insert(String::from("X-Session-Token"), token);

            tracing::debug!("account #{} session token updated", self.user_id());
        }
    }

    fn prepare_request(
        &self,
        method: Method,
        url: &str,
        timeout: Duration,
        body: Option<&[u8]>,
        params: Option<&HashMap<String, String>>
    ) -> RequestBuilder {
        let mut request = self.session.request(method, url).timeout(timeout);

        for (name, value) in self.snapshot_headers() {
            request = request.header(name, value);
        }

        request = request.header("X-Request-Id", Uuid::new_v4().to_string());

        if let Some(params) = params {
            request = request.query(params);
        }

        if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        request
    }

    fn classify_response(&self, status: u16, content_type: &str, body: &[u8]) -> Result<ApiResponse, ApiError> {
        let Some(parsed) = ApiStatus::from_code(status) else {
            return Err(ApiError::UnknownStatus {
                status,
                body: String::from_utf8_lossy(body).into_owned()
            });
        };

        if BINARY_CONTENT_TYPES.contains(&content_type) {
            let unpacked = self.codec.unpack_ordered(body)?;

            return match parsed {
                ApiStatus::Ok |
                ApiStatus::ClientError |
                ApiStatus::NotFound |
                ApiStatus::Conflict => Ok(ApiResponse {
                    status: parsed,
                    body: unpacked
                }),

                ApiStatus::SessionError => Err(ApiError::Session),
                ApiStatus::GameUpgrade => Err(ApiError::UpgradeRequired),
                ApiStatus::UnderMaintenance => Err(ApiError::UnderMaintenance),

                ApiStatus::ServerError => Err(ApiError::ServerError {
                    status,
                    body: serde_json::to_string(&unpacked).unwrap_or_default()
                })
            };
        }

        match parsed {
            ApiStatus::UnderMaintenance => Err(ApiError::UnderMaintenance),

            ApiStatus::ServerError => Err(ApiError::ServerError {
                status,
                body: String::from_utf8_lossy(body).into_owned()
            }),

            ApiStatus::SessionError if content_type == "text/xml" => Err(ApiError::CookieExpired),

            _ => Err(ApiError::UnknownStatus {
                status,
                body: String::from_utf8_lossy(body).into_owned()
            })
        }
    }

    /// The central request state machine. Serialized per client; up to 4
    /// attempts with 1 s backoff on transport and 5xx faults. Recovery
    /// transitions (re-login, cookie refetch) do not consume attempts;
    /// the caller's deadline is what bounds them.
    fn call_api(
        &self,
        deadline: Deadline,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        params: Option<&HashMap<String, String>>
    ) -> Result<ApiResponse, ApiError> {
        let _api = self.api_lock.lock().unwrap();

        let user_id = self.user_id();
        let url = format!("{}/api{}", self.config.api_url, path).replace("{userId}", &user_id);

        tracing::info!("account #{user_id} {method} {path}");

        let mut last_err: Option<ApiError> = None;
        let mut attempt = 0;

        while attempt < MAX_ATTEMPTS {
            attempt += 1;

            if deadline.expired() {
                return Err(ApiError::DeadlineExceeded);
            }

            let request = self.prepare_request(method.clone(), &url, deadline.remaining(), body.as_deref(), params);

            match request.send() {
                Err(err) => {
                    if deadline.expired() {
                        return Err(ApiError::DeadlineExceeded);
                    }

                    if err.is_timeout() {
                        tracing::warn!("account #{user_id} request timed out (attempt {attempt}), retrying...");
                    } else {
                        tracing::error!("request error (attempt {attempt}): server={}, err={err}", self.region.tag());
                    }

                    last_err = Some(ApiError::Http(err.to_string()));
                }

                Ok(response) => {
                    self.update_session_token(&response);

                    let status = response.status().as_u16();

                    let content_type = response.headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default()
                        .to_ascii_lowercase();

                    let bytes = match response.bytes() {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            last_err = Some(ApiError::Http(err.to_string()));

                            if attempt < MAX_ATTEMPTS {
                                std::thread::sleep(RETRY_DELAY);
                            }

                            continue;
                        }
                    };

                    match self.classify_response(status, &content_type, &bytes) {
                        Ok(response) => return Ok(response),

                        Err(ApiError::Session) => {
                            tracing::warn!("account #{user_id} session expired, re-logging in...");

                            self.login()?;

                            attempt -= 1;
                            continue;
                        }

                        Err(ApiError::CookieExpired) => {
                            tracing::warn!("cookies expired, re-parsing cookies...");

                            self.parse_cookies()?;

                            attempt -= 1;
                            continue;
                        }

                        Err(ApiError::UpgradeRequired) => {
                            if self.region.family() == Family::ColorfulPalette {
                                tracing::warn!("app version might be upgraded");

                                return Err(ApiError::UpgradeRequired);
                            }

                            tracing::warn!("{} server detected new data, re-logging in...", self.region.tag());

                            self.login()?;

                            attempt -= 1;
                            continue;
                        }

                        Err(err @ ApiError::UnderMaintenance) => {
                            tracing::warn!("server is under maintenance");

                            return Err(err);
                        }

                        Err(err) if err.is_retryable() => {
                            tracing::warn!("server error {status} on attempt {attempt}");

                            last_err = Some(err);
                        }

                        Err(err) => return Err(err)
                    }
                }
            }

            if attempt < MAX_ATTEMPTS {
                std::thread::sleep(RETRY_DELAY);
            }
        }

        Err(last_err.unwrap_or_else(|| ApiError::Http(String::from("request failed after retries"))))
    }

    pub fn get(&self, deadline: Deadline, path: &str, params: Option<&HashMap<String, String>>) -> Result<ApiResponse, ApiError> {
        self.call_api(deadline, Method::GET, path, None, params)
    }

    pub fn post<T: serde::Serialize + ?Sized>(&self, deadline: Deadline, path: &str, data: &T, params: Option<&HashMap<String, String>>) -> Result<ApiResponse, ApiError> {
        let body = self.codec.pack(data)?;

        self.call_api(deadline, Method::POST, path, Some(body), params)
    }

    pub fn put<T: serde::Serialize + ?Sized>(&self, deadline: Deadline, path: &str, data: &T, params: Option<&HashMap<String, String>>) -> Result<ApiResponse, ApiError> {
        let body = self.codec.pack(data)?;

        self.call_api(deadline, Method::PUT, path, Some(body), params)
    }

    pub fn patch<T: serde::Serialize + ?Sized>(&self, deadline: Deadline, path: &str, data: &T, params: Option<&HashMap<String, String>>) -> Result<ApiResponse, ApiError> {
        let body = self.codec.pack(data)?;

        self.call_api(deadline, Method::PATCH, path, Some(body), params)
    }

    pub fn delete(&self, deadline: Deadline, path: &str, params: Option<&HashMap<String, String>>) -> Result<ApiResponse, ApiError> {
        self.call_api(deadline, Method::DELETE, path, None, params)
    }

    fn login_request(&self) -> (Method, String) {
        let account = self.account.lock().unwrap();

        match &*account {
            Account::ColorfulPalette(cp) if !cp.user_id.is_empty() => (
                Method::PUT,
                format!("{}/api/user/{}/auth?refreshUpdatedResources=False", self.config.api_url, cp.user_id)
            ),

            _ => (Method::POST, format!("{}/api/user/auth", self.config.api_url))
        }
    }

    /// Authenticate this client's account. On success the session token and
    /// version headers are refreshed, and on nuverse regions the
    /// server-assigned user id is adopted onto the account.
    pub fn login(&self) -> Result<LoginResponse, ApiError> {
        let payload = self.account.lock().unwrap().dump()?;

        let (method, url) = self.login_request();

        let body = self.codec.pack_raw(&payload)?;

        let mut request = self.session.request(method, &url).timeout(LOGIN_TIMEOUT);

        for (name, value) in self.snapshot_headers() {
            request = request.header(name, value);
        }

        let response = request
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .body(body)
            .send()
            .map_err(|err| ApiError::Http(err.to_string()))?;

        let status = response.status().as_u16();

        let bytes = response.bytes()
            .map_err(|err| ApiError::Http(err.to_string()))?;

        let Some(parsed) = ApiStatus::from_code(status) else {
            return Err(ApiError::UnknownStatus {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned()
            });
        };

        match parsed {
            ApiStatus::GameUpgrade => {
                let current = self.headers.lock().unwrap().get("X-App-Version").cloned().unwrap_or_default();

                tracing::warn!("Game upgrade required. (Current version: {current})");

                Err(ApiError::UpgradeRequired)
            }

            ApiStatus::UnderMaintenance => Err(ApiError::UnderMaintenance),

            ApiStatus::Ok => {
                let login: LoginResponse = self.codec.unpack(&bytes)?;

                if login.session_token.is_empty() || login.data_version.is_empty() || login.asset_version.is_empty() {
                    return Err(ApiError::InvalidLogin(String::from("missing required fields")));
                }

                if self.region.family() == Family::Nuverse {
                    let user_id = login.user_registration.user_id
                        .as_ref()
                        .map(|id| id.to_decimal())
                        .unwrap_or_default();

                    if user_id.is_empty() {
                        return Err(ApiError::InvalidLogin(String::from("missing user ID")));
                    }

                    self.account.lock().unwrap().set_user_id(user_id);
                }

                {
                    let mut headers = self.headers.lock().unwrap();

                    headers.insert(String::from("X-Session-Token"), login.session_token.clone());
                    headers.insert(String::from("X-Data-Version"), login.data_version.clone());
                    headers.insert(String::from("X-Asset-Version"), login.asset_version.clone());
                }

                tracing::info!("Login successfully, User ID: {}", self.user_id());

                Ok(login)
            }

            _ => {
                match self.codec.unpack::<serde_json::Value>(&bytes) {
                    Ok(decoded) => tracing::warn!("Login failed. Status code: {status}, Decrypted: {decoded:?}"),
                    Err(_) => tracing::warn!("Login failed. Status code: {status}, Raw len={}", bytes.len())
                }

                Err(ApiError::UnknownStatus {
                    status,
                    body: String::from_utf8_lossy(&bytes).into_owned()
                })
            }
        }
    }

    /// Colorful Palette photo passthrough: a direct GET with the current
    /// headers, answered with raw PNG bytes.
    pub fn get_image_cp(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let _api = self.api_lock.lock().unwrap();

        let path = path.trim_start_matches('/');
        let url = format!("{}/image/mysekai-photo/{path}", self.config.api_url);

        let mut request = self.session.get(&url).timeout(Duration::from_secs(*crate::REQUESTS_TIMEOUT));

        for (name, value) in self.snapshot_headers() {
            request = request.header(name, value);
        }

        let response = request.send()
            .map_err(|err| ApiError::Http(err.to_string()))?;

        if response.status().as_u16() != 200 {
            return Err(ApiError::Unexpected(format!("unexpected status {} fetching {url}", response.status().as_u16())));
        }

        response.bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| ApiError::Http(err.to_string()))
    }

    /// Nuverse photo passthrough: the photo rides inside a regular API
    /// answer as a base64 `thumbnail` field.
    pub fn get_image_nv(&self, deadline: Deadline, user_id: &str, index: &str) -> Result<Vec<u8>, ApiError> {
        let path = format!("/user/{user_id}/mysekai/photo/{index}");

        let response = self.get(deadline, &path, None)?;

        let thumbnail = response.body
            .get("thumbnail")
            .and_then(|value| value.as_str())
            .unwrap_or_default();

        if thumbnail.is_empty() {
            return Err(ApiError::Unexpected(String::from("missing thumbnail base64 in response")));
        }

        BASE64.decode(thumbnail)
            .map_err(|err| ApiError::Unexpected(format!("decode thumbnail base64 failed: {err}")))
    }

    /// Download and decrypt the nuverse master-info payload for a CDN
    /// version. Plain CDN fetch; no API headers, no API lock.
    pub(crate) fn fetch_nuverse_master_info(&self, cdn_version: i64) -> Result<OrderedMap, ApiError> {
        let url = format!("{}/master-data-{cdn_version}.info", self.config.nuverse_master_data_url);

        let response = self.session.get(&url)
            .timeout(MASTER_FETCH_TIMEOUT)
            .send()
            .map_err(|err| ApiError::Http(err.to_string()))?;

        let status = response.status().as_u16();

        if !(200..300).contains(&status) {
            return Err(ApiError::Unexpected(format!("non-success status={status}")));
        }

        let bytes = response.bytes()
            .map_err(|err| ApiError::Http(err.to_string()))?;

        Ok(self.codec.unpack_ordered(&bytes)?)
    }

    /// Retire the session: waits out any in-flight call, then drops the
    /// authenticated state so no further request can ride on it. Pooled
    /// connections close when the client itself is dropped.
    pub fn close(&self) -> Result<(), ApiError> {
        let _api = self.api_lock.lock().unwrap();

        self.headers.lock().unwrap().remove("X-Session-Token");

        tracing::debug!("account #{} session closed", self.user_id());

        Ok(())
    }
}
