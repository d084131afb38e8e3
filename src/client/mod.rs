use std::time::{Duration, Instant};

use serde::Deserialize;

pub mod account;
pub mod helper;
pub mod session;
pub mod manager;

pub use account::{Account, AccountError, CpAccount, NvAccount};
pub use helper::{CookieHelper, VersionHelper, VersionInfo};
pub use session::{ApiResponse, GameClient};
pub use manager::RegionManager;

/// Caller-supplied cancellation point. Every request checks it before an
/// attempt and an expired deadline is surfaced immediately, without retry.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant
}

impl Deadline {
    #[inline]
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout
        }
    }

    /// Default outer deadline the router enforces on user-facing calls.
    #[inline]
    pub fn outer() -> Self {
        Self::after(Duration::from_secs(*crate::REQUESTS_TIMEOUT))
    }

    #[inline]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    #[inline]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

/// Decoded body of a successful `/user/auth` answer.
///
/// A login is valid only if `session_token`, `data_version` and
/// `asset_version` are all non-empty; `cdn_version` is only meaningful on
/// nuverse regions and `suite_master_split_path` only on Colorful Palette.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginResponse {
    pub session_token: String,
    pub data_version: String,
    pub asset_version: String,
    pub asset_hash: String,
    pub suite_master_split_path: Option<Vec<String>>,
    pub cdn_version: i64,
    pub user_registration: UserRegistration
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRegistration {
    #[serde(default, rename = "userId")]
    pub user_id: Option<UserIdValue>
}

/// The server reports the registered user id in whatever numeric or string
/// shape it likes. It is always adopted as a decimal string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserIdValue {
    Text(String),
    Signed(i64),
    Unsigned(u64),
    Float(f64)
}

impl UserIdValue {
    pub fn to_decimal(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Signed(value) => value.to_string(),
            Self::Unsigned(value) => value.to_string(),
            Self::Float(value) => (*value as i64).to_string()
        }
    }
}
