use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::client::account::AccountError;
use crate::codec::CodecError;

/// Closed set of HTTP statuses the game servers are known to answer with.
/// Anything else is a hard error (`ApiError::UnknownStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiStatus {
    Ok,
    ClientError,
    SessionError,
    NotFound,
    Conflict,
    GameUpgrade,
    ServerError,
    UnderMaintenance
}

impl ApiStatus {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(Self::Ok),
            400 => Some(Self::ClientError),
            403 => Some(Self::SessionError),
            404 => Some(Self::NotFound),
            409 => Some(Self::Conflict),
            426 => Some(Self::GameUpgrade),
            500 => Some(Self::ServerError),
            503 => Some(Self::UnderMaintenance),
            _ => None
        }
    }

    #[inline]
    pub fn code(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::ClientError => 400,
            Self::SessionError => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::GameUpgrade => 426,
            Self::ServerError => 500,
            Self::UnderMaintenance => 503
        }
    }
}

/// Everything that can go wrong between us and a game server.
///
/// The recovery decision is taken directly from the variant: session and
/// cookie faults are repaired transparently, upgrades depend on the protocol
/// family, maintenance is surfaced without retry.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Account(#[from] AccountError),

    /// Game server rejected our session token (403 on a binary response)
    #[error("Account session error")]
    Session,

    /// JP login cookies expired (403 with a `text/xml` body)
    #[error("Cookie expired.")]
    CookieExpired,

    /// Status 426. Colorful Palette surfaces this to the caller, nuverse
    /// recovers with a re-login
    #[error("UpgradeRequiredError")]
    UpgradeRequired,

    /// Status 503, no retry
    #[error("Game server may under maintenance.")]
    UnderMaintenance,

    /// Caller-supplied deadline ran out, no retry
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid login response: {0}")]
    InvalidLogin(String),

    /// The closed-set 500 answer; retried with backoff
    #[error("Server error {status}: {body}")]
    ServerError {
        status: u16,
        body: String
    },

    /// Status outside the recognized set, or a recognized status in a
    /// context where it cannot be handled. Always a hard error
    #[error("Unknown error: {status}, {body}")]
    UnknownStatus {
        status: u16,
        body: String
    },

    #[error("request error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Unexpected(String)
}

impl ApiError {
    /// Whether the error is worth another attempt inside `call_api`.
    /// Only transport faults and the closed-set server error are; a status
    /// outside the recognized set fails immediately, and recovery
    /// transitions and terminal answers are handled separately.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::ServerError { .. })
    }
}

impl From<std::io::Error> for ApiError {
    #[inline(always)]
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// User-visible failure envelope. The shape is a wire contract and is
/// preserved bit-exact: `{"result":"failed","status":<int>,"message":<str>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedResponse {
    pub result: String,
    pub status: u16,
    pub message: String
}

impl FailedResponse {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            result: String::from("failed"),
            status,
            message: message.into()
        }
    }
}
