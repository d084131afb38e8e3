use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::region::Family;

#[derive(Debug, Clone, Error)]
pub enum AccountError {
    #[error("account userID must be numeric, got {0:?}")]
    NonNumericUserId(String),

    #[error("msgpack encode failed: {0}")]
    Encode(String)
}

/// Colorful Palette credentials (JP/EN).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpAccount {
    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub device_id: Option<String>,

    pub credential: String
}

/// Nuverse credentials (TW/KR/CN). The user id may be (re)assigned by the
/// server during login and is adopted onto the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvAccount {
    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub device_id: Option<String>,

    pub access_token: String
}

/// One authenticated game account, tagged by protocol family.
#[derive(Debug, Clone)]
pub enum Account {
    ColorfulPalette(CpAccount),
    Nuverse(NvAccount)
}

#[derive(Serialize)]
struct CpLoginPayload<'a> {
    #[serde(rename = "deviceId")]
    device_id: Option<&'a str>,

    credential: &'a str,

    #[serde(rename = "authTriggerType")]
    auth_trigger_type: &'a str
}

#[derive(Serialize)]
struct NvLoginPayload<'a> {
    #[serde(rename = "deviceId")]
    device_id: Option<&'a str>,

    #[serde(rename = "accessToken")]
    access_token: &'a str,

    #[serde(rename = "userID")]
    user_id: i64
}

impl Account {
    /// Parse one account object from an account-dir JSON file. The variant
    /// is chosen by the region's protocol family, not by the file contents.
    pub fn from_json(family: Family, value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        match family {
            Family::ColorfulPalette => serde_json::from_value(value.clone()).map(Self::ColorfulPalette),
            Family::Nuverse => serde_json::from_value(value.clone()).map(Self::Nuverse)
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::ColorfulPalette(account) => &account.user_id,
            Self::Nuverse(account) => &account.user_id
        }
    }

    pub fn set_user_id(&mut self, user_id: String) {
        match self {
            Self::ColorfulPalette(account) => account.user_id = user_id,
            Self::Nuverse(account) => account.user_id = user_id
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::ColorfulPalette(account) => account.device_id.as_deref(),
            Self::Nuverse(account) => account.device_id.as_deref()
        }
    }

    /// Serialize the login payload in its MessagePack wire form.
    pub fn dump(&self) -> Result<Vec<u8>, AccountError> {
        let device_id = self.device_id().filter(|id| !id.is_empty());

        match self {
            Self::ColorfulPalette(account) => {
                rmp_serde::to_vec_named(&CpLoginPayload {
                    device_id,
                    credential: &account.credential,
                    auth_trigger_type: "normal"
                }).map_err(|err| AccountError::Encode(err.to_string()))
            }

            Self::Nuverse(account) => {
                let user_id = account.user_id.parse::<i64>()
                    .map_err(|_| AccountError::NonNumericUserId(account.user_id.clone()))?;

                rmp_serde::to_vec_named(&NvLoginPayload {
                    device_id,
                    access_token: &account.access_token,
                    user_id
                }).map_err(|err| AccountError::Encode(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cp_login_payload() {
        let account = Account::ColorfulPalette(CpAccount {
            user_id: String::from("123"),
            device_id: Some(String::from("device-1")),
            credential: String::from("secret")
        });

        let decoded: serde_json::Value = rmp_serde::from_slice(&account.dump().unwrap()).unwrap();

        assert_eq!(decoded["deviceId"], json!("device-1"));
        assert_eq!(decoded["credential"], json!("secret"));
        assert_eq!(decoded["authTriggerType"], json!("normal"));
    }

    #[test]
    fn cp_empty_device_id_dumps_as_nil() {
        let account = Account::ColorfulPalette(CpAccount {
            user_id: String::new(),
            device_id: Some(String::new()),
            credential: String::from("secret")
        });

        let decoded: serde_json::Value = rmp_serde::from_slice(&account.dump().unwrap()).unwrap();

        assert!(decoded["deviceId"].is_null());
    }

    #[test]
    fn nv_login_payload_carries_numeric_user_id() {
        let account = Account::Nuverse(NvAccount {
            user_id: String::from("9000000001"),
            device_id: None,
            access_token: String::from("token")
        });

        let decoded: serde_json::Value = rmp_serde::from_slice(&account.dump().unwrap()).unwrap();

        assert_eq!(decoded["userID"].as_i64(), Some(9000000001));
        assert_eq!(decoded["accessToken"], json!("token"));
    }

    #[test]
    fn nv_non_numeric_user_id_fails() {
        let account = Account::Nuverse(NvAccount {
            user_id: String::from("not-a-number"),
            device_id: None,
            access_token: String::from("token")
        });

        assert!(matches!(account.dump(), Err(AccountError::NonNumericUserId(_))));
    }

    #[test]
    fn parse_by_family() {
        let raw = json!({
            "userId": "42",
            "credential": "abc"
        });

        assert!(matches!(Account::from_json(Family::ColorfulPalette, &raw), Ok(Account::ColorfulPalette(_))));

        // nuverse accounts need an accessToken, not a credential
        assert!(Account::from_json(Family::Nuverse, &raw).is_err());
    }
}
