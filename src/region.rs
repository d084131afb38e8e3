use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid server region: {0}")]
pub struct ParseRegionError(String);

/// Game server region. Five regional deployments exist, split across
/// two protocol families (see [`Family`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Jp,
    En,
    Tw,
    Kr,
    Cn
}

/// Protocol family a region speaks.
///
/// Colorful Palette regions use the split-path master fetch and (JP only)
/// cookie-based login. Nuverse regions use a single master-info endpoint,
/// an integer CDN version and the columnar master encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    ColorfulPalette,
    Nuverse
}

impl Region {
    #[inline]
    pub fn list() -> &'static [Region] {
        &[Self::Jp, Self::En, Self::Tw, Self::Kr, Self::Cn]
    }

    #[inline]
    pub fn family(&self) -> Family {
        match self {
            Self::Jp | Self::En => Family::ColorfulPalette,
            Self::Tw | Self::Kr | Self::Cn => Family::Nuverse
        }
    }

    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Jp => "jp",
            Self::En => "en",
            Self::Tw => "tw",
            Self::Kr => "kr",
            Self::Cn => "cn"
        }
    }

    /// Upper-cased region tag used in log lines and user-visible messages.
    #[inline]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Jp => "JP",
            Self::En => "EN",
            Self::Tw => "TW",
            Self::Kr => "KR",
            Self::Cn => "CN"
        }
    }
}

impl std::str::FromStr for Region {
    type Err = ParseRegionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "jp" => Ok(Self::Jp),
            "en" => Ok(Self::En),
            "tw" => Ok(Self::Tw),
            "kr" => Ok(Self::Kr),
            "cn" => Ok(Self::Cn),
            _ => Err(ParseRegionError(value.to_string()))
        }
    }
}

impl std::fmt::Display for Region {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str() {
        assert_eq!("jp".parse(), Ok(Region::Jp));
        assert_eq!("KR".parse(), Ok(Region::Kr));

        assert!("us".parse::<Region>().is_err());
        assert!("".parse::<Region>().is_err());
    }

    #[test]
    fn families() {
        assert_eq!(Region::Jp.family(), Family::ColorfulPalette);
        assert_eq!(Region::En.family(), Family::ColorfulPalette);
        assert_eq!(Region::Tw.family(), Family::Nuverse);
        assert_eq!(Region::Kr.family(), Family::Nuverse);
        assert_eq!(Region::Cn.family(), Family::Nuverse);
    }
}
