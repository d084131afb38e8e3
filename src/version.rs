#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Too few version numbers in string {0}")]
    TooFewNumbers(String),

    #[error("Too many version numbers in string {0}")]
    TooManyNumbers(String),

    #[error("Failed to parse version number from string {0}")]
    NumberParseError(String)
}

/// Dotted version carried by the game servers (`appVersion`, `dataVersion`,
/// `assetVersion`). Between one and four numeric segments; missing segments
/// compare as zero.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u16
}

impl Version {
    #[inline]
    pub fn new(major: u16, minor: u16, patch: u16, build: u16) -> Self {
        Self {
            major,
            minor,
            patch,
            build
        }
    }
}

impl std::str::FromStr for Version {
    type Err = Error;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        let numbers = version.split('.').collect::<Vec<_>>();

        if numbers.len() > 4 {
            return Err(Error::TooManyNumbers(version.to_string()));
        }

        if numbers[0].is_empty() {
            return Err(Error::TooFewNumbers(version.to_string()));
        }

        let mut segments = [0u16; 4];

        for (i, number) in numbers.into_iter().enumerate() {
            let Ok(number) = number.parse::<u16>() else {
                return Err(Error::NumberParseError(number.to_string()));
            };

            segments[i] = number;
        }

        Ok(Self {
            major: segments[0],
            minor: segments[1],
            patch: segments[2],
            build: segments[3]
        })
    }
}

impl std::fmt::Display for Version {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

/// Strict `new > current` under semantic ordering.
pub fn is_newer(new: &str, current: &str) -> Result<bool, Error> {
    let new = new.parse::<Version>()?;
    let current = current.parse::<Version>()?;

    Ok(new > current)
}
