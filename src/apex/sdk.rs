// src/apex/sdk.rs

//! SDK level handling for `min_sdk_version` / `target_sdk_version`

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// API level used for the unreleased "current" codename
pub const FUTURE_API_LEVEL: u32 = 10_000;

/// Oldest platform level packages can still target.
///
/// Packages whose minimum SDK equals this level also get the legacy JSON
/// manifest, because that platform's installer cannot read the binary form.
pub const OLDEST_SUPPORTED_SDK: u32 = 29;

/// A platform SDK level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SdkVersion {
    /// A finalized numeric API level
    Level(u32),
    /// The in-development platform
    #[default]
    Current,
}

impl SdkVersion {
    /// Numeric level used for comparisons
    pub fn api_level(&self) -> u32 {
        match self {
            SdkVersion::Level(level) => *level,
            SdkVersion::Current => FUTURE_API_LEVEL,
        }
    }

    /// Whether this is the oldest level the package format still supports
    pub fn is_oldest_supported(&self) -> bool {
        *self == SdkVersion::Level(OLDEST_SUPPORTED_SDK)
    }
}

impl PartialOrd for SdkVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SdkVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.api_level().cmp(&other.api_level())
    }
}

impl fmt::Display for SdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkVersion::Level(level) => write!(f, "{}", level),
            SdkVersion::Current => write!(f, "current"),
        }
    }
}

impl FromStr for SdkVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("current") {
            return Ok(SdkVersion::Current);
        }

        let level: u32 = s.parse().map_err(|_| {
            Error::config("min_sdk_version", format!("'{}' is not an API level", s))
        })?;

        if level < OLDEST_SUPPORTED_SDK {
            return Err(Error::config(
                "min_sdk_version",
                format!(
                    "{} is older than the oldest supported level {}",
                    level, OLDEST_SUPPORTED_SDK
                ),
            ));
        }

        if level >= FUTURE_API_LEVEL {
            return Ok(SdkVersion::Current);
        }

        Ok(SdkVersion::Level(level))
    }
}
