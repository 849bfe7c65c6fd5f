//! Firmware Versioning
//!
//! Derives the next release version and checks it against recorded history.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::engine::database::{DatabaseError, MetadataStore};

/// Version assigned when there is no usable history.
pub const INITIAL_VERSION: &str = "1.0.0";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid firmware version {0:?}: expected major.minor.patch")]
pub struct ParseVersionError(pub String);

/// A `major.minor.patch` firmware version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FirmwareVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Same major/minor, patch + 1
    pub fn next_patch(&self) -> Self {
        Self {
            patch: self.patch + 1,
            ..*self
        }
    }
}

impl FromStr for FirmwareVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(ParseVersionError(s.to_string()));
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            // u32::from_str accepts a leading '+', versions don't
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseVersionError(s.to_string()));
            }
            *slot = part.parse().map_err(|_| ParseVersionError(s.to_string()))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Resolves release versions against the metadata store
#[derive(Clone)]
pub struct VersionResolver {
    store: Arc<dyn MetadataStore>,
}

impl VersionResolver {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Next version after `latest`.
    ///
    /// Missing or malformed history falls back to [`INITIAL_VERSION`]. A malformed
    /// latest version therefore resets numbering, which is logged.
    pub fn resolve_next(latest: Option<&str>) -> String {
        let Some(latest) = latest else {
            return INITIAL_VERSION.to_string();
        };

        match latest.parse::<FirmwareVersion>() {
            Ok(version) => version.next_patch().to_string(),
            Err(e) => {
                warn!(latest, "{}; falling back to {}", e, INITIAL_VERSION);
                INITIAL_VERSION.to_string()
            }
        }
    }

    /// Next version after the most recently recorded release
    pub fn next_version(&self) -> Result<String, DatabaseError> {
        let latest = self.store.latest_version()?;
        Ok(Self::resolve_next(latest.as_deref()))
    }

    /// Whether `version` is already recorded
    pub fn exists(&self, version: &str) -> Result<bool, DatabaseError> {
        self.store.version_exists(version)
    }
}
