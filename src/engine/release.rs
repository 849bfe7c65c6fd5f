//! Release records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published firmware release as recorded in the metadata store.
///
/// Created exactly once per successful pipeline run and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareRelease {
    pub version: String,
    pub firmware_blob_ref: String,
    pub signature_blob_ref: String,
    /// Lowercase hex SHA-256 of the unsigned firmware
    pub checksum: String,
    pub changelog: String,
    pub deployed_by: String,
    /// Assigned by the store at insert time
    pub created_at: DateTime<Utc>,
}

/// Release fields supplied by the pipeline; the store assigns `created_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelease {
    pub version: String,
    pub firmware_blob_ref: String,
    pub signature_blob_ref: String,
    pub checksum: String,
    pub changelog: String,
    pub deployed_by: String,
}

impl NewRelease {
    pub fn into_release(self, created_at: DateTime<Utc>) -> FirmwareRelease {
        FirmwareRelease {
            version: self.version,
            firmware_blob_ref: self.firmware_blob_ref,
            signature_blob_ref: self.signature_blob_ref,
            checksum: self.checksum,
            changelog: self.changelog,
            deployed_by: self.deployed_by,
            created_at,
        }
    }
}
