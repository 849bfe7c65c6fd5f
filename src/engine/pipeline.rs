//! Release Pipeline
//!
//! Takes a firmware from source to a recorded, published release:
//!
//! `Init → ResolveVersion → CheckDuplicate → Build → Sign → PublishFirmware →
//! PublishSignature → RecordMetadata → Notify → Cleanup → Done`
//!
//! The first failing stage ends the run. Cleanup runs on every exit path.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, info_span, warn};

use crate::engine::builder::{BuildError, FirmwareBuilder};
use crate::engine::database::{DatabaseError, MetadataStore};
use crate::engine::notifier::{Notifier, OtaNotification, OtaUpdateData};
use crate::engine::release::{FirmwareRelease, NewRelease};
use crate::engine::signer::{FirmwareSigner, SigningError};
use crate::engine::storage::{firmware_key, signature_key, ObjectStore, StorageError};
use crate::engine::version::{FirmwareVersion, VersionResolver};
use crate::engine::workspace::BuildWorkspace;

/// File name of the detached signature inside the build workspace
pub const SIGNATURE_FILE: &str = "firmware.sig";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStage {
    Init,
    ResolveVersion,
    CheckDuplicate,
    Build,
    Sign,
    PublishFirmware,
    PublishSignature,
    RecordMetadata,
    Notify,
    Cleanup,
    Done,
}

impl fmt::Display for ReleaseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::ResolveVersion => "resolve-version",
            Self::CheckDuplicate => "check-duplicate",
            Self::Build => "build",
            Self::Sign => "sign",
            Self::PublishFirmware => "publish-firmware",
            Self::PublishSignature => "publish-signature",
            Self::RecordMetadata => "record-metadata",
            Self::Notify => "notify",
            Self::Cleanup => "cleanup",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("Invalid release request: {0}")]
    InvalidRequest(String),
    #[error("Release history unavailable: {source}")]
    History {
        stage: ReleaseStage,
        #[source]
        source: DatabaseError,
    },
    #[error("Version {0} already exists. Choose a new version.")]
    DuplicateVersion(String),
    #[error("Build failed: {0}")]
    Build(#[from] BuildError),
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),
    #[error("Publishing {key} failed: {source}")]
    Publish {
        stage: ReleaseStage,
        key: String,
        #[source]
        source: StorageError,
        /// Blobs left in storage with no release referencing them
        orphaned: Vec<String>,
    },
    #[error("Recording release metadata failed: {source}")]
    MetadataWrite {
        #[source]
        source: DatabaseError,
        orphaned: Vec<String>,
    },
}

impl ReleaseError {
    /// Stage the pipeline was in when it failed
    pub fn stage(&self) -> ReleaseStage {
        match self {
            Self::InvalidRequest(_) => ReleaseStage::Init,
            Self::History { stage, .. } => *stage,
            Self::DuplicateVersion(_) => ReleaseStage::CheckDuplicate,
            Self::Build(_) => ReleaseStage::Build,
            Self::Signing(_) => ReleaseStage::Sign,
            Self::Publish { stage, .. } => *stage,
            Self::MetadataWrite { .. } => ReleaseStage::RecordMetadata,
        }
    }

    /// Blob keys left behind without a release record
    pub fn orphaned(&self) -> &[String] {
        match self {
            Self::Publish { orphaned, .. } | Self::MetadataWrite { orphaned, .. } => orphaned,
            _ => &[],
        }
    }
}

/// Input to a release run
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    /// Explicit version; derived from history when absent
    pub version: Option<String>,
    pub changelog: String,
    pub deployed_by: String,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct ReleaseReport {
    pub release: FirmwareRelease,
    /// Distribution endpoint URL devices download from
    pub download_url: String,
    /// False when the notification failed; the release is recorded regardless
    pub notified: bool,
    pub stages: Vec<ReleaseStage>,
}

/// Settings the pipeline needs beyond its collaborators
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Transient build directory, removed after every run
    pub work_dir: PathBuf,
    /// Base URL of the distribution endpoint
    pub distribution_base_url: String,
    pub notify_topic: Option<String>,
}

pub struct ReleaseOrchestrator {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    builder: Arc<dyn FirmwareBuilder>,
    notifier: Arc<dyn Notifier>,
    signer: FirmwareSigner,
    resolver: VersionResolver,
    settings: PipelineSettings,
}

fn enter(stages: &mut Vec<ReleaseStage>, stage: ReleaseStage) {
    info!(%stage, "Release stage");
    stages.push(stage);
}

impl ReleaseOrchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        builder: Arc<dyn FirmwareBuilder>,
        notifier: Arc<dyn Notifier>,
        signer: FirmwareSigner,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            resolver: VersionResolver::new(metadata.clone()),
            metadata,
            objects,
            builder,
            notifier,
            signer,
            settings,
        }
    }

    /// Run the pipeline once.
    ///
    /// The build workspace is removed before this returns, on success and on
    /// every failure.
    pub fn run(&self, request: ReleaseRequest) -> Result<ReleaseReport, ReleaseError> {
        let span = info_span!("release", deployed_by = %request.deployed_by);
        let _guard = span.enter();
        info!("Starting OTA release");

        let mut stages = Vec::new();
        let mut workspace = BuildWorkspace::new(&self.settings.work_dir);

        let result = self.execute(&request, &mut workspace, &mut stages);

        enter(&mut stages, ReleaseStage::Cleanup);
        if let Err(e) = workspace.cleanup() {
            warn!(path = %workspace.path().display(), "Failed to remove build workspace: {}", e);
        }

        match result {
            Ok(mut report) => {
                enter(&mut stages, ReleaseStage::Done);
                report.stages = stages;
                info!(
                    version = %report.release.version,
                    url = %report.download_url,
                    "Firmware released"
                );
                Ok(report)
            }
            Err(e) => {
                error!(stage = %e.stage(), "Release failed: {}", e);
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        request: &ReleaseRequest,
        workspace: &mut BuildWorkspace,
        stages: &mut Vec<ReleaseStage>,
    ) -> Result<ReleaseReport, ReleaseError> {
        enter(stages, ReleaseStage::Init);
        let changelog = request.changelog.trim();
        if changelog.is_empty() {
            return Err(ReleaseError::InvalidRequest("changelog is required".to_string()));
        }
        if let Some(version) = &request.version {
            version
                .parse::<FirmwareVersion>()
                .map_err(|e| ReleaseError::InvalidRequest(e.to_string()))?;
        }

        let version = match &request.version {
            Some(version) => version.clone(),
            None => {
                enter(stages, ReleaseStage::ResolveVersion);
                let version = self.resolver.next_version().map_err(|source| ReleaseError::History {
                    stage: ReleaseStage::ResolveVersion,
                    source,
                })?;
                info!(%version, "Auto-assigned firmware version");
                version
            }
        };

        enter(stages, ReleaseStage::CheckDuplicate);
        let exists = self.resolver.exists(&version).map_err(|source| ReleaseError::History {
            stage: ReleaseStage::CheckDuplicate,
            source,
        })?;
        if exists {
            return Err(ReleaseError::DuplicateVersion(version));
        }

        enter(stages, ReleaseStage::Build);
        let dir = workspace.dir().map_err(BuildError::Io)?.to_path_buf();
        let firmware_path = self.builder.build(&dir)?;

        enter(stages, ReleaseStage::Sign);
        let artifact = self
            .signer
            .sign_artifact(&firmware_path, &dir.join(SIGNATURE_FILE))?;

        // Blobs are created, never replaced: a recorded release's checksum must keep
        // matching the bytes behind its refs.
        enter(stages, ReleaseStage::PublishFirmware);
        let fw_key = firmware_key(&version);
        let firmware_url = match self.objects.create(&fw_key, &artifact.firmware) {
            Ok(url) => url,
            Err(StorageError::AlreadyExists(key)) => {
                warn!(%version, %key, "Firmware blob already published by another release");
                return Err(ReleaseError::DuplicateVersion(version));
            }
            Err(source) => {
                return Err(ReleaseError::Publish {
                    stage: ReleaseStage::PublishFirmware,
                    key: fw_key,
                    source,
                    orphaned: Vec::new(),
                })
            }
        };
        info!(url = %firmware_url, "Uploaded firmware");

        enter(stages, ReleaseStage::PublishSignature);
        let sig_key = signature_key(&version);
        let signature_url = match self.objects.create(&sig_key, &artifact.signature) {
            Ok(url) => url,
            Err(StorageError::AlreadyExists(key)) => {
                warn!(%version, %key, "Signature blob already published by another release");
                self.discard(&[&fw_key]);
                return Err(ReleaseError::DuplicateVersion(version));
            }
            Err(source) => {
                let orphaned = self.discard(&[&fw_key]);
                return Err(ReleaseError::Publish {
                    stage: ReleaseStage::PublishSignature,
                    key: sig_key,
                    source,
                    orphaned,
                });
            }
        };
        info!(url = %signature_url, "Uploaded signature");

        enter(stages, ReleaseStage::RecordMetadata);
        let new_release = NewRelease {
            version: version.clone(),
            firmware_blob_ref: firmware_url,
            signature_blob_ref: signature_url.clone(),
            checksum: artifact.checksum.clone(),
            changelog: changelog.to_string(),
            deployed_by: request.deployed_by.clone(),
        };
        let release = match self.metadata.insert_release(&new_release) {
            Ok(release) => release,
            Err(DatabaseError::DuplicateVersion(version)) => {
                // Both blobs were created by this run, so nothing recorded points at them
                warn!(%version, "Version was recorded concurrently; withdrawing uploaded blobs");
                self.discard(&[&fw_key, &sig_key]);
                return Err(ReleaseError::DuplicateVersion(version));
            }
            Err(source) => {
                let orphaned = self.discard(&[&fw_key, &sig_key]);
                return Err(ReleaseError::MetadataWrite { source, orphaned });
            }
        };

        enter(stages, ReleaseStage::Notify);
        let download_url = format!(
            "{}/firmware/{}",
            self.settings.distribution_base_url.trim_end_matches('/'),
            version
        );
        let notification = OtaNotification::ota_update(OtaUpdateData {
            version: version.clone(),
            firmware_url: download_url.clone(),
            signature_url,
            checksum: artifact.checksum,
            topic: self.settings.notify_topic.clone(),
        });
        let notified = match self.notifier.notify(&notification) {
            Ok(()) => true,
            Err(e) => {
                warn!(%version, "Notification failed, release stays recorded: {}", e);
                false
            }
        };

        Ok(ReleaseReport {
            release,
            download_url,
            notified,
            stages: Vec::new(),
        })
    }

    /// Delete blobs of an aborted release, returning the keys that remain
    fn discard(&self, keys: &[&str]) -> Vec<String> {
        keys.iter()
            .filter_map(|key| match self.objects.delete(key) {
                Ok(()) => {
                    info!(%key, "Removed blob of aborted release");
                    None
                }
                Err(e) => {
                    warn!(%key, "Failed to remove blob of aborted release: {}", e);
                    Some(key.to_string())
                }
            })
            .collect()
    }
}
