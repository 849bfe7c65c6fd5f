//! Firmware Build
//!
//! Runs the external toolchain and collects the resulting image.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::info;

/// File name of the collected image inside the build output directory
pub const FIRMWARE_FILE: &str = "firmware.bin";

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Build command is empty")]
    EmptyCommand,
    #[error("Failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with {code}")]
    Failed { command: String, code: String },
    #[error("Build artifact not found: {0}")]
    ArtifactMissing(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Produces a firmware image
pub trait FirmwareBuilder: Send + Sync {
    /// Build and place the image in `output_dir`, returning its path.
    fn build(&self, output_dir: &Path) -> Result<PathBuf, BuildError>;
}

/// Builds by running a toolchain command (PlatformIO by default)
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    project_dir: PathBuf,
    command: Vec<String>,
    artifact: PathBuf,
}

impl CommandBuilder {
    /// `artifact` is relative to `project_dir`
    pub fn new(project_dir: PathBuf, command: Vec<String>, artifact: PathBuf) -> Self {
        Self {
            project_dir,
            command,
            artifact,
        }
    }

    pub fn platformio(project_dir: PathBuf) -> Self {
        Self::new(
            project_dir,
            vec!["pio".to_string(), "run".to_string()],
            PathBuf::from(".pio/build/esp32dev/firmware.bin"),
        )
    }
}

impl FirmwareBuilder for CommandBuilder {
    fn build(&self, output_dir: &Path) -> Result<PathBuf, BuildError> {
        let (program, args) = self.command.split_first().ok_or(BuildError::EmptyCommand)?;
        let command_line = self.command.join(" ");
        info!(command = %command_line, dir = %self.project_dir.display(), "Building firmware");

        let status = Command::new(program)
            .args(args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| BuildError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        if !status.success() {
            return Err(BuildError::Failed {
                command: command_line,
                code: status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
            });
        }

        let artifact = self.project_dir.join(&self.artifact);
        if !artifact.is_file() {
            return Err(BuildError::ArtifactMissing(artifact));
        }

        fs::create_dir_all(output_dir)?;
        let dest = output_dir.join(FIRMWARE_FILE);
        fs::copy(&artifact, &dest)?;
        Ok(dest)
    }
}
