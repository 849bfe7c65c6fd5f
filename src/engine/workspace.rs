//! Scoped build directory
//!
//! The directory is created on first use and removed when the release run
//! ends, whichever way it ends. A directory that already existed is taken over
//! once used and removed along with the build outputs written into it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub struct BuildWorkspace {
    path: PathBuf,
    /// Set once `dir()` handed out the path, whether or not it had to create it
    in_use: bool,
}

impl BuildWorkspace {
    /// Does not touch the filesystem
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            in_use: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory, created on first call if missing
    pub fn dir(&mut self) -> io::Result<&Path> {
        if !self.in_use {
            fs::create_dir_all(&self.path)?;
            self.in_use = true;
        }
        Ok(&self.path)
    }

    /// Remove the directory if `dir()` was ever called, including a directory
    /// that existed beforehand. No-op for a workspace that was never used.
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.in_use {
            return Ok(());
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.in_use = false;
        info!(path = %self.path.display(), "Removed build workspace");
        Ok(())
    }
}

impl Drop for BuildWorkspace {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!(path = %self.path.display(), "Failed to remove build workspace: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_created_lazily() {
        let root = tempdir().unwrap();
        let mut ws = BuildWorkspace::new(root.path().join("firmware"));
        assert!(!ws.path().exists());

        let dir = ws.dir().unwrap().to_path_buf();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_cleanup_removes_contents() {
        let root = tempdir().unwrap();
        let mut ws = BuildWorkspace::new(root.path().join("firmware"));
        fs::write(ws.dir().unwrap().join("firmware.bin"), b"x").unwrap();

        ws.cleanup().unwrap();
        assert!(!root.path().join("firmware").exists());
    }

    #[test]
    fn test_cleanup_without_use_is_noop() {
        let root = tempdir().unwrap();
        let mut ws = BuildWorkspace::new(root.path().join("firmware"));
        ws.cleanup().unwrap();
        ws.cleanup().unwrap();
        assert!(!root.path().join("firmware").exists());
    }

    #[test]
    fn test_unused_workspace_leaves_existing_dir_alone() {
        let root = tempdir().unwrap();
        let existing = root.path().join("firmware");
        fs::create_dir_all(&existing).unwrap();

        drop(BuildWorkspace::new(&existing));
        assert!(existing.exists());
    }

    #[test]
    fn test_used_existing_dir_is_removed() {
        let root = tempdir().unwrap();
        let existing = root.path().join("firmware");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("firmware.bin"), b"stale build").unwrap();

        let mut ws = BuildWorkspace::new(&existing);
        fs::write(ws.dir().unwrap().join("firmware.sig"), b"sig").unwrap();
        ws.cleanup().unwrap();

        assert!(!existing.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = tempdir().unwrap();
        {
            let mut ws = BuildWorkspace::new(root.path().join("firmware"));
            ws.dir().unwrap();
        }
        assert!(!root.path().join("firmware").exists());
    }
}
