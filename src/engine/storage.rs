//! Object Storage
//!
//! Durable blob storage for firmware images and their detached signatures.
//!
//! Layout:
//! - `firmwares/{version}.bin`
//! - `signatures/{version}.sig`

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::engine::range::RangeRequest;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Range not satisfiable: {0}")]
    InvalidRange(String),
    #[error("Object already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Object store key for a firmware image
pub fn firmware_key(version: &str) -> String {
    format!("firmwares/{}.bin", version)
}

/// Object store key for a detached signature
pub fn signature_key(version: &str) -> String {
    format!("signatures/{}.sig", version)
}

/// Content returned by a read, possibly a slice of the full object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    /// Size of the whole object, not of `data`
    pub total_size: u64,
    /// `bytes {first}-{last}/{total}` when a range was honored
    pub content_range: Option<String>,
}

/// Blob storage used by the release pipeline and the distribution endpoint.
pub trait ObjectStore: Send + Sync {
    /// Store a blob, overwriting any existing one, and return its durable locator.
    fn put(&self, key: &str, data: &[u8]) -> Result<String, StorageError>;

    /// Store a blob only if `key` is free. An existing blob is left untouched and
    /// reported as [`StorageError::AlreadyExists`].
    fn create(&self, key: &str, data: &[u8]) -> Result<String, StorageError>;

    /// Read a blob. A range the store does not understand is ignored and the
    /// whole object is returned.
    fn get(&self, key: &str, range: Option<&RangeRequest>) -> Result<StoredObject, StorageError>;

    /// Delete a blob. No-op if the key does not exist.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// ObjectStore backed by the local filesystem.
///
/// Keys map to paths under `root`:
///   key "firmwares/1.0.0.bin" → `{root}/firmwares/1.0.0.bin`
///
/// Locators returned by `put` are `{public_base_url}/{key}`.
pub struct FileObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FileObjectStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: &Path, public_base_url: &str) -> Result<Self, StorageError> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a key to a path under root. Rejects absolute keys and `..`.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let relative = Path::new(key);
        let only_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !only_normal || key.contains('\\') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn locator(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    /// Write `data` next to `path` under a name no other writer uses
    fn write_temp(path: &Path, data: &[u8]) -> Result<PathBuf, StorageError> {
        static NEXT_TEMP: AtomicU64 = AtomicU64::new(0);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension(format!(
            "{}.{}.partial",
            std::process::id(),
            NEXT_TEMP.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp_path, data)?;
        Ok(temp_path)
    }
}

impl ObjectStore for FileObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<String, StorageError> {
        let path = self.resolve(key)?;

        // Write to temp file first, then rename so readers never see a partial blob
        let temp_path = Self::write_temp(&path, data)?;
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        Ok(self.locator(key))
    }

    fn create(&self, key: &str, data: &[u8]) -> Result<String, StorageError> {
        let path = self.resolve(key)?;

        // hard_link fails instead of replacing an existing target
        let temp_path = Self::write_temp(&path, data)?;
        let linked = fs::hard_link(&temp_path, &path);
        let _ = fs::remove_file(&temp_path);

        match linked {
            Ok(()) => Ok(self.locator(key)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, key: &str, range: Option<&RangeRequest>) -> Result<StoredObject, StorageError> {
        let path = self.resolve(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let total_size = file.metadata()?.len();

        let span = match range {
            Some(range) => range.resolve(total_size)?,
            None => None,
        };

        match span {
            Some((first, last)) => {
                let mut data = vec![0u8; (last - first + 1) as usize];
                file.seek(SeekFrom::Start(first))?;
                file.read_exact(&mut data)?;
                Ok(StoredObject {
                    data,
                    total_size,
                    content_range: Some(format!("bytes {}-{}/{}", first, last, total_size)),
                })
            }
            None => {
                let mut data = Vec::with_capacity(total_size as usize);
                file.read_to_end(&mut data)?;
                Ok(StoredObject {
                    data,
                    total_size,
                    content_range: None,
                })
            }
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
