//! File-based key-value store for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const VALUE_SUFFIX: &str = "json";
const LONG_SUFFIX: &str = "long";
const TEMP_SUFFIX: &str = "tmp";

/// Longest hex stem used as a file name. Leaves room for suffixes under the
/// usual 255-byte name limit.
const MAX_HEX_STEM: usize = 200;

/// Where a key lives in the directory.
enum Slot {
    /// `<hex key>.json`, holding the bare value.
    Named(String),
    /// `<sha256 of key>.long`, holding the hex key on the first line and the
    /// value after it.
    Hashed(String),
}

impl Slot {
    fn for_key(key: &str) -> Self {
        let stem = hex::encode(key.as_bytes());
        if stem.len() <= MAX_HEX_STEM {
            Slot::Named(stem)
        } else {
            Slot::Hashed(hex::encode(Sha256::digest(key.as_bytes())))
        }
    }

    fn file_name(&self) -> String {
        match self {
            Slot::Named(stem) => format!("{stem}.{VALUE_SUFFIX}"),
            Slot::Hashed(digest) => format!("{digest}.{LONG_SUFFIX}"),
        }
    }
}

/// A directory-backed key-value store.
///
/// Every key is stored in its own file. File names are the hex encoding of
/// the key bytes, so keys containing `/` (endpoints) map to flat names. Keys
/// too long for a file name are stored under their SHA-256 digest, with the
/// key itself kept inside the file. Data survives process restarts.
///
/// # Durability
///
/// - `set_item()` writes a temp file, syncs it, then renames it over the old value
/// - A crash mid-write leaves either the old or the new value, never a mix
///
/// # Example
///
/// ```no_run
/// use mavuno_storage::{FileStore, KeyValueStore};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = FileStore::open("state").await.unwrap();
/// store.set_item("syncQueue", "[]".into()).await.unwrap();
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Returns the directory holding the store's files.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(Slot::for_key(key).file_name())
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", Slot::for_key(key).file_name(), TEMP_SUFFIX))
    }
}

/// Recovers a key from a value file name; `None` for foreign files.
fn decode_file_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(VALUE_SUFFIX)?.strip_suffix('.')?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

/// Splits a digest-named file into its key and value.
fn split_long(raw: &str) -> Option<(String, &str)> {
    let (header, value) = raw.split_once('\n')?;
    let key = String::from_utf8(hex::decode(header).ok()?).ok()?;
    Some((key, value))
}

/// Recovers the key of a digest-named file; `None` if it is unreadable.
async fn read_long_key(path: &Path) -> Option<String> {
    let bytes = fs::read(path).await.ok()?;
    let raw = String::from_utf8(bytes).ok()?;
    split_long(&raw).map(|(key, _)| key)
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn set_item(&self, key: &str, value: String) -> StorageResult<()> {
        let contents = match Slot::for_key(key) {
            Slot::Named(_) => value,
            Slot::Hashed(_) => format!("{}\n{}", hex::encode(key.as_bytes()), value),
        };
        let temp = self.temp_path(key);
        let mut file = fs::File::create(&temp).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, self.value_path(key)).await?;
        Ok(())
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let slot = Slot::for_key(key);
        let bytes = match fs::read(self.dir.join(slot.file_name())).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let raw = String::from_utf8(bytes)
            .map_err(|e| StorageError::Corrupted(format!("value for {key:?}: {e}")))?;

        match slot {
            Slot::Named(_) => Ok(Some(raw)),
            Slot::Hashed(_) => match split_long(&raw) {
                Some((stored, value)) if stored == key => Ok(Some(value.to_string())),
                _ => Err(StorageError::Corrupted(format!(
                    "value for {key:?}: key header does not match"
                ))),
            },
        }
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.value_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn multi_remove(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            self.remove_item(key).await?;
        }
        Ok(())
    }

    async fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(key) = decode_file_name(name) {
                keys.push(key);
            } else if name.ends_with(&format!(".{LONG_SUFFIX}")) {
                if let Some(key) = read_long_key(&entry.path()).await {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
