// Store is responsible for:
// mapping an assigned name to the bytes uploaded under it
// deciding that name when a file first arrives
//
// DiskStore keeps one file per blob in a single flat directory and the
// directory listing is the index, there is no manifest. Nothing here locks:
// concurrent writes to the same name race at the filesystem.
use regex::Regex;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no blob named {0:?}")]
    NotFound(String),
    #[error("store read failed: {0}")]
    StorageRead(#[source] std::io::Error),
    #[error("store write failed: {0}")]
    StorageWrite(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under a fresh name carrying the extension of
    /// `original_name` and returns that name.
    fn put(&self, original_name: &str, bytes: &[u8]) -> Result<String>;

    /// Names of all blobs, unordered.
    fn list(&self) -> Result<Vec<String>>;

    fn get(&self, name: &str) -> Result<Vec<u8>>;

    /// Replaces the content of an existing blob. Never creates one.
    fn overwrite(&self, name: &str, bytes: &[u8]) -> Result<()>;

    fn delete(&self, name: &str) -> Result<()>;
}

/// Hands out `<millis>-<seq>[.ext]` names. The sequence number is what keeps
/// two uploads in the same millisecond apart.
#[derive(Debug)]
struct NameAllocator {
    seq: AtomicU64,
    extension: Regex,
}

impl NameAllocator {
    fn new() -> NameAllocator {
        NameAllocator {
            seq: AtomicU64::new(0),
            extension: Regex::new(r"^[A-Za-z0-9]{1,16}$").expect("extension pattern compiles"),
        }
    }

    fn next(&self, original_name: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        // anything odd in the extension is dropped rather than escaped
        match Path::new(original_name).extension().and_then(|e| e.to_str()) {
            Some(ext) if self.extension.is_match(ext) => format!("{}-{}.{}", millis, seq, ext),
            _ => format!("{}-{}", millis, seq),
        }
    }
}

/// A name that could escape the store directory can never refer to a blob.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

fn not_found_or(name: &str, err: std::io::Error, other: fn(std::io::Error) -> StoreError) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound(name.to_owned())
    } else {
        other(err)
    }
}

/// Removes a blob whose write failed half way. Returns whether it is gone.
fn discard_partial(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!("could not remove partial blob {:?}: {}", path, e);
            false
        }
    }
}

/// Gives up after this many names in a row turned out to be taken.
const MAX_NAME_ATTEMPTS: usize = 16;

#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    names: NameAllocator,
}

impl DiskStore {
    /// Creates `root` (and parents) if missing. Safe to call on an existing
    /// directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<DiskStore> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(StoreError::StorageWrite)?;
        info!("storing blobs in {:?}", root);
        Ok(DiskStore {
            root,
            names: NameAllocator::new(),
        })
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        if is_valid_name(name) {
            Ok(self.root.join(name))
        } else {
            Err(StoreError::NotFound(name.to_owned()))
        }
    }
}

impl BlobStore for DiskStore {
    fn put(&self, original_name: &str, bytes: &[u8]) -> Result<String> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = self.names.next(original_name);
            let path = self.root.join(&name);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} already taken, picking another name", name);
                    continue;
                }
                Err(e) => return Err(StoreError::StorageWrite(e)),
            };
            if let Err(e) = file.write_all(bytes) {
                // don't leave a truncated blob behind
                drop(file);
                discard_partial(&path);
                return Err(StoreError::StorageWrite(e));
            }
            debug!("stored {} ({} bytes) as {}", original_name, bytes.len(), name);
            return Ok(name);
        }
        Err(StoreError::StorageWrite(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "could not allocate an unused blob name",
        )))
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(StoreError::StorageRead)? {
            let entry = entry.map_err(StoreError::StorageRead)?;
            if !entry.file_type().map_err(StoreError::StorageRead)?.is_file() {
                continue;
            }
            // non utf-8 names can't be addressed over http anyway
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!("skipping non utf-8 entry {:?} in {:?}", raw, self.root),
            }
        }
        Ok(names)
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name)?;
        std::fs::read(path).map_err(|e| not_found_or(name, e, StoreError::StorageRead))
    }

    fn overwrite(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(name)?;
        // no create(true): a missing blob must stay missing
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| not_found_or(name, e, StoreError::StorageWrite))?;
        file.write_all(bytes).map_err(StoreError::StorageWrite)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        std::fs::remove_file(path).map_err(|e| not_found_or(name, e, StoreError::StorageWrite))
    }
}

/// Same contract as DiskStore, kept in a map. Used to exercise the handlers
/// without touching the disk.
#[cfg(test)]
#[derive(Debug)]
pub struct MemoryStore {
    blobs: std::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>,
    names: NameAllocator,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            blobs: Default::default(),
            names: NameAllocator::new(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, std::collections::HashMap<String, Vec<u8>>> {
        self.blobs.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, std::collections::HashMap<String, Vec<u8>>> {
        self.blobs.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
impl BlobStore for MemoryStore {
    fn put(&self, original_name: &str, bytes: &[u8]) -> Result<String> {
        let mut blobs = self.write();
        loop {
            let name = self.names.next(original_name);
            if let std::collections::hash_map::Entry::Vacant(slot) = blobs.entry(name.clone()) {
                slot.insert(bytes.to_vec());
                return Ok(name);
            }
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.read().keys().cloned().collect())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))
    }

    fn overwrite(&self, name: &str, bytes: &[u8]) -> Result<()> {
        match self.write().get_mut(name) {
            Some(blob) => {
                *blob = bytes.to_vec();
                Ok(())
            }
            None => Err(StoreError::NotFound(name.to_owned())),
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))
    }
}
