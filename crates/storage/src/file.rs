//! FileStore: one checksummed file per key
//!
//! # Layout
//!
//! ```text
//! <dir>/<hex(key)>.kv
//!
//! +------------------+
//! | Magic: "VLM1"    | 4 bytes
//! | CRC32 (payload)  | 4 bytes (u32 LE)
//! | Payload          | UTF-8 value text
//! +------------------+
//! ```
//!
//! Writes go through write-fsync-rename so a crash leaves either the old or
//! the new file, never a torn one; a file whose checksum does not match is
//! reported as `Corruption`. File names are the hex encoding of the key, so any
//! key up to [`MAX_KEY_BYTES`] is representable and enumeration is a directory
//! listing. Longer keys are refused with `InvalidOperation`.
//!
//! On open the directory is probed with a test write. A directory that cannot
//! be written puts the store in write-blocked mode.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use vellum_core::{Error, Result};

use crate::store::{entry_size, KeyValueStore, Usage};

/// Magic bytes at the start of every value file
pub const FILE_MAGIC: [u8; 4] = *b"VLM1";
/// Header length: magic + CRC32
pub const HEADER_LEN: usize = 8;

/// Longest key a file name can hold: two hex digits per byte plus the
/// extension must stay under the common 255-byte name limit
pub const MAX_KEY_BYTES: usize = 120;

const DATA_EXT: &str = "kv";
const TEMP_EXT: &str = "tmp";
const PROBE_NAME: &str = ".probe";

/// Frame a value with magic and checksum
pub fn frame(value: &str) -> Vec<u8> {
    let payload = value.as_bytes();
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&FILE_MAGIC);
    bytes.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Verify and strip the frame written by [`frame`]
pub fn unframe(key: &str, bytes: &[u8]) -> Result<String> {
    if bytes.len() < HEADER_LEN || bytes[0..4] != FILE_MAGIC {
        return Err(Error::Corruption(format!("value file for '{}' has no valid header", key)));
    }
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&bytes[4..HEADER_LEN]);
    let stored = u32::from_le_bytes(crc);
    let payload = &bytes[HEADER_LEN..];
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(Error::Corruption(format!(
            "checksum mismatch for '{}': stored {:08x}, computed {:08x}",
            key, stored, computed
        )));
    }
    String::from_utf8(payload.to_vec())
        .map_err(|_| Error::Corruption(format!("value for '{}' is not UTF-8", key)))
}

/// Directory-backed key-value store
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    capacity: u64,
    /// Entry sizes by key, guarded together with every write
    sizes: Mutex<BTreeMap<String, u64>>,
    blocked: Option<String>,
}

impl FileStore {
    /// Open (or create) a store in `dir` with the given capacity
    ///
    /// Never fails for an unwritable directory: the store comes up
    /// write-blocked instead and serves whatever it can read.
    pub fn open(dir: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let blocked = match fs::create_dir_all(&dir).and_then(|_| probe(&dir)) {
            Ok(()) => None,
            Err(e) => {
                warn!(target: "vellum::storage", dir = %dir.display(), error = %e, "probe write failed, store is write-blocked");
                Some(format!("cannot write to {}: {}", dir.display(), e))
            }
        };

        let mut sizes = BTreeMap::new();
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some(DATA_EXT) => {}
                    Some(TEMP_EXT) if blocked.is_none() => {
                        // Leftover of an interrupted write; the old file is intact
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    _ => continue,
                }
                let Some(key) = key_from_path(&path) else {
                    continue;
                };
                let len = entry.metadata()?.len();
                let payload = len.saturating_sub(HEADER_LEN as u64);
                sizes.insert(key.clone(), key.len() as u64 + payload);
            }
        }
        debug!(target: "vellum::storage", dir = %dir.display(), keys = sizes.len(), "file store opened");

        Ok(Self {
            dir,
            capacity,
            sizes: Mutex::new(sizes),
            blocked,
        })
    }

    /// Data directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hex::encode(key.as_bytes()), DATA_EXT))
    }

    fn check_key(key: &str) -> Result<()> {
        if key.len() > MAX_KEY_BYTES {
            return Err(Error::invalid(format!(
                "key of {} bytes exceeds the {}-byte limit",
                key.len(),
                MAX_KEY_BYTES
            )));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        match &self.blocked {
            Some(reason) => Err(Error::StorageDisabled(reason.clone())),
            None => Ok(()),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let temp_path = path.with_extension(TEMP_EXT);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, path)?;
        sync_dir(&self.dir)
    }
}

fn probe(dir: &Path) -> io::Result<()> {
    let path = dir.join(PROBE_NAME);
    let mut file = File::create(&path)?;
    file.write_all(b"probe")?;
    file.sync_all()?;
    drop(file);
    fs::remove_file(&path)
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    if let Ok(handle) = File::open(dir) {
        handle.sync_all()?;
    }
    Ok(())
}

fn key_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if key.len() > MAX_KEY_BYTES {
            return Ok(None);
        }
        match fs::read(self.path_for(key)) {
            Ok(bytes) => unframe(key, &bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        Self::check_key(key)?;
        let mut sizes = self.sizes.lock();
        let used: u64 = sizes.values().sum();
        let old = sizes.get(key).copied().unwrap_or(0);
        let new = entry_size(key, value);
        let base = used - old;
        if base.saturating_add(new) > self.capacity {
            debug!(target: "vellum::storage", key, needed = new, "capacity exceeded");
            return Err(Error::CapacityExceeded {
                key: key.to_string(),
                needed: new,
                available: self.capacity.saturating_sub(base),
            });
        }
        self.write_atomic(&self.path_for(key), &frame(value))?;
        sizes.insert(key.to_string(), new);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        if key.len() > MAX_KEY_BYTES {
            return Ok(());
        }
        let mut sizes = self.sizes.lock();
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => sync_dir(&self.dir)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        sizes.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DATA_EXT) {
                continue;
            }
            if let Some(key) = key_from_path(&path) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn is_available(&self) -> bool {
        self.blocked.is_none()
    }

    fn usage(&self) -> Usage {
        Usage {
            used_bytes: self.sizes.lock().values().sum(),
            capacity_bytes: self.capacity,
        }
    }
}
