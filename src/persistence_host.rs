//! Key-value persistence for host (development) builds.
//!
//! [`MemoryStore`] keeps everything in RAM and is used by tests.
//! [`FileStore`] keeps one JSON file per namespace so credentials survive
//! restarts of the host portal. Uses `~/.audio-link-esp32/` by default.
//!
//! # Usage
//!
//! ```no_run
//! use audio_link_esp32::kv::KvStore;
//! use audio_link_esp32::persistence_host::FileStore;
//!
//! let mut store = FileStore::open_default()?;
//! store.set_str("wifi_config", "ssid", "home")?;
//! store.commit("wifi_config")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::kv::{KvStore, StoreError};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

type Namespace = BTreeMap<String, String>;

/// Get the default storage directory.
///
/// Returns `~/.audio-link-esp32`
pub fn default_store_dir() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".audio-link-esp32"))
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: HashMap<String, Namespace>,
    commits: usize,
    fail_writes: bool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose writes always fail.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "store is read-only",
            )));
        }
        Ok(())
    }
}

impl KvStore for MemoryStore {
    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.data
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        if let Some(ns) = self.data.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    fn commit(&mut self, _namespace: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.commits += 1;
        Ok(())
    }
}

/// File-backed store: `<dir>/<namespace>.json`.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    staged: HashMap<String, Namespace>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            staged: HashMap::new(),
        })
    }

    /// Open the store at [`default_store_dir`].
    pub fn open_default() -> io::Result<Self> {
        Self::open(default_store_dir()?)
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }

    fn load(&self, namespace: &str) -> Result<Namespace, StoreError> {
        let path = self.namespace_path(namespace);
        let text = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No namespace file at {:?}", path);
                return Ok(Namespace::new());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))
    }

    fn staged_mut(&mut self, namespace: &str) -> Result<&mut Namespace, StoreError> {
        if !self.staged.contains_key(namespace) {
            let current = self.load(namespace)?;
            self.staged.insert(namespace.to_string(), current);
        }
        self.staged
            .get_mut(namespace)
            .ok_or_else(|| StoreError::Corrupt(format!("namespace {} vanished", namespace)))
    }
}

impl KvStore for FileStore {
    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(ns) = self.staged.get(namespace) {
            return Ok(ns.get(key).cloned());
        }
        Ok(self.load(namespace)?.remove(key))
    }

    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.staged_mut(namespace)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.staged_mut(namespace)?.remove(key);
        Ok(())
    }

    fn commit(&mut self, namespace: &str) -> Result<(), StoreError> {
        let Some(ns) = self.staged.remove(namespace) else {
            return Ok(());
        };
        let path = self.namespace_path(namespace);
        let text = serde_json::to_string_pretty(&ns)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        fs::write(&path, &text)?;

        // Verify write by reading back
        let read_back = fs::read_to_string(&path)?;
        if read_back != text {
            return Err(StoreError::VerifyFailed {
                key: namespace.to_string(),
            });
        }

        info!("Namespace {} saved to {:?}", namespace, path);
        Ok(())
    }
}
