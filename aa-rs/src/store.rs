use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::chain::WorldState;
use crate::crypto::Curve;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no chain state at {0}; run `zkaa genesis` first")]
    Missing(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Everything needed to resume a chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub curve: Curve,
    pub state: WorldState,
}

#[derive(Clone, Debug)]
pub struct ChainStore {
    path: PathBuf,
}

/// Held while a process reads and rewrites the state file. Dropping it
/// releases the lock.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
}

impl ChainStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
        }
        Ok(())
    }

    /// Blocks until no other process holds the state file.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        self.ensure_parent()?;
        let lock_path = self.path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(io_err(&lock_path))?;
        file.lock_exclusive().map_err(io_err(&lock_path))?;
        Ok(StoreLock { _file: file })
    }

    pub fn load(&self) -> Result<ChainSnapshot, StoreError> {
        if !self.path.exists() {
            return Err(StoreError::Missing(self.path.clone()));
        }
        let raw = fs::read_to_string(&self.path).map_err(io_err(&self.path))?;
        serde_json::from_str(&raw).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Write to a temp file then rename over the state file.
    pub fn save(&self, snapshot: &ChainSnapshot) -> Result<(), StoreError> {
        self.ensure_parent()?;
        let json = serde_json::to_string_pretty(snapshot).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(io_err(&tmp_path))?;
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            if cfg!(windows) {
                let _ = fs::remove_file(&self.path);
                fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;
            } else {
                return Err(io_err(&self.path)(err));
            }
        }
        tracing::debug!(path = %self.path.display(), "chain state saved");
        Ok(())
    }
}

/// Serde helper for maps whose keys are not strings: a sequence of
/// `[key, value]` pairs.
pub mod entries {
    use std::collections::BTreeMap;

    use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, s: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        s.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(d: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: DeserializeOwned + Ord,
        V: DeserializeOwned,
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(K, V)>::deserialize(d)?;
        Ok(pairs.into_iter().collect())
    }
}
