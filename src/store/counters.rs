use super::files::{write_atomic, FileLock};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::warn;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec(value).context("Failed to encode counter map")
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).context("Failed to decode counter map")
}

/// A MessagePack-encoded counter map persisted at `path`.
///
/// Reads never fail: a missing, empty or undecodable file yields the empty
/// map, since losing counter history only resets backoff state.
#[derive(Debug, Clone)]
pub struct CounterStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CounterStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> T {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!("Failed to read {}: {}; starting empty", self.path.display(), e);
                return T::default();
            }
        };
        if bytes.is_empty() {
            return T::default();
        }
        match decode(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Counter file {} is corrupt ({:#}); starting empty",
                    self.path.display(),
                    e
                );
                T::default()
            }
        }
    }

    pub fn save(&self, value: &T) -> Result<()> {
        let bytes = encode(value)?;
        write_atomic(&self.path, &bytes)
    }

    /// Read-modify-write under the store's lock, re-reading the file so
    /// updates made by other runs since our last load are kept.
    pub fn update<R>(&self, apply: impl FnOnce(&mut T) -> R) -> Result<R> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut value = self.load();
        let out = apply(&mut value);
        self.save(&value)?;
        Ok(out)
    }
}
