//! Filesystem TTL cache, one file per key.
//!
//! Values are stored in a JSON envelope `{expires_at, value}` and expired
//! lazily: a read past the deadline deletes the file and reports a miss.
//! Reads are unsynchronized; two workers regenerating the same key both
//! write, which is fine because entries are idempotent re-derivations of
//! the same source (the package archive).

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope<T> {
    expires_at: i64,
    value: T,
}

impl FileCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    // Keys are built internally from slugs and hex digests, so they are
    // already filename-safe.
    fn path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path(key);

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(_) => {
                // Unreadable entries are treated as misses and dropped.
                let _ = fs::remove_file(&path);
                return Ok(None);
            }
        };

        if envelope.expires_at < Utc::now().timestamp() {
            let _ = fs::remove_file(&path);
            return Ok(None);
        }

        Ok(Some(envelope.value))
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: i64) -> Result<()> {
        let envelope = Envelope {
            expires_at: Utc::now().timestamp() + ttl_seconds,
            value,
        };

        // Temp file + rename so readers never observe a partial entry.
        let tmp = self.cache_dir.join(format!("{}.tmp", key));
        fs::write(&tmp, serde_json::to_vec(&envelope)?)?;
        fs::rename(&tmp, self.path(key))?;

        Ok(())
    }

    pub fn clear(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
