//! On-disk last-known-good payloads, one json file per module.
//!
//! Each file is owned by the worker of its module. Writes go to a temporary file in the same
//! directory which is then renamed over the target, so readers never see a half-written file.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use barstate_shared_util::ModuleKey;
use serde_json::Value;

/// Distinguishes temp files of concurrent writes within this process, i.e. a replaced worker and its successor.
static TMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct ModuleCache {
    dir: PathBuf,
}

impl ModuleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cache file for `key`. Characters that can't appear in a file name are replaced by `_`.
    pub fn path_for(&self, key: &ModuleKey) -> PathBuf {
        let file_name: String =
            key.as_str().chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' }).collect();
        self.dir.join(format!("{}.json", file_name))
    }

    /// Load the persisted payload for `key`. Missing, unreadable or corrupt files yield `None`.
    pub fn load(&self, key: &ModuleKey) -> Option<Value> {
        let path = self.path_for(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No cache file for {} at {}", key, path.display());
                return None;
            }
            Err(e) => {
                log::warn!("Failed to read cache file {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring corrupt cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Atomically replace the persisted payload for `key`.
    pub fn store(&self, key: &ModuleKey, value: &Value) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;
        let path = self.path_for(key);
        let n = TMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("json.{}.{}.tmp", std::process::id(), n));

        let write_tmp = || -> Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            serde_json::to_writer(&mut file, value)?;
            file.flush()?;
            file.sync_all()?;
            Ok(())
        };
        if let Err(e) = write_tmp() {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e).with_context(|| format!("Failed to write cache file {}", tmp_path.display()));
        }

        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to move {} into place at {}", tmp_path.display(), path.display()))?;
        log::trace!("Persisted {} to {}", key, path.display());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::path::PathBuf;

    /// A fresh, empty directory under the system temp dir. Removed again on drop.
    pub struct TempDir(pub PathBuf);

    impl TempDir {
        pub fn new(name: &str) -> Self {
            static COUNTER: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
            let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!("barstate-test-{}-{}-{}", name, std::process::id(), n));
            let _ = std::fs::remove_dir_all(&dir);
            std::fs::create_dir_all(&dir).unwrap();
            TempDir(dir)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
