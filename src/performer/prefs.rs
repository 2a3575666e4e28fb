//! Small key-value preference store the performer uses to persist resume
//! state (bytes received, current operation index, manifest hash) across
//! process restarts. Grounded on the `PrefsInterface` style used by the
//! source's resume logic; kept here as a plain trait + file-backed impl the
//! way the teacher keeps small platform seams (`pal::permissions`) behind a
//! trait rather than baking in one implementation.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::error::CoreResult;

pub trait Prefs: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&mut self, key: &str, value: &str) -> CoreResult<()>;
    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_string(key)?.parse().ok()
    }
    fn set_u64(&mut self, key: &str, value: u64) -> CoreResult<()> {
        self.set_string(key, &value.to_string())
    }
    fn delete(&mut self, key: &str) -> CoreResult<()>;
    fn exists(&self, key: &str) -> bool {
        self.get_string(key).is_some()
    }
}

pub const KEY_UPDATE_STATE_NEXT_OPERATION: &str = "update-state-next-operation";
pub const KEY_UPDATE_STATE_NEXT_DATA_OFFSET: &str = "update-state-next-data-offset";
pub const KEY_UPDATE_STATE_MANIFEST_BYTES: &str = "update-state-manifest-bytes";
pub const KEY_UPDATE_STATE_SIGNATURE_BLOB: &str = "update-state-signature-blob";
pub const KEY_UPDATE_STATE_SHA256_CONTEXT: &str = "update-state-sha-256-context";
pub const KEY_UPDATE_STATE_SOURCE_SLOT: &str = "update-state-source-slot";
pub const KEY_UPDATE_STATE_TARGET_SLOT: &str = "update-state-target-slot";

/// File-per-key preference store, one file per key inside `dir`, matching
/// the plain-file-based prefs layout the source uses (one small file per
/// key rather than a single structured database, so a partial write to one
/// key can't corrupt the others).
pub struct FilePrefs {
    dir: PathBuf,
    cache: HashMap<String, String>,
}

impl FilePrefs {
    pub fn new(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FilePrefs {
            dir,
            cache: HashMap::new(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl Prefs for FilePrefs {
    fn get_string(&self, key: &str) -> Option<String> {
        if let Some(v) = self.cache.get(key) {
            return Some(v.clone());
        }
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn set_string(&mut self, key: &str, value: &str) -> CoreResult<()> {
        fs::write(self.path_for(key), value)?;
        self.cache.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> CoreResult<()> {
        self.cache.remove(key);
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory prefs for tests, avoiding real filesystem state.
#[derive(Default)]
pub struct MemPrefs(HashMap<String, String>);

impl MemPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Prefs for MemPrefs {
    fn get_string(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }

    fn set_string(&mut self, key: &str, value: &str) -> CoreResult<()> {
        self.0.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> CoreResult<()> {
        self.0.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_prefs_roundtrip_u64() {
        let mut prefs = MemPrefs::new();
        prefs.set_u64(KEY_UPDATE_STATE_NEXT_OPERATION, 42).unwrap();
        assert_eq!(prefs.get_u64(KEY_UPDATE_STATE_NEXT_OPERATION), Some(42));
    }

    #[test]
    fn delete_clears_value() {
        let mut prefs = MemPrefs::new();
        prefs.set_string("k", "v").unwrap();
        prefs.delete("k").unwrap();
        assert!(!prefs.exists("k"));
    }
}
