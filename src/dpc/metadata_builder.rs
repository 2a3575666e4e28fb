use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Opaque dynamic-partition metadata builder (spec.md §6.2): this crate
/// drives it through load/resize/store calls without owning the on-disk
/// `liblp` metadata format itself. The real format (geometry + partition
/// table + extent table, checksummed, double-slotted for crash safety) is
/// out of this crate's scope; this implementation keeps an equivalent
/// logical model serialized as JSON so the DPC's policy logic has a real
/// collaborator to exercise in tests.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataBuilder {
    super_partition_size: u64,
    partitions: HashMap<String, u64>,
}

impl MetadataBuilder {
    const DEFAULT_SUPER_SIZE: u64 = 256 * 1024 * 1024;
    const METADATA_FILE: &'static str = "dynamic_partition_metadata.json";

    pub fn load(device_dir: &str) -> CoreResult<Self> {
        let path = Path::new(device_dir).join(Self::METADATA_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(serde_json::from_str(&contents).unwrap_or_else(|_| Self::empty())),
            Err(_) => Ok(Self::empty()),
        }
    }

    fn empty() -> Self {
        MetadataBuilder {
            super_partition_size: Self::DEFAULT_SUPER_SIZE,
            partitions: HashMap::new(),
        }
    }

    pub fn super_partition_size(&self) -> u64 {
        self.super_partition_size
    }

    pub fn resize_partition(&mut self, name: &str, size: u64) -> CoreResult<()> {
        self.partitions.insert(name.to_string(), size);
        Ok(())
    }

    pub fn partition_size(&self, name: &str) -> Option<u64> {
        self.partitions.get(name).copied()
    }

    pub fn store(&self, device_dir: &str) -> CoreResult<()> {
        let path = Path::new(device_dir).join(Self::METADATA_FILE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(self)
            .map_err(|e| crate::error::CoreError::DeviceMapperError(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn load_without_existing_file_returns_default_size() {
        let dir = tempfile::tempdir().unwrap();
        let builder = MetadataBuilder::load(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(builder.super_partition_size(), MetadataBuilder::DEFAULT_SUPER_SIZE);
    }

    #[test]
    fn resize_and_store_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();
        let mut builder = MetadataBuilder::load(dir_str).unwrap();
        builder.resize_partition("system", 4096).unwrap();
        builder.store(dir_str).unwrap();

        let reloaded = MetadataBuilder::load(dir_str).unwrap();
        assert_eq!(reloaded.partition_size("system"), Some(4096));
    }
}
