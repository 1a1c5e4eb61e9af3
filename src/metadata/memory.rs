//! In-memory metadata repository
//!
//! Backs standalone deployments and tests. Records are cloned on read, so
//! callers always hold an immutable snapshot; a save replaces the whole
//! record under the key.

use crate::array::FailureInjection;
use crate::domain::model::Volume;
use crate::domain::ports::MetadataRepository;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Volume records keyed by display name
#[derive(Default)]
pub struct MemoryRepository {
    records: RwLock<BTreeMap<String, Volume>>,
    /// Per-operation failure injection, shared with the in-process array
    pub faults: FailureInjection,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataRepository for MemoryRepository {
    async fn get(&self, name: &str) -> Result<Option<Volume>> {
        self.faults.check("get")?;
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn save(&self, volume: &Volume) -> Result<()> {
        self.faults.check("save")?;
        self.records
            .write()
            .await
            .insert(volume.name.clone(), volume.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.faults.check("delete")?;
        self.records.write().await.remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.faults.check("exists")?;
        Ok(self.records.read().await.contains_key(name))
    }

    async fn list(&self) -> Result<Vec<Volume>> {
        self.faults.check("list")?;
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::VolumeOptions;

    #[tokio::test]
    async fn test_save_get_delete() {
        let repo = MemoryRepository::new();
        let vol = Volume::new("vol-1", VolumeOptions::default(), "array-a");

        assert!(!repo.exists("vol-1").await.unwrap());
        repo.save(&vol).await.unwrap();
        assert!(repo.exists("vol-1").await.unwrap());

        let fetched = repo.get("vol-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, vol.id);

        repo.delete("vol-1").await.unwrap();
        assert!(repo.get("vol-1").await.unwrap().is_none());

        // Deleting an absent key is not an error
        repo.delete("vol-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_overwrites_same_key() {
        let repo = MemoryRepository::new();
        let mut vol = Volume::new("vol-1", VolumeOptions::default(), "array-a");
        repo.save(&vol).await.unwrap();

        vol.options.size_gib = 42;
        repo.save(&vol).await.unwrap();

        let fetched = repo.get("vol-1").await.unwrap().unwrap();
        assert_eq!(fetched.options.size_gib, 42);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
