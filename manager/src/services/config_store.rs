//! JSON file config store
//!
//! Persists the registry snapshot to a single JSON file using
//! write-temp-then-rename, so readers only ever see a complete file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::RegistrySnapshot;
use crate::error::{ManagerError, ManagerResult};
use crate::traits::ConfigStore;
use shared::{fleet_debug, Component};

pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    /// A missing file is an empty registry
    async fn load(&self) -> ManagerResult<RegistrySnapshot> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fleet_debug!(Component::Manager, "📂 No config file at {}, starting empty", self.path.display());
                return Ok(RegistrySnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| ManagerError::persist(format!("{} is not a valid config file: {e}", self.path.display())))
    }

    async fn persist(&self, snapshot: &RegistrySnapshot) -> ManagerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();

        let mut file = fs::File::create(&temp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| ManagerError::persist(format!("could not replace {}: {e}", self.path.display())))?;

        fleet_debug!(
            Component::Manager,
            "💾 Saved {} worker configs to {}",
            snapshot.workers.len(),
            self.path.display()
        );
        Ok(())
    }
}
