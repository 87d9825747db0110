// src/storage/descriptors.rs
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::face::LabeledDescriptorSet;
use crate::utils::error::{NodeError, Result};

/// One JSON document per node under a directory: `<node id>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never sees a half-written set.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    dir: PathBuf,
}

impl DescriptorStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            NodeError::Storage(format!("Cannot create {}: {}", dir.display(), e))
        })?;
        info!("Descriptor store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `None` when the node has never been enrolled.
    pub async fn load(&self, node_id: &str) -> Result<Option<LabeledDescriptorSet>> {
        let path = self.path_for(node_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let set = serde_json::from_slice(&bytes).map_err(|e| {
            NodeError::Storage(format!("Corrupt descriptor file {}: {}", path.display(), e))
        })?;
        Ok(Some(set))
    }

    /// Replaces whatever was stored for the node.
    pub async fn save(&self, node_id: &str, set: &LabeledDescriptorSet) -> Result<()> {
        let path = self.path_for(node_id)?;
        let staging = self.dir.join(format!(".{}.{}.tmp", node_id, Uuid::new_v4()));

        fs::write(&staging, serde_json::to_vec(set)?).await?;
        if let Err(e) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        debug!(node = node_id, "Saved {} descriptor(s)", set.len());
        Ok(())
    }

    /// Returns whether there was anything to delete.
    pub async fn delete(&self, node_id: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(node_id)?).await {
            Ok(()) => {
                info!(node = node_id, "Deleted descriptors");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of enrolled descriptors, zero when none are stored.
    pub async fn count(&self, node_id: &str) -> Result<usize> {
        Ok(self.load(node_id).await?.map_or(0, |set| set.len()))
    }

    fn path_for(&self, node_id: &str) -> Result<PathBuf> {
        validate_node_id(node_id)?;
        Ok(self.dir.join(format!("{}.json", node_id)))
    }
}

/// Node ids become file names, so anything that could escape the store
/// directory is rejected.
pub fn validate_node_id(node_id: &str) -> Result<()> {
    let invalid = node_id.is_empty()
        || node_id.starts_with('.')
        || node_id.contains(['/', '\\', '\0'])
        || node_id.contains("..");
    if invalid {
        return Err(NodeError::InvalidNodeId(node_id.to_string()));
    }
    Ok(())
}
