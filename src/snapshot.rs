//! Best-effort catalog persistence.
//!
//! One serialized array of catalog entries under a single well-known path.
//! Every failure is equivalent to "no snapshot available"; persistence
//! never blocks startup or operation.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::RegisteredTool;

/// Storage for catalog snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the last snapshot, `None` when there is none.
    async fn load(&self) -> Result<Option<Vec<RegisteredTool>>>;

    /// Persist a snapshot, replacing any previous one.
    async fn save(&self, tools: &[RegisteredTool]) -> Result<()>;
}

/// Snapshot store writing one JSON array to a file.
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    /// Store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn load(&self) -> Result<Option<Vec<RegisteredTool>>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Snapshot(e.to_string())),
        };
        let tools: Vec<RegisteredTool> =
            serde_json::from_slice(&bytes).map_err(|e| Error::Snapshot(e.to_string()))?;
        Ok(Some(tools))
    }

    async fn save(&self, tools: &[RegisteredTool]) -> Result<()> {
        let json = serde_json::to_vec_pretty(tools).map_err(|e| Error::Snapshot(e.to_string()))?;
        // write-then-rename so a crash mid-write never leaves a torn file
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| Error::Snapshot(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Snapshot(e.to_string()))?;
        Ok(())
    }
}
