//! Persistence sinks: artifact blob storage and session metadata
//!
//! Both are external collaborators. The filesystem implementations here back
//! the CLI and local development.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::session::{RecordingUpdate, SessionRecord};

#[async_trait::async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `data` at `path`; returns the stored path
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String>;

    fn public_url(&self, path: &str) -> String;
}

#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create(&self, record: &SessionRecord) -> Result<()>;

    async fn update(&self, session_id: &str, update: &RecordingUpdate) -> Result<()>;
}

/// Stores artifacts as files under a directory
pub struct LocalBlobStorage {
    root: PathBuf,
}

impl LocalBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create recordings directory")?;
        }

        tokio::fs::write(&target, &data)
            .await
            .with_context(|| format!("Failed to write artifact: {:?}", target))?;

        info!(
            "Stored {} ({} bytes, {})",
            target.display(),
            data.len(),
            content_type
        );

        Ok(path.to_string())
    }

    fn public_url(&self, path: &str) -> String {
        format!("file://{}", self.root.join(path).display())
    }
}

/// One pretty-printed JSON document per session
pub struct JsonFileMetadataStore {
    dir: PathBuf,
}

impl JsonFileMetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    pub async fn load(&self, session_id: &str) -> Result<SessionRecord> {
        let path = self.record_path(session_id);
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read session record: {:?}", path))?;
        serde_json::from_slice(&raw).context("Failed to parse session record")
    }

    async fn write(&self, record: &SessionRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create metadata directory")?;

        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(self.record_path(&record.session_id), json)
            .await
            .context("Failed to write session record")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetadataStore for JsonFileMetadataStore {
    async fn create(&self, record: &SessionRecord) -> Result<()> {
        self.write(record).await
    }

    async fn update(&self, session_id: &str, update: &RecordingUpdate) -> Result<()> {
        let mut record = self.load(session_id).await?;
        record.apply(update);
        self.write(&record).await
    }
}
