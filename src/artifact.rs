use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Duration};

use crate::config::ArtifactConfig;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact `{reference}` not visible after {attempts} attempts")]
    NotReady { reference: String, attempts: u32 },
    #[error("artifact store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode image artifact: {0}")]
    Encode(String),
}

/// Opaque, stable reference to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable persistence for generated images. `put` returns only once the
/// write is confirmed; references are never reused or overwritten.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    async fn put(&self, bytes: &[u8], suggested_name: &str) -> Result<ArtifactRef, ArtifactError>;

    async fn exists(&self, reference: &ArtifactRef) -> Result<bool, ArtifactError>;
}

/// Filesystem-backed artifact store.
///
/// Files are created with create-new semantics so an existing name is an
/// error rather than an overwrite, and synced before the reference is
/// handed out. A bounded visibility poll with exponential backoff covers
/// stores where the sync is not immediately observable; exhausting it is
/// `ArtifactError::NotReady`, never an indefinite block.
pub struct FsArtifactStore {
    root: PathBuf,
    confirm_retries: u32,
    confirm_initial_delay: Duration,
}

impl FsArtifactStore {
    pub fn new(config: &ArtifactConfig) -> Result<Self, ArtifactError> {
        std::fs::create_dir_all(&config.artifact_dir)?;
        Ok(Self {
            root: config.artifact_dir.clone(),
            confirm_retries: config.confirm_retries,
            confirm_initial_delay: Duration::from_millis(config.confirm_initial_delay_ms),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn await_visible(&self, name: &str) -> Result<(), ArtifactError> {
        let mut retry_delay = self.confirm_initial_delay;

        for _ in 0..self.confirm_retries {
            if tokio::fs::try_exists(self.path_for(name)).await? {
                return Ok(());
            }
            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            sleep(retry_delay.mul_f32(jitter)).await;
            retry_delay *= 2;
        }

        if tokio::fs::try_exists(self.path_for(name)).await? {
            return Ok(());
        }

        Err(ArtifactError::NotReady {
            reference: name.to_string(),
            attempts: self.confirm_retries,
        })
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, bytes: &[u8], suggested_name: &str) -> Result<ArtifactRef, ArtifactError> {
        let path = self.path_for(suggested_name);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        self.await_visible(suggested_name).await?;

        tracing::debug!("Stored artifact {}", suggested_name);
        Ok(ArtifactRef::new(suggested_name))
    }

    async fn exists(&self, reference: &ArtifactRef) -> Result<bool, ArtifactError> {
        Ok(tokio::fs::try_exists(self.path_for(reference.as_str())).await?)
    }
}
