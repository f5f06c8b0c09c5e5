//! Artifact store port.

use crate::errors::PipelineError;
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persists named files as build artifacts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Saves `content` under `name`, replacing any previous artifact.
    async fn save(&self, name: &str, content: &[u8]) -> Result<(), PipelineError>;
}

/// Saves an artifact, logging instead of failing.
///
/// Artifact persistence is diagnostic output and never decides an outcome.
pub async fn save_best_effort(store: &dyn ArtifactStore, name: &str, content: &[u8]) {
    if let Err(err) = store.save(name, content).await {
        warn!(artifact = name, error = %err, "Failed to save artifact");
    }
}

/// Hex-encoded SHA-256 of an artifact.
#[must_use]
pub fn digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Stores artifacts as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, PipelineError> {
        let relative = Path::new(name);
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
        if name.is_empty() || escapes {
            return Err(PipelineError::Config(format!("invalid artifact name: {name:?}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, name: &str, content: &[u8]) -> Result<(), PipelineError> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        debug!(
            artifact = name,
            path = %path.display(),
            bytes = content.len(),
            sha256 = %digest(content),
            "Saved artifact"
        );
        Ok(())
    }
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: DashMap<String, Vec<u8>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an artifact's content.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.artifacts.get(name).map(|entry| entry.value().clone())
    }

    /// Returns an artifact as UTF-8 text.
    #[must_use]
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Returns the stored names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.artifacts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns the number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save(&self, name: &str, content: &[u8]) -> Result<(), PipelineError> {
        self.artifacts.insert(name.to_string(), content.to_vec());
        Ok(())
    }
}
