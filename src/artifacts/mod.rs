//! Artifact storage
//!
//! Files produced by an execution are kept under one directory per
//! execution id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::debug;

/// Byte stream of one artifact
pub type ArtifactReader = Pin<Box<dyn AsyncRead + Send>>;

/// Artifact errors
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact {0} not found")]
    NotFound(String),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Listed artifact
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub size: u64,
    pub execution_id: String,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn list_files(&self, execution_id: &str) -> Result<Vec<Artifact>, ArtifactError>;

    async fn download_file(&self, execution_id: &str, name: &str)
        -> Result<ArtifactReader, ArtifactError>;
}

/// Reject names that could leave the execution directory
fn checked_relative(name: &str) -> Result<PathBuf, ArtifactError> {
    let path = Path::new(name);
    let safe = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(path.to_path_buf())
    } else {
        Err(ArtifactError::InvalidName(name.to_string()))
    }
}

/// Artifacts on the local filesystem at `{base_dir}/{execution_id}/`
#[derive(Clone, Debug)]
pub struct LocalArtifactStore {
    base_dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn execution_dir(&self, execution_id: &str) -> Result<PathBuf, ArtifactError> {
        Ok(self.base_dir.join(checked_relative(execution_id)?))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn list_files(&self, execution_id: &str) -> Result<Vec<Artifact>, ArtifactError> {
        let root = self.execution_dir(execution_id)?;
        if !tokio::fs::try_exists(&root).await? {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                let path = entry.path();
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                let name = path
                    .strip_prefix(&root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                artifacts.push(Artifact {
                    name,
                    size: metadata.len(),
                    execution_id: execution_id.to_string(),
                });
            }
        }

        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(execution = %execution_id, count = artifacts.len(), "Listed artifacts");
        Ok(artifacts)
    }

    async fn download_file(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<ArtifactReader, ArtifactError> {
        let path = self.execution_dir(execution_id)?.join(checked_relative(name)?);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(format!("{execution_id}/{name}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn store_with_files() -> (TempDir, LocalArtifactStore) {
        let dir = TempDir::new().unwrap();
        let exec_dir = dir.path().join("64f0c0de0000000000000001");
        tokio::fs::create_dir_all(exec_dir.join("reports")).await.unwrap();
        tokio::fs::write(exec_dir.join("junit.xml"), b"<testsuites/>")
            .await
            .unwrap();
        tokio::fs::write(exec_dir.join("reports").join("summary.txt"), b"ok")
            .await
            .unwrap();
        let store = LocalArtifactStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_list_files_recursive() {
        let (_dir, store) = store_with_files().await;
        let files = store.list_files("64f0c0de0000000000000001").await.unwrap();
        let names: Vec<&str> = files.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["junit.xml", "reports/summary.txt"]);
        assert_eq!(files[0].size, 13);
    }

    #[tokio::test]
    async fn test_list_unknown_execution_is_empty() {
        let (_dir, store) = store_with_files().await;
        assert!(store.list_files("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download() {
        let (_dir, store) = store_with_files().await;
        let mut reader = store
            .download_file("64f0c0de0000000000000001", "reports/summary.txt")
            .await
            .unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "ok");

        assert!(matches!(
            store
                .download_file("64f0c0de0000000000000001", "missing.txt")
                .await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, store) = store_with_files().await;
        for name in ["../secret", "/etc/passwd", "reports/../../x", ""] {
            assert!(matches!(
                store.download_file("64f0c0de0000000000000001", name).await,
                Err(ArtifactError::InvalidName(_))
            ));
        }
        assert!(matches!(
            store.list_files("..").await,
            Err(ArtifactError::InvalidName(_))
        ));
    }
}
