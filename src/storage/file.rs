//! JSON file execution store
//!
//! One file per execution at `{base_dir}/{test}/{name}.json`. The file name
//! doubles as the `(test, name)` uniqueness key, so inserts are create-new.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{latest_per_test, ExecutionStore, StoreError};
use crate::models::{Execution, ExecutionFilter, ExecutionResult, ExecutionsTotals};

/// Execution store persisted as JSON files
pub struct FileExecutionStore {
    base_dir: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileExecutionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store under the user data directory
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("test-orchestrator")
            .join("executions");
        Self::new(base_dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    fn test_dir(&self, test: &str) -> PathBuf {
        self.base_dir.join(file_component(test))
    }

    fn execution_path(&self, test: &str, name: &str) -> PathBuf {
        self.test_dir(test)
            .join(format!("{}.json", file_component(name)))
    }

    fn write(&self, path: &Path, execution: &Execution, create_new: bool) -> Result<(), StoreError> {
        let mut options = OpenOptions::new();
        options.write(true);
        if create_new {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }

        let file = options.open(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, execution)?;
        writer.flush()?;
        Ok(())
    }

    fn load_from_path(path: &Path) -> Result<Execution, StoreError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Every readable execution file; unparsable files are skipped
    fn load_all(&self) -> Result<Vec<Execution>, StoreError> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut executions = Vec::new();
        for dir in fs::read_dir(&self.base_dir)? {
            let dir = dir?;
            if !dir.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(dir.path())? {
                let path = entry?.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    match Self::load_from_path(&path) {
                        Ok(execution) => executions.push(execution),
                        Err(e) => debug!("Failed to load {}: {}", path.display(), e),
                    }
                }
            }
        }
        Ok(executions)
    }

    fn find(&self, id: &str) -> Result<Execution, StoreError> {
        self.load_all()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn modify<F>(&self, id: &str, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Execution) -> Result<(), StoreError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut execution = self.find(id)?;
        change(&mut execution)?;
        let path = self.execution_path(&execution.test_name, &execution.name);
        self.write(&path, &execution, false)
    }
}

/// Keep names usable as a single path component
fn file_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[async_trait]
impl ExecutionStore for FileExecutionStore {
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(self.test_dir(&execution.test_name))?;

        let path = self.execution_path(&execution.test_name, &execution.name);
        match self.write(&path, execution, true) {
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::Conflict {
                    test: execution.test_name.clone(),
                    name: execution.name.clone(),
                })
            }
            Err(e) => Err(e),
            Ok(()) => {
                info!("Saved execution {} to {}", execution.id, path.display());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Execution, StoreError> {
        let mut execution = self.find(id)?;
        execution.refresh_duration();
        Ok(execution)
    }

    async fn get_by_name_and_test(&self, name: &str, test: &str) -> Result<Execution, StoreError> {
        let path = self.execution_path(test, name);
        match Self::load_from_path(&path) {
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{test}/{name}")))
            }
            other => other,
        }
    }

    async fn get_latest_by_test(&self, test: &str) -> Result<Execution, StoreError> {
        let executions = self.load_all()?;
        latest_per_test(executions.iter(), &[test.to_string()])
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(test.to_string()))
    }

    async fn get_latest_by_tests(&self, tests: &[String]) -> Result<Vec<Execution>, StoreError> {
        let executions = self.load_all()?;
        Ok(latest_per_test(executions.iter(), tests))
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        let matched = self
            .load_all()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        Ok(filter.paginate(matched))
    }

    async fn update_result(&self, id: &str, result: &ExecutionResult) -> Result<(), StoreError> {
        let result = result.clone();
        self.modify(id, move |execution| Ok(execution.apply_result(result)?))
            .await
    }

    async fn start_execution(&self, id: &str, start_time: DateTime<Utc>) -> Result<(), StoreError> {
        self.modify(id, move |execution| Ok(execution.start_at(start_time)?))
            .await
    }

    async fn totals(&self, filter: &ExecutionFilter) -> Result<ExecutionsTotals, StoreError> {
        let executions = self.load_all()?;
        Ok(ExecutionsTotals::from_executions(
            executions.iter().filter(|e| filter.matches(e)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileExecutionStore) {
        let dir = TempDir::new().unwrap();
        let store = FileExecutionStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_insert_get_and_conflict() {
        let (_dir, store) = store();
        contract::insert_get_and_conflict(&store).await;
    }

    #[tokio::test]
    async fn test_lifecycle_updates() {
        let (_dir, store) = store();
        contract::lifecycle_updates(&store).await;
    }

    #[tokio::test]
    async fn test_listing_and_latest() {
        let (_dir, store) = store();
        contract::listing_and_latest(&store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_inserts() {
        let (_dir, store) = store();
        contract::concurrent_duplicate_inserts(Arc::new(store)).await;
    }

    #[tokio::test]
    async fn test_layout_on_disk() {
        let (dir, store) = store();
        let execution = contract::execution("api", "nightly-1");
        store.insert(&execution).await.unwrap();
        assert!(dir.path().join("api").join("nightly-1.json").exists());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let (dir, store) = store();
        let execution = contract::execution("api", "persisted");
        store.insert(&execution).await.unwrap();
        drop(store);

        let reopened = FileExecutionStore::new(dir.path());
        assert_eq!(reopened.get(&execution.id).await.unwrap().name, "persisted");
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileExecutionStore::new(dir.path().join("nothing-here"));
        let listed = store.list(&ExecutionFilter::default()).await.unwrap();
        assert!(listed.is_empty());
        assert!(store.get("abc").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_file_component() {
        assert_eq!(file_component("suite/run"), "suite_run");
        assert_eq!(file_component("../etc"), "_etc");
        assert_eq!(file_component("plain-name"), "plain-name");
    }
}
