//! JSON File Store
//!
//! Persists each run's samples to `{dir}/{encoded run_id}.json`. The
//! document is rewritten in full on every append by writing a temporary
//! file and renaming it over the old one; a missing file means an empty run.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::MetricsStore;
use crate::error::StoreError;
use crate::monitoring::MetricsSample;

/// Document written for each run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunDocument {
    /// Run this document belongs to
    pub run_id: String,

    /// Samples in append order
    pub steps: Vec<MetricsSample>,

    /// Last time a sample was appended
    pub updated_at: DateTime<Utc>,
}

impl RunDocument {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            steps: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Stores run documents as pretty-printed JSON files in a directory.
#[derive(Debug)]
pub struct JsonFileMetricsStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileMetricsStore {
    /// Creates a store rooted at `dir`. The directory is created on the
    /// first append.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the document path for a run.
    ///
    /// Bytes outside `[A-Za-z0-9-]` are written as `_` plus two hex digits,
    /// so distinct run ids never share a file.
    pub fn document_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_run_id(run_id)))
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunDocument>, StoreError> {
        let path = self.document_path(run_id);
        let document: RunDocument = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if document.run_id != run_id {
            return Err(StoreError::RunMismatch {
                path: path.display().to_string(),
                expected: run_id.to_string(),
                found: document.run_id,
            });
        }
        Ok(Some(document))
    }

    async fn save(&self, path: &Path, document: &RunDocument) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(document)?;
        let staging = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        fs::write(&staging, content).await?;
        if let Err(e) = fs::rename(&staging, path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn encode_run_id(run_id: &str) -> String {
    let mut stem = String::with_capacity(run_id.len());
    for byte in run_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}

#[async_trait]
impl MetricsStore for JsonFileMetricsStore {
    async fn append(&self, run_id: &str, sample: &MetricsSample) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut document = self
            .load(run_id)
            .await?
            .unwrap_or_else(|| RunDocument::new(run_id));
        document.steps.push(sample.clone());
        document.updated_at = Utc::now();

        fs::create_dir_all(&self.dir).await?;
        let path = self.document_path(run_id);
        self.save(&path, &document).await?;

        debug!("Saved {} samples to {}", document.steps.len(), path.display());
        Ok(())
    }

    async fn fetch(&self, run_id: &str) -> Result<Vec<MetricsSample>, StoreError> {
        Ok(self.load(run_id).await?.map(|d| d.steps).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample(step: &str) -> MetricsSample {
        MetricsSample::new(step, "desc", Duration::from_millis(25), 2048)
    }

    #[test]
    fn test_document_path_encoded() {
        let store = JsonFileMetricsStore::new("/tmp/metrics");
        assert_eq!(
            store.document_path("run-1"),
            PathBuf::from("/tmp/metrics/run-1.json")
        );
        assert_eq!(
            store.document_path("../etc/passwd"),
            PathBuf::from("/tmp/metrics/_2e_2e_2fetc_2fpasswd.json")
        );
        assert_ne!(store.document_path("a.b"), store.document_path("a_b"));
        assert_ne!(store.document_path("a_b"), store.document_path("a_5fb"));
    }

    #[tokio::test]
    async fn test_similar_run_ids_kept_apart() {
        let temp_dir = tempdir().unwrap();
        let store = JsonFileMetricsStore::new(temp_dir.path());

        store.append("a.b", &sample("dotted")).await.unwrap();
        store.append("a_b", &sample("underscored")).await.unwrap();

        let dotted: Vec<String> = store.fetch("a.b").await.unwrap().into_iter().map(|s| s.step).collect();
        let underscored: Vec<String> = store.fetch("a_b").await.unwrap().into_iter().map(|s| s.step).collect();
        assert_eq!(dotted, vec!["dotted"]);
        assert_eq!(underscored, vec!["underscored"]);
    }

    #[tokio::test]
    async fn test_document_for_other_run_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = JsonFileMetricsStore::new(temp_dir.path());
        let foreign = RunDocument::new("someone-else");
        std::fs::write(
            store.document_path("r1"),
            serde_json::to_string(&foreign).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            store.fetch("r1").await,
            Err(StoreError::RunMismatch { ref found, .. }) if found == "someone-else"
        ));
        assert!(store.append("r1", &sample("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_append_leaves_no_staging_files() {
        let temp_dir = tempdir().unwrap();
        let store = JsonFileMetricsStore::new(temp_dir.path());

        store.append("r1", &sample("a")).await.unwrap();
        store.append("r1", &sample("b")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["r1.json"]);
    }

    #[tokio::test]
    async fn test_fetch_missing_run() {
        let temp_dir = tempdir().unwrap();
        let store = JsonFileMetricsStore::new(temp_dir.path());

        assert!(store.fetch("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_creates_directory_and_document() {
        let temp_dir = tempdir().unwrap();
        let store = JsonFileMetricsStore::new(temp_dir.path().join("nested"));

        store.append("r1", &sample("a")).await.unwrap();
        store.append("r1", &sample("b")).await.unwrap();

        let content = std::fs::read_to_string(store.document_path("r1")).unwrap();
        let document: RunDocument = serde_json::from_str(&content).unwrap();
        assert_eq!(document.run_id, "r1");
        assert_eq!(document.steps.len(), 2);

        let steps: Vec<String> = store.fetch("r1").await.unwrap().into_iter().map(|s| s.step).collect();
        assert_eq!(steps, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let store = JsonFileMetricsStore::new(temp_dir.path());
        std::fs::write(store.document_path("bad"), "not json").unwrap();

        assert!(matches!(
            store.fetch("bad").await,
            Err(StoreError::Serialization(_))
        ));
        assert!(store.append("bad", &sample("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_kept() {
        let temp_dir = tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileMetricsStore::new(temp_dir.path()));

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { store.append("shared", &sample(&format!("s{}", i))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.fetch("shared").await.unwrap().len(), 10);
    }
}
