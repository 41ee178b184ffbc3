//! Comparison record persistence.
//!
//! Stores are explicit handles: open one, pass it to the orchestrator, close
//! it on shutdown. `attach_analysis` is a conditional write that only
//! succeeds while the record is still pending.

use crate::error::StoreError;
use crate::models::{ComparisonAnalysis, ComparisonRecord, ComparisonRequest, ComparisonStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of a conditional attach
#[derive(Debug, Clone, PartialEq)]
pub enum AttachOutcome {
    /// The record was pending and now holds the analysis
    Attached(ComparisonRecord),
    /// Another writer completed the record first; it is returned unchanged
    AlreadyCompleted(ComparisonRecord),
}

impl AttachOutcome {
    pub fn into_record(self) -> ComparisonRecord {
        match self {
            AttachOutcome::Attached(record) | AttachOutcome::AlreadyCompleted(record) => record,
        }
    }
}

#[async_trait]
pub trait ComparisonStore: Send + Sync {
    async fn create(&self, request: ComparisonRequest) -> StoreResult<ComparisonRecord>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<ComparisonRecord>>;

    async fn attach_analysis(
        &self,
        id: Uuid,
        analysis: ComparisonAnalysis,
    ) -> StoreResult<AttachOutcome>;
}

type Records = HashMap<Uuid, ComparisonRecord>;

/// Apply the pending -> completed transition to a record set
fn apply_attach(records: &mut Records, id: Uuid, analysis: ComparisonAnalysis) -> StoreResult<AttachOutcome> {
    let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
    if record.status == ComparisonStatus::Completed {
        return Ok(AttachOutcome::AlreadyCompleted(record.clone()));
    }
    record.analysis = Some(analysis);
    record.status = ComparisonStatus::Completed;
    record.updated_at = Utc::now();
    Ok(AttachOutcome::Attached(record.clone()))
}

/// In-process store. `None` state means the handle was closed.
pub struct MemoryStore {
    records: Mutex<Option<Records>>,
}

impl MemoryStore {
    pub fn open() -> Self {
        Self {
            records: Mutex::new(Some(HashMap::new())),
        }
    }

    pub async fn close(&self) {
        *self.records.lock().await = None;
    }

    pub async fn len(&self) -> StoreResult<usize> {
        let guard = self.records.lock().await;
        Ok(guard.as_ref().ok_or(StoreError::Closed)?.len())
    }
}

#[async_trait]
impl ComparisonStore for MemoryStore {
    async fn create(&self, request: ComparisonRequest) -> StoreResult<ComparisonRecord> {
        let mut guard = self.records.lock().await;
        let records = guard.as_mut().ok_or(StoreError::Closed)?;
        let record = ComparisonRecord::new(request);
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<ComparisonRecord>> {
        let guard = self.records.lock().await;
        Ok(guard.as_ref().ok_or(StoreError::Closed)?.get(&id).cloned())
    }

    async fn attach_analysis(
        &self,
        id: Uuid,
        analysis: ComparisonAnalysis,
    ) -> StoreResult<AttachOutcome> {
        let mut guard = self.records.lock().await;
        let records = guard.as_mut().ok_or(StoreError::Closed)?;
        apply_attach(records, id, analysis)
    }
}

/// JSON file store. Every mutation rewrites the file before the in-memory
/// copy changes, so a failed write leaves both untouched.
pub struct FileStore {
    path: PathBuf,
    records: Mutex<Option<Records>>,
}

impl FileStore {
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records: Records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => {
                let list: Vec<ComparisonRecord> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|r| (r.id, r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!("Opened comparison store {} ({} records)", path.display(), records.len());
        Ok(Self {
            path,
            records: Mutex::new(Some(records)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the handle
    pub async fn close(&self) -> StoreResult<()> {
        let mut guard = self.records.lock().await;
        if let Some(records) = guard.as_ref() {
            write_snapshot(&self.path, records).await?;
        }
        *guard = None;
        debug!("Closed comparison store {}", self.path.display());
        Ok(())
    }
}

async fn write_snapshot(path: &Path, records: &Records) -> StoreResult<()> {
    let mut list: Vec<&ComparisonRecord> = records.values().collect();
    list.sort_by_key(|r| (r.created_at, r.id));
    let json = serde_json::to_vec_pretty(&list)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ComparisonStore for FileStore {
    async fn create(&self, request: ComparisonRequest) -> StoreResult<ComparisonRecord> {
        let mut guard = self.records.lock().await;
        let records = guard.as_mut().ok_or(StoreError::Closed)?;

        let record = ComparisonRecord::new(request);
        let mut next = records.clone();
        next.insert(record.id, record.clone());
        write_snapshot(&self.path, &next).await?;
        *records = next;
        Ok(record)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<ComparisonRecord>> {
        let guard = self.records.lock().await;
        Ok(guard.as_ref().ok_or(StoreError::Closed)?.get(&id).cloned())
    }

    async fn attach_analysis(
        &self,
        id: Uuid,
        analysis: ComparisonAnalysis,
    ) -> StoreResult<AttachOutcome> {
        let mut guard = self.records.lock().await;
        let records = guard.as_mut().ok_or(StoreError::Closed)?;

        let mut next = records.clone();
        let outcome = apply_attach(&mut next, id, analysis)?;
        if let AttachOutcome::Attached(_) = outcome {
            write_snapshot(&self.path, &next).await?;
            *records = next;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::fallback_analysis;
    use crate::models::{Gender, Program, SessionType, StudentProfile};
    use crate::score::{Grades, Track};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn request() -> ComparisonRequest {
        let program = |code: &str, cutoff: f64| Program {
            code: code.to_string(),
            name: format!("Licence {}", code),
            institution: "IHEC".to_string(),
            university: "Université de Carthage".to_string(),
            region: "Tunis".to_string(),
            specialization: None,
            hub: Vec::new(),
            cutoffs: BTreeMap::from([(2024, cutoff)]),
        };
        ComparisonRequest {
            program_a: program("X1", 120.0),
            program_b: program("X2", 125.0),
            profile: StudentProfile {
                track: Track::EconomieGestion,
                grades: Grades::new(),
                region: "Tunis".to_string(),
                birth_date: NaiveDate::from_ymd_opt(2006, 1, 20).unwrap(),
                gender: Gender::Female,
                session: SessionType::Controle,
                score_override: Some(122.0),
            },
            year: 2024,
        }
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryStore::open();
        let record = store.create(request()).await.unwrap();
        assert_eq!(record.status, ComparisonStatus::Pending);
        assert!(record.analysis.is_none());

        let fetched = store.get_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);

        let analysis = fallback_analysis(&record.request);
        let outcome = store.attach_analysis(record.id, analysis.clone()).await.unwrap();
        assert!(matches!(outcome, AttachOutcome::Attached(_)));

        let completed = store.get_by_id(record.id).await.unwrap().unwrap();
        assert!(completed.is_completed());
        assert_eq!(completed.analysis, Some(analysis));
    }

    #[tokio::test]
    async fn test_second_attach_does_not_overwrite() {
        let store = MemoryStore::open();
        let record = store.create(request()).await.unwrap();

        let first = fallback_analysis(&record.request);
        store.attach_analysis(record.id, first.clone()).await.unwrap();

        let mut second = first.clone();
        second.overview = "something else".to_string();
        let outcome = store.attach_analysis(record.id, second).await.unwrap();
        match outcome {
            AttachOutcome::AlreadyCompleted(existing) => assert_eq!(existing.analysis, Some(first)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let store = MemoryStore::open();
        let id = Uuid::new_v4();
        assert!(store.get_by_id(id).await.unwrap().is_none());
        let err = store
            .attach_analysis(id, fallback_analysis(&request()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = MemoryStore::open();
        store.close().await;
        assert!(matches!(store.create(request()).await, Err(StoreError::Closed)));
        assert!(matches!(store.len().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("comparisons.json");

        let store = FileStore::open(&path).await.unwrap();
        let record = store.create(request()).await.unwrap();
        store
            .attach_analysis(record.id, fallback_analysis(&record.request))
            .await
            .unwrap();
        store.close().await.unwrap();
        assert!(matches!(store.get_by_id(record.id).await, Err(StoreError::Closed)));

        let reopened = FileStore::open(&path).await.unwrap();
        let loaded = reopened.get_by_id(record.id).await.unwrap().unwrap();
        assert!(loaded.is_completed());
        assert_eq!(loaded.request, record.request);
    }
}
