//! Comparison orchestration.
//!
//! A record moves `Pending -> Completed` exactly once. `generate` holds a
//! per-id lease for its whole duration, races the generator against the
//! configured budget, falls back to the deterministic analysis on any
//! generation failure, enriches, and persists with a conditional write.
//! When persistence fails the finished analysis is kept in memory so that
//! a retry only repeats the write, never the generator call.

use crate::enrich::enrich;
use crate::error::{Error, GenerationError, Result, StoreError};
use crate::fallback::fallback_analysis;
use crate::generator::{parse_analysis, AnalysisGenerator};
use crate::models::{
    ComparisonAnalysis, ComparisonRecord, ComparisonRequest, GeneratorConfig, OrchestratorConfig,
    Program, StudentProfile,
};
use crate::prompt::build_generation_request;
use crate::score::{validate_grades, MAX_SCORE};
use crate::store::{AttachOutcome, ComparisonStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub year: u16,
    pub generation_timeout: Duration,
    pub max_context_chars: usize,
    pub persist_attempts: u32,
    pub persist_backoff: Duration,
    pub generator: GeneratorConfig,
}

impl OrchestratorSettings {
    pub fn new(year: u16, orchestrator: &OrchestratorConfig, generator: &GeneratorConfig) -> Self {
        Self {
            year,
            generation_timeout: Duration::from_secs(orchestrator.generation_timeout_secs),
            max_context_chars: orchestrator.max_context_chars,
            persist_attempts: orchestrator.persist_attempts.max(1),
            persist_backoff: Duration::from_millis(orchestrator.persist_backoff_ms),
            generator: generator.clone(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::new(2024, &OrchestratorConfig::default(), &GeneratorConfig::default())
    }
}

/// Per-id async locks. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
struct LeaseTable {
    leases: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl LeaseTable {
    fn lease(&self, id: Uuid) -> LeaseGuard<'_> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let lock = leases.entry(id).or_default().clone();
        LeaseGuard {
            table: self,
            id,
            lock,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.leases.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A claim on one id's lock. Dropping it, including when the owning future
/// is dropped mid-flight, removes the table entry once no other claim remains.
struct LeaseGuard<'a> {
    table: &'a LeaseTable,
    id: Uuid,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl LeaseGuard<'_> {
    async fn acquire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        let mut leases = self.table.leases.lock().unwrap_or_else(|e| e.into_inner());
        // The table's copy plus ours; new claims are only handed out under this mutex.
        let unclaimed = leases
            .get(&self.id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2);
        if unclaimed {
            leases.remove(&self.id);
        }
    }
}

pub struct ComparisonOrchestrator {
    store: Arc<dyn ComparisonStore>,
    generator: Arc<dyn AnalysisGenerator>,
    settings: OrchestratorSettings,
    leases: LeaseTable,
    /// Analyses whose persistence failed, waiting for a write retry.
    /// An entry lives until `generate(id)` persists it or the record is found
    /// completed, or until `discard_unpersisted(id)` drops it.
    unpersisted: Mutex<HashMap<Uuid, ComparisonAnalysis>>,
}

impl ComparisonOrchestrator {
    pub fn new(
        store: Arc<dyn ComparisonStore>,
        generator: Arc<dyn AnalysisGenerator>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            generator,
            settings,
            leases: LeaseTable::default(),
            unpersisted: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Validate and create a pending comparison record
    pub async fn submit(
        &self,
        program_a: Program,
        program_b: Program,
        profile: StudentProfile,
    ) -> Result<Uuid> {
        let request = ComparisonRequest {
            program_a,
            program_b,
            profile,
            year: self.settings.year,
        };
        validate_request(&request)?;

        let record = self.store.create(request).await?;
        info!(
            "Created comparison {} ({} vs {})",
            record.id, record.request.program_a.code, record.request.program_b.code
        );
        Ok(record.id)
    }

    /// Current state of a record. The analysis stays `None` until generation completes.
    pub async fn fetch(&self, id: Uuid) -> Result<ComparisonRecord> {
        self.store.get_by_id(id).await?.ok_or(Error::NotFound(id))
    }

    /// Produce and persist the analysis for `id`, or return the one already stored.
    pub async fn generate(&self, id: Uuid) -> Result<ComparisonAnalysis> {
        let lease = self.leases.lease(id);
        let _held = lease.acquire().await;
        self.generate_locked(id).await
    }

    /// Run `generate` on the runtime and hand back its handle
    pub fn spawn_generate(self: &Arc<Self>, id: Uuid) -> JoinHandle<Result<ComparisonAnalysis>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.generate(id).await })
    }

    pub async fn submit_and_generate(
        self: &Arc<Self>,
        program_a: Program,
        program_b: Program,
        profile: StudentProfile,
    ) -> Result<(Uuid, JoinHandle<Result<ComparisonAnalysis>>)> {
        let id = self.submit(program_a, program_b, profile).await?;
        Ok((id, self.spawn_generate(id)))
    }

    async fn generate_locked(&self, id: Uuid) -> Result<ComparisonAnalysis> {
        // Step 1: A completed record is returned as stored
        let record = self.store.get_by_id(id).await?.ok_or(Error::NotFound(id))?;
        if let Some(analysis) = record.analysis {
            debug!("Comparison {} already completed", id);
            self.take_unpersisted(id);
            return Ok(analysis);
        }

        // Step 2: Reuse an analysis whose write failed, otherwise generate one
        let analysis = match self.take_unpersisted(id) {
            Some(analysis) => {
                info!("Retrying persistence of comparison {}", id);
                analysis
            }
            None => {
                let analysis = self.produce_analysis(&record.request).await;
                enrich(analysis, &record.request)
            }
        };

        // Step 3: Persist, keeping the analysis for a retry if the store fails
        match self.persist(id, analysis.clone()).await {
            Ok(stored) => Ok(stored),
            Err(e @ Error::Store(_)) => {
                self.unpersisted
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(id, analysis);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the analysis kept for a failed write. A later `generate(id)`
    /// will then call the generator again. Returns whether one was kept.
    pub fn discard_unpersisted(&self, id: Uuid) -> bool {
        let discarded = self.take_unpersisted(id).is_some();
        if discarded {
            debug!("Discarded unpersisted analysis for comparison {}", id);
        }
        discarded
    }

    /// Number of analyses waiting for a write retry
    pub fn unpersisted_count(&self) -> usize {
        self.unpersisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn take_unpersisted(&self, id: Uuid) -> Option<ComparisonAnalysis> {
        self.unpersisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    /// Generated analysis when the generator answers in time with a valid
    /// shape, fallback otherwise. Never fails.
    async fn produce_analysis(&self, request: &ComparisonRequest) -> ComparisonAnalysis {
        match self.call_generator(request).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(
                    "Generation failed for {} vs {}, using fallback: {}",
                    request.program_a.code, request.program_b.code, e
                );
                fallback_analysis(request)
            }
        }
    }

    async fn call_generator(
        &self,
        request: &ComparisonRequest,
    ) -> std::result::Result<ComparisonAnalysis, GenerationError> {
        let generation = build_generation_request(
            request,
            &self.settings.generator,
            self.settings.max_context_chars,
        );
        let cancel = CancellationToken::new();
        let budget = self.settings.generation_timeout;

        let value = tokio::select! {
            result = self.generator.generate(&generation, cancel.clone()) => result?,
            _ = tokio::time::sleep(budget) => {
                cancel.cancel();
                return Err(GenerationError::Timeout(budget));
            }
        };

        parse_analysis(value, &request.program_a.code, &request.program_b.code)
    }

    async fn persist(&self, id: Uuid, analysis: ComparisonAnalysis) -> Result<ComparisonAnalysis> {
        let attempts = self.settings.persist_attempts.max(1);
        let mut last_error: Option<StoreError> = None;

        for attempt in 1..=attempts {
            // Conditional write: a record completed elsewhere is never overwritten
            match self.store.attach_analysis(id, analysis.clone()).await {
                Ok(AttachOutcome::Attached(_)) => {
                    info!(
                        "Comparison {} completed (fallback: {})",
                        id, analysis.is_fallback
                    );
                    return Ok(analysis);
                }
                Ok(AttachOutcome::AlreadyCompleted(record)) => {
                    warn!("Comparison {} was completed by another writer", id);
                    return record.analysis.ok_or(Error::NotFound(id));
                }
                Err(StoreError::NotFound(_)) => return Err(Error::NotFound(id)),
                Err(e) => {
                    warn!(
                        "Persisting comparison {} failed (attempt {}/{}): {}",
                        id, attempt, attempts, e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.persist_backoff).await;
                    }
                }
            }
        }

        Err(Error::Store(last_error.unwrap_or(StoreError::Unavailable(
            "no persistence attempt made".to_string(),
        ))))
    }

    #[cfg(test)]
    fn lease_count(&self) -> usize {
        self.leases.len()
    }
}

fn validate_program(label: &str, program: &Program, year: u16) -> Result<()> {
    if program.code.trim().is_empty() {
        return Err(Error::Validation(format!("{} has no code", label)));
    }
    if program.name.trim().is_empty() {
        return Err(Error::Validation(format!("{} has no name", label)));
    }
    if program.cutoff(year).is_none() {
        return Err(Error::Validation(format!(
            "{} ({}) has no positive cutoff for {}",
            label, program.code, year
        )));
    }
    Ok(())
}

/// Checks run before a record is created
pub fn validate_request(request: &ComparisonRequest) -> Result<()> {
    if request.program_a.same_code(&request.program_b) {
        return Err(Error::Validation(format!(
            "cannot compare program {} with itself",
            request.program_a.code
        )));
    }
    validate_program("program A", &request.program_a, request.year)?;
    validate_program("program B", &request.program_b, request.year)?;

    let profile = &request.profile;
    if profile.region.trim().is_empty() {
        return Err(Error::Validation("student region is required".to_string()));
    }
    if profile.birth_date > Utc::now().date_naive() {
        return Err(Error::Validation(format!(
            "birth date {} is in the future",
            profile.birth_date
        )));
    }
    validate_grades(&profile.grades).map_err(Error::Validation)?;

    match profile.score_override {
        Some(score) if !score.is_finite() || !(0.0..=MAX_SCORE).contains(&score) => {
            return Err(Error::Validation(format!(
                "score must be between 0 and {}, got {}",
                MAX_SCORE, score
            )));
        }
        None if profile.grades.is_empty() => {
            return Err(Error::Validation(
                "grades or a score override are required".to_string(),
            ));
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gender, SessionType};
    use crate::score::{Grades, Track};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::Value;
    use std::collections::BTreeMap;

    struct FailingGenerator;

    #[async_trait]
    impl AnalysisGenerator for FailingGenerator {
        async fn generate(
            &self,
            _request: &crate::generator::GenerationRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<Value, GenerationError> {
            Err(GenerationError::Transport("offline".to_string()))
        }
    }

    /// Never answers on its own; only returns once cancelled
    struct StalledGenerator;

    #[async_trait]
    impl AnalysisGenerator for StalledGenerator {
        async fn generate(
            &self,
            _request: &crate::generator::GenerationRequest,
            cancel: CancellationToken,
        ) -> std::result::Result<Value, GenerationError> {
            cancel.cancelled().await;
            Err(GenerationError::Cancelled)
        }
    }

    fn stalled_orchestrator() -> Arc<ComparisonOrchestrator> {
        let settings = OrchestratorSettings {
            generation_timeout: Duration::from_secs(60),
            ..OrchestratorSettings::default()
        };
        Arc::new(ComparisonOrchestrator::new(
            Arc::new(MemoryStore::open()),
            Arc::new(StalledGenerator),
            settings,
        ))
    }

    fn program(code: &str, cutoff: f64) -> Program {
        Program {
            code: code.to_string(),
            name: format!("Licence {}", code),
            institution: "ISG".to_string(),
            university: "Université de Tunis".to_string(),
            region: "Tunis".to_string(),
            specialization: None,
            hub: Vec::new(),
            cutoffs: BTreeMap::from([(2024, cutoff)]),
        }
    }

    fn profile() -> StudentProfile {
        StudentProfile {
            track: Track::EconomieGestion,
            grades: Grades::from([("economie".to_string(), 14.0)]),
            region: "Tunis".to_string(),
            birth_date: NaiveDate::from_ymd_opt(2006, 5, 5).unwrap(),
            gender: Gender::Male,
            session: SessionType::Principale,
            score_override: None,
        }
    }

    fn request(a: Program, b: Program, profile: StudentProfile) -> ComparisonRequest {
        ComparisonRequest { program_a: a, program_b: b, profile, year: 2024 }
    }

    #[test]
    fn test_same_program_rejected() {
        let err = validate_request(&request(program("A", 100.0), program(" a ", 100.0), profile()))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_missing_cutoff_rejected() {
        let err = validate_request(&request(program("A", 100.0), program("B", 0.0), profile()))
            .unwrap_err();
        assert!(err.to_string().contains("cutoff"));
    }

    #[test]
    fn test_score_override_range() {
        let mut p = profile();
        p.score_override = Some(250.0);
        assert!(validate_request(&request(program("A", 100.0), program("B", 110.0), p.clone())).is_err());
        p.score_override = Some(200.0);
        assert!(validate_request(&request(program("A", 100.0), program("B", 110.0), p)).is_ok());
    }

    #[test]
    fn test_profile_fields_required() {
        let mut p = profile();
        p.region = "  ".to_string();
        assert!(validate_request(&request(program("A", 100.0), program("B", 110.0), p)).is_err());

        let mut p = profile();
        p.grades.clear();
        assert!(validate_request(&request(program("A", 100.0), program("B", 110.0), p)).is_err());

        let mut p = profile();
        p.grades.insert("gestion".to_string(), 21.0);
        assert!(validate_request(&request(program("A", 100.0), program("B", 110.0), p)).is_err());

        let mut p = profile();
        p.birth_date = Utc::now().date_naive() + chrono::Duration::days(2);
        assert!(validate_request(&request(program("A", 100.0), program("B", 110.0), p)).is_err());
    }

    #[tokio::test]
    async fn test_leases_are_released() {
        let orchestrator = ComparisonOrchestrator::new(
            Arc::new(MemoryStore::open()),
            Arc::new(FailingGenerator),
            OrchestratorSettings::default(),
        );
        let id = orchestrator
            .submit(program("A", 100.0), program("B", 110.0), profile())
            .await
            .unwrap();
        let analysis = orchestrator.generate(id).await.unwrap();
        assert!(analysis.is_fallback);
        assert_eq!(orchestrator.lease_count(), 0);

        assert!(matches!(
            orchestrator.generate(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(orchestrator.lease_count(), 0);
    }

    #[tokio::test]
    async fn test_aborted_generate_releases_lease() {
        let orchestrator = stalled_orchestrator();
        let id = orchestrator
            .submit(program("A", 100.0), program("B", 110.0), profile())
            .await
            .unwrap();

        let handle = orchestrator.spawn_generate(id);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(orchestrator.lease_count(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(orchestrator.lease_count(), 0);
        assert!(orchestrator.fetch(id).await.unwrap().analysis.is_none());
    }

    #[tokio::test]
    async fn test_timed_out_caller_releases_lease_for_waiters() {
        let orchestrator = stalled_orchestrator();
        let id = orchestrator
            .submit(program("A", 100.0), program("B", 110.0), profile())
            .await
            .unwrap();

        // The first caller holds the lock, the second waits on it; both give up.
        let first = orchestrator.generate(id);
        let second = orchestrator.generate(id);
        let joined = tokio::time::timeout(Duration::from_millis(50), async {
            tokio::join!(first, second)
        })
        .await;
        assert!(joined.is_err());
        assert_eq!(orchestrator.lease_count(), 0);
    }
}
