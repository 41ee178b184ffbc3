//! BAC admission scoring, program ranking and two-program comparisons.

pub mod analyzer;
pub mod catalog;
pub mod enrich;
pub mod error;
pub mod fallback;
pub mod generator;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod score;
pub mod store;

pub use analyzer::{AdmissionChance, ProgramFilter, RankedProgram, RecommendationFilter, SortOrder};
pub use error::{Error, GenerationError, Result, StoreError};
pub use generator::{AnalysisGenerator, GenerationRequest, HttpGenerator};
pub use models::{
    ComparisonAnalysis, ComparisonRecord, ComparisonRequest, ComparisonStatus, Config, Program,
    StudentProfile,
};
pub use orchestrator::{ComparisonOrchestrator, OrchestratorSettings};
pub use score::{compute_score, score_level, Grades, ScoreLevel, ScoreResult, Track};
pub use store::{AttachOutcome, ComparisonStore, FileStore, MemoryStore};
