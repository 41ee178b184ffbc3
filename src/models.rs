use crate::enrich::AdmissionInsights;
use crate::error::{Error, Result};
use crate::score::{compute_score, Grades, ScoreResult, Track};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Admission year whose cutoffs are used for ranking and comparisons
    pub reference_year: u16,
    pub catalog_path: String,
    pub store_path: String,
    pub log_level: String,
    pub orchestrator: OrchestratorConfig,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub generation_timeout_secs: u64,
    pub max_context_chars: usize,
    pub persist_attempts: u32,
    pub persist_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL of an OpenAI-compatible API
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_year: 2024,
            catalog_path: "data/programs.csv".to_string(),
            store_path: "data/comparisons.json".to_string(),
            log_level: "info".to_string(),
            orchestrator: OrchestratorConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            generation_timeout_secs: 15,
            max_context_chars: 4000,
            persist_attempts: 3,
            persist_backoff_ms: 200,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file_path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", file_path, e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {}", file_path, e)))?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(file_path, content)
            .map_err(|e| Error::Config(format!("cannot write {}: {}", file_path, e)))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// BAC exam session the grades come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Principale,
    Controle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub track: Track,
    pub grades: Grades,
    pub region: String,
    pub birth_date: NaiveDate,
    pub gender: Gender,
    pub session: SessionType,
    /// Manually entered FG, replaces the computed score when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_override: Option<f64>,
}

impl StudentProfile {
    pub fn score(&self) -> ScoreResult {
        compute_score(&self.grades, self.track)
    }

    /// Score compared against program cutoffs
    pub fn admission_score(&self) -> f64 {
        self.score_override.unwrap_or_else(|| self.score().fg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub code: String,
    pub name: String,
    pub institution: String,
    pub university: String,
    pub region: String,
    #[serde(default)]
    pub specialization: Option<String>,
    /// Regions served without relocating. Empty means the program region only.
    #[serde(default)]
    pub hub: Vec<String>,
    /// Historical minimum admission score per year
    #[serde(default)]
    pub cutoffs: BTreeMap<u16, f64>,
}

impl Program {
    /// Cutoff for a year, only when it is a usable positive score
    pub fn cutoff(&self, year: u16) -> Option<f64> {
        self.cutoffs
            .get(&year)
            .copied()
            .filter(|c| c.is_finite() && *c > 0.0)
    }

    pub fn serves_region(&self, region: &str) -> bool {
        let region = region.trim();
        if self.hub.is_empty() {
            return self.region.trim().eq_ignore_ascii_case(region);
        }
        self.hub.iter().any(|r| r.trim().eq_ignore_ascii_case(region))
    }

    pub fn same_code(&self, other: &Program) -> bool {
        self.code.trim().eq_ignore_ascii_case(other.code.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRequest {
    pub program_a: Program,
    pub program_b: Program,
    pub profile: StudentProfile,
    pub year: u16,
}

impl ComparisonRequest {
    pub fn student_score(&self) -> f64 {
        self.profile.admission_score()
    }

    pub fn cutoff_a(&self) -> f64 {
        self.program_a.cutoff(self.year).unwrap_or(0.0)
    }

    pub fn cutoff_b(&self) -> f64 {
        self.program_b.cutoff(self.year).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProgramAssessment {
    pub strengths: Vec<String>,
    pub challenges: Vec<String>,
    pub suitability_score: f64,
    pub career_prospects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnalysisRecommendation {
    /// Code of the preferred program
    pub preferred: String,
    pub reasoning: String,
    pub action_steps: Vec<String>,
}

/// One aspect compared side by side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComparisonRow {
    pub aspect: String,
    pub program1: String,
    pub program2: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonAnalysis {
    pub overview: String,
    pub program1: ProgramAssessment,
    pub program2: ProgramAssessment,
    pub recommendation: AnalysisRecommendation,
    pub program_comparison: Vec<ComparisonRow>,
    pub is_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<AdmissionInsights>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub id: Uuid,
    pub request: ComparisonRequest,
    pub analysis: Option<ComparisonAnalysis>,
    pub status: ComparisonStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComparisonRecord {
    pub fn new(request: ComparisonRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request,
            analysis: None,
            status: ComparisonStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ComparisonStatus::Completed
    }
}
