//! External text generator.
//!
//! The generator is opaque: it receives prompts plus a JSON schema and
//! returns a JSON value. `parse_analysis` decides whether that value is a
//! usable analysis before anything else touches it.

use crate::error::GenerationError;
use crate::models::{
    AnalysisRecommendation, ComparisonAnalysis, ComparisonRow, GeneratorConfig, ProgramAssessment,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub response_schema: Value,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait AnalysisGenerator: Send + Sync {
    /// Produce a JSON object for `request`. Implementations should stop
    /// work once `cancel` fires; the caller has already given up on them.
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<Value, GenerationError>;
}

fn assessment_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["strengths", "challenges", "suitabilityScore", "careerProspects"],
        "properties": {
            "strengths": { "type": "array", "items": { "type": "string" } },
            "challenges": { "type": "array", "items": { "type": "string" } },
            "suitabilityScore": { "type": "number", "minimum": 0, "maximum": 10 },
            "careerProspects": { "type": "array", "items": { "type": "string" } }
        }
    })
}

/// JSON schema sent with every request. Mirrors `GeneratedAnalysis`.
pub fn analysis_schema(code_a: &str, code_b: &str) -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["overview", "program1", "program2", "recommendation", "programComparison"],
        "properties": {
            "overview": { "type": "string" },
            "program1": assessment_schema(),
            "program2": assessment_schema(),
            "recommendation": {
                "type": "object",
                "additionalProperties": false,
                "required": ["preferred", "reasoning", "actionSteps"],
                "properties": {
                    "preferred": { "type": "string", "enum": [code_a, code_b] },
                    "reasoning": { "type": "string" },
                    "actionSteps": { "type": "array", "items": { "type": "string" } }
                }
            },
            "programComparison": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["aspect", "program1", "program2"],
                    "properties": {
                        "aspect": { "type": "string" },
                        "program1": { "type": "string" },
                        "program2": { "type": "string" }
                    }
                }
            }
        }
    })
}

/// Shape the generator must return. Unknown fields are rejected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GeneratedAnalysis {
    overview: String,
    program1: ProgramAssessment,
    program2: ProgramAssessment,
    recommendation: AnalysisRecommendation,
    program_comparison: Vec<ComparisonRow>,
}

fn check_assessment(label: &str, assessment: &ProgramAssessment) -> Result<(), GenerationError> {
    let score = assessment.suitability_score;
    if !score.is_finite() || !(0.0..=10.0).contains(&score) {
        return Err(GenerationError::Schema(format!(
            "{}.suitabilityScore out of range: {}",
            label, score
        )));
    }
    Ok(())
}

/// Strictly validate a generator response against the analysis shape.
pub fn parse_analysis(
    value: Value,
    code_a: &str,
    code_b: &str,
) -> Result<ComparisonAnalysis, GenerationError> {
    let generated: GeneratedAnalysis =
        serde_json::from_value(value).map_err(|e| GenerationError::Schema(e.to_string()))?;

    if generated.overview.trim().is_empty() {
        return Err(GenerationError::Schema("empty overview".to_string()));
    }
    check_assessment("program1", &generated.program1)?;
    check_assessment("program2", &generated.program2)?;

    let preferred = generated.recommendation.preferred.trim();
    let preferred = if preferred.eq_ignore_ascii_case(code_a.trim()) {
        code_a.to_string()
    } else if preferred.eq_ignore_ascii_case(code_b.trim()) {
        code_b.to_string()
    } else {
        return Err(GenerationError::Schema(format!(
            "preferred program '{}' is neither {} nor {}",
            preferred, code_a, code_b
        )));
    };

    Ok(ComparisonAnalysis {
        overview: generated.overview,
        program1: generated.program1,
        program2: generated.program2,
        recommendation: AnalysisRecommendation {
            preferred,
            ..generated.recommendation
        },
        program_comparison: generated.program_comparison,
        is_fallback: false,
        insights: None,
    })
}

/// Generator backed by an OpenAI-compatible chat completions API
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            model,
            api_key,
        }
    }

    /// Build from configuration, reading the key from the configured
    /// environment variable
    pub fn from_config(config: &GeneratorConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        Self::new(config.endpoint.clone(), config.model.clone(), api_key)
    }

    async fn send(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "comparison_analysis",
                    "strict": true,
                    "schema": request.response_schema,
                }
            }
        });

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(ref key) = self.api_key {
            http = http.bearer_auth(key);
        }

        let response: Value = http.send().await?.error_for_status()?.json().await?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GenerationError::Schema("response has no message content".to_string()))?;
        debug!("Generator returned {} chars", content.len());

        serde_json::from_str(content).map_err(|e| GenerationError::Schema(e.to_string()))
    }
}

#[async_trait]
impl AnalysisGenerator for HttpGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<Value, GenerationError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = self.send(request) => result,
        }
    }
}
