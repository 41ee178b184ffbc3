//! Derived sections attached to every analysis, generated or fallback.
//!
//! Nothing here comes from the generator: admissibility, the score tier,
//! the gap to the highest cutoff, relocation and the calendar are all
//! computed from the request.

use crate::models::{ComparisonAnalysis, ComparisonRequest, Program};
use crate::score::{score_level, ScoreLevel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramInsight {
    pub code: String,
    pub cutoff: f64,
    pub admissible: bool,
    /// Student score minus cutoff
    pub margin: f64,
    pub requires_relocation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub phase: String,
    pub period: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionInsights {
    pub student_score: f64,
    pub year: u16,
    pub score_tier: ScoreLevel,
    pub score_tier_label: String,
    pub program1: ProgramInsight,
    pub program2: ProgramInsight,
    pub points_needed: f64,
    pub calendar: Vec<CalendarEntry>,
}

fn program_insight(program: &Program, cutoff: f64, score: f64, region: &str) -> ProgramInsight {
    ProgramInsight {
        code: program.code.clone(),
        cutoff,
        admissible: score >= cutoff,
        margin: score - cutoff,
        requires_relocation: !program.serves_region(region),
    }
}

pub fn admission_calendar() -> Vec<CalendarEntry> {
    [
        ("BAC results", "Late June", "Publication of the main session results."),
        ("Resit session", "Early July", "Resit session for students who did not pass the main session."),
        ("Orientation, round 1", "Mid July", "Submit the ordered list of program choices."),
        ("Orientation, round 2", "Early August", "Second round for unassigned students and places left open."),
        ("Reorientation", "September", "Requests to change the assigned program."),
        ("Enrollment", "September", "Enrollment at the assigned institution."),
    ]
    .into_iter()
    .map(|(phase, period, description)| CalendarEntry {
        phase: phase.to_string(),
        period: period.to_string(),
        description: description.to_string(),
    })
    .collect()
}

pub fn build_insights(request: &ComparisonRequest) -> AdmissionInsights {
    let score = request.student_score();
    let region = &request.profile.region;
    let cutoff_a = request.cutoff_a();
    let cutoff_b = request.cutoff_b();
    let tier = score_level(score);

    AdmissionInsights {
        student_score: score,
        year: request.year,
        score_tier: tier,
        score_tier_label: tier.label().to_string(),
        program1: program_insight(&request.program_a, cutoff_a, score, region),
        program2: program_insight(&request.program_b, cutoff_b, score, region),
        points_needed: (cutoff_a.max(cutoff_b) - score).max(0.0),
        calendar: admission_calendar(),
    }
}

/// Replace any insights on `analysis` with ones derived from `request`
pub fn enrich(mut analysis: ComparisonAnalysis, request: &ComparisonRequest) -> ComparisonAnalysis {
    analysis.insights = Some(build_insights(request));
    analysis
}
