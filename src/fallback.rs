use crate::models::{
    AnalysisRecommendation, ComparisonAnalysis, ComparisonRequest, ComparisonRow, Program,
    ProgramAssessment,
};

const SUITABLE: f64 = 7.0;
const LESS_SUITABLE: f64 = 4.0;

fn assessment(program: &Program, clears_cutoff: bool) -> ProgramAssessment {
    let mut strengths = vec![
        format!("Offered by {} ({})", program.institution, program.university),
        format!("Located in {}", program.region),
    ];
    if clears_cutoff {
        strengths.push("Your score meets the last recorded cutoff".to_string());
    }

    let mut challenges = vec!["Cutoffs change from one year to the next".to_string()];
    if !clears_cutoff {
        challenges.push("Your score is below the last recorded cutoff".to_string());
    }

    ProgramAssessment {
        strengths,
        challenges,
        suitability_score: if clears_cutoff { SUITABLE } else { LESS_SUITABLE },
        career_prospects: vec![
            "Employment in the field of study".to_string(),
            "Further studies (master, engineering cycle)".to_string(),
            "Public sector competitive exams".to_string(),
        ],
    }
}

fn format_cutoff(cutoff: f64) -> String {
    format!("{:.2}", cutoff)
}

/// Deterministic analysis used when the generator fails, times out or
/// returns something unusable. Safe to recompute any number of times.
pub fn fallback_analysis(request: &ComparisonRequest) -> ComparisonAnalysis {
    let score = request.student_score();
    let a = &request.program_a;
    let b = &request.program_b;
    let cutoff_a = request.cutoff_a();
    let cutoff_b = request.cutoff_b();
    let clears_a = score >= cutoff_a;
    let clears_b = score >= cutoff_b;

    // first program in request order whose cutoff is cleared, else the second
    let preferred = if clears_a { a } else { b };
    let reasoning = if clears_a || clears_b {
        format!(
            "With a score of {:.2}, {} is within reach based on the {} cutoff of {}.",
            score,
            preferred.name,
            request.year,
            format_cutoff(preferred.cutoff(request.year).unwrap_or(0.0))
        )
    } else {
        format!(
            "With a score of {:.2}, neither program's {} cutoff is reached; {} is kept as the alternative choice.",
            score, request.year, preferred.name
        )
    };

    ComparisonAnalysis {
        overview: format!(
            "Comparison between {} and {} for a student with a score of {:.2}.",
            a.name, b.name, score
        ),
        program1: assessment(a, clears_a),
        program2: assessment(b, clears_b),
        recommendation: AnalysisRecommendation {
            preferred: preferred.code.clone(),
            reasoning,
            action_steps: vec![
                "Check the official orientation guide for this year's places".to_string(),
                "Rank both programs in your orientation choices".to_string(),
                "Prepare a backup choice with a lower cutoff".to_string(),
            ],
        },
        program_comparison: vec![
            ComparisonRow {
                aspect: "Institution".to_string(),
                program1: a.institution.clone(),
                program2: b.institution.clone(),
            },
            ComparisonRow {
                aspect: "University".to_string(),
                program1: a.university.clone(),
                program2: b.university.clone(),
            },
            ComparisonRow {
                aspect: "Region".to_string(),
                program1: a.region.clone(),
                program2: b.region.clone(),
            },
            ComparisonRow {
                aspect: format!("Cutoff {}", request.year),
                program1: format_cutoff(cutoff_a),
                program2: format_cutoff(cutoff_b),
            },
        ],
        is_fallback: true,
        insights: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gender, SessionType, StudentProfile};
    use crate::score::{Grades, Track};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn request(score: f64, cutoff_a: f64, cutoff_b: f64) -> ComparisonRequest {
        let program = |code: &str, name: &str, cutoff: f64| Program {
            code: code.to_string(),
            name: name.to_string(),
            institution: "ENIT".to_string(),
            university: "Université de Tunis El Manar".to_string(),
            region: "Tunis".to_string(),
            specialization: Some("Génie civil".to_string()),
            hub: Vec::new(),
            cutoffs: BTreeMap::from([(2024, cutoff)]),
        };
        ComparisonRequest {
            program_a: program("P1", "Génie civil", cutoff_a),
            program_b: program("P2", "Architecture", cutoff_b),
            profile: StudentProfile {
                track: Track::Techniques,
                grades: Grades::new(),
                region: "Tunis".to_string(),
                birth_date: NaiveDate::from_ymd_opt(2006, 9, 1).unwrap(),
                gender: Gender::Male,
                session: SessionType::Principale,
                score_override: Some(score),
            },
            year: 2024,
        }
    }

    #[test]
    fn test_prefers_first_cleared_program() {
        let analysis = fallback_analysis(&request(150.0, 140.0, 160.0));
        assert_eq!(analysis.recommendation.preferred, "P1");
        assert_eq!(analysis.program1.suitability_score, 7.0);
        assert_eq!(analysis.program2.suitability_score, 4.0);
        assert!(analysis.is_fallback);
    }

    #[test]
    fn test_request_order_breaks_ties() {
        let analysis = fallback_analysis(&request(170.0, 160.0, 140.0));
        assert_eq!(analysis.recommendation.preferred, "P1");
    }

    #[test]
    fn test_second_program_when_only_it_clears() {
        let analysis = fallback_analysis(&request(150.0, 160.0, 140.0));
        assert_eq!(analysis.recommendation.preferred, "P2");
    }

    #[test]
    fn test_second_program_when_nothing_clears() {
        let analysis = fallback_analysis(&request(100.0, 140.0, 160.0));
        assert_eq!(analysis.recommendation.preferred, "P2");
        assert_eq!(analysis.program1.suitability_score, 4.0);
        assert_eq!(analysis.program2.suitability_score, 4.0);
    }

    #[test]
    fn test_deterministic() {
        let req = request(150.0, 140.0, 160.0);
        assert_eq!(fallback_analysis(&req), fallback_analysis(&req));
    }

    #[test]
    fn test_overview_names_both_programs() {
        let analysis = fallback_analysis(&request(150.0, 140.0, 160.0));
        assert!(analysis.overview.contains("Génie civil"));
        assert!(analysis.overview.contains("Architecture"));
    }
}
