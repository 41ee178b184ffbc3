use crate::generator::{analysis_schema, GenerationRequest};
use crate::models::{ComparisonRequest, GeneratorConfig, Program, StudentProfile};
use crate::score::score_level;
use std::fmt::{self, Write};

const SYSTEM_PROMPT: &str = "You are an academic orientation advisor for Tunisian BAC graduates. \
Compare the two university programs for the student described below. \
Base admissibility only on the student's score and the programs' historical cutoffs. \
Answer with a single JSON object matching the provided schema; \
use the program codes given in the context for recommendation.preferred.";

fn describe_program(out: &mut String, label: &str, program: &Program, year: u16) -> fmt::Result {
    writeln!(out, "{} [{}]: {}", label, program.code, program.name)?;
    writeln!(out, "  Institution: {} ({})", program.institution, program.university)?;
    writeln!(out, "  Region: {}", program.region)?;
    if let Some(specialization) = &program.specialization {
        writeln!(out, "  Specialization: {}", specialization)?;
    }
    match program.cutoff(year) {
        Some(cutoff) => writeln!(out, "  Cutoff {}: {:.2}", year, cutoff)?,
        None => writeln!(out, "  Cutoff {}: unknown", year)?,
    }
    let history: Vec<String> = program
        .cutoffs
        .iter()
        .filter(|(y, c)| **y != year && **c > 0.0)
        .map(|(y, c)| format!("{}: {:.2}", y, c))
        .collect();
    if !history.is_empty() {
        writeln!(out, "  Previous cutoffs: {}", history.join(", "))?;
    }
    Ok(())
}

fn describe_student(out: &mut String, profile: &StudentProfile, score: f64) -> fmt::Result {
    writeln!(out, "Student:")?;
    writeln!(out, "  Track: {}", profile.track.label())?;
    writeln!(out, "  Score (FG): {:.2} ({})", score, score_level(score).label())?;
    writeln!(out, "  Region: {}", profile.region)?;
    writeln!(out, "  Session: {:?}", profile.session)?;
    if !profile.grades.is_empty() {
        let grades: Vec<String> = profile
            .grades
            .iter()
            .map(|(subject, grade)| format!("{} {:.2}", subject, grade))
            .collect();
        writeln!(out, "  Grades: {}", grades.join(", "))?;
    }
    Ok(())
}

fn describe_request(out: &mut String, request: &ComparisonRequest) -> fmt::Result {
    describe_student(out, &request.profile, request.student_score())?;
    out.push('\n');
    describe_program(out, "Program 1", &request.program_a, request.year)?;
    out.push('\n');
    describe_program(out, "Program 2", &request.program_b, request.year)
}

/// Cut `text` to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Textual context for the generator, bounded to `max_chars` characters
pub fn build_context(request: &ComparisonRequest, max_chars: usize) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = describe_request(&mut out, request);
    truncate_chars(&out, max_chars).to_string()
}

pub fn build_generation_request(
    request: &ComparisonRequest,
    config: &GeneratorConfig,
    max_context_chars: usize,
) -> GenerationRequest {
    GenerationRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt: build_context(request, max_context_chars),
        response_schema: analysis_schema(&request.program_a.code, &request.program_b.code),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}
