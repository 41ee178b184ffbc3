use crate::models::Program;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// How likely admission is, from the gap between score and cutoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionChance {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl AdmissionChance {
    pub fn from_difference(score_difference: f64) -> Self {
        if score_difference >= 15.0 {
            AdmissionChance::VeryHigh
        } else if score_difference >= 5.0 {
            AdmissionChance::High
        } else if score_difference >= -5.0 {
            AdmissionChance::Moderate
        } else if score_difference > -15.0 {
            AdmissionChance::Low
        } else {
            AdmissionChance::VeryLow
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AdmissionChance::VeryHigh => "very-high",
            AdmissionChance::High => "high",
            AdmissionChance::Moderate => "moderate",
            AdmissionChance::Low => "low",
            AdmissionChance::VeryLow => "very-low",
        }
    }

    pub fn accent(&self) -> &'static str {
        match self {
            AdmissionChance::VeryHigh => "#15803d",
            AdmissionChance::High => "#22c55e",
            AdmissionChance::Moderate => "#eab308",
            AdmissionChance::Low => "#f97316",
            AdmissionChance::VeryLow => "#dc2626",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    /// Smallest |score difference| first
    #[default]
    Closest,
    /// Largest score difference first
    BestChances,
    /// Most selective programs first
    Cutoff,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "closest" => Ok(SortOrder::Closest),
            "best-chances" | "best" => Ok(SortOrder::BestChances),
            "cutoff" => Ok(SortOrder::Cutoff),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedProgram {
    pub program: Program,
    pub cutoff: f64,
    pub score_difference: f64,
    pub category: AdmissionChance,
}

/// Catalog predicates. All set predicates must match.
#[derive(Debug, Clone, Default)]
pub struct ProgramFilter {
    pub region: Option<String>,
    pub institution: Option<String>,
    pub specialization: Option<String>,
    pub query: Option<String>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

impl ProgramFilter {
    pub fn matches(&self, program: &Program) -> bool {
        if let Some(region) = &self.region {
            if !program.region.trim().eq_ignore_ascii_case(region.trim()) {
                return false;
            }
        }
        if let Some(institution) = &self.institution {
            if !contains_ci(&program.institution, institution) {
                return false;
            }
        }
        if let Some(specialization) = &self.specialization {
            match &program.specialization {
                Some(s) if contains_ci(s, specialization) => {}
                _ => return false,
            }
        }
        if let Some(query) = &self.query {
            let haystack = format!(
                "{} {} {} {}",
                program.code, program.name, program.institution, program.university
            )
            .to_lowercase();
            if !query_tokens(query).iter().all(|t| haystack.contains(t.as_str())) {
                return false;
            }
        }
        true
    }
}

fn query_tokens(query: &str) -> Vec<String> {
    query
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub struct RecommendationFilter {
    pub year: u16,
    pub filter: ProgramFilter,
    pub sort: SortOrder,
    pub limit: Option<usize>,
}

impl RecommendationFilter {
    pub fn new(year: u16) -> Self {
        Self {
            year,
            filter: ProgramFilter::default(),
            sort: SortOrder::default(),
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: ProgramFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Rank the catalog against a student score.
    ///
    /// Programs without a positive cutoff for the filter year never appear.
    pub fn rank(&self, student_score: f64, catalog: &[Program]) -> Vec<RankedProgram> {
        let mut ranked: Vec<RankedProgram> = catalog
            .iter()
            .filter(|program| self.filter.matches(program))
            .filter_map(|program| {
                let cutoff = program.cutoff(self.year)?;
                let score_difference = student_score - cutoff;
                Some(RankedProgram {
                    program: program.clone(),
                    cutoff,
                    score_difference,
                    category: AdmissionChance::from_difference(score_difference),
                })
            })
            .collect();

        ranked.sort_by(|a, b| self.compare(a, b).then_with(|| a.program.code.cmp(&b.program.code)));

        if let Some(limit) = self.limit {
            ranked.truncate(limit);
        }
        ranked
    }

    fn compare(&self, a: &RankedProgram, b: &RankedProgram) -> Ordering {
        match self.sort {
            SortOrder::Closest => a
                .score_difference
                .abs()
                .partial_cmp(&b.score_difference.abs())
                .unwrap_or(Ordering::Equal),
            SortOrder::BestChances => b
                .score_difference
                .partial_cmp(&a.score_difference)
                .unwrap_or(Ordering::Equal),
            SortOrder::Cutoff => b.cutoff.partial_cmp(&a.cutoff).unwrap_or(Ordering::Equal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn program(code: &str, region: &str, institution: &str, cutoff: f64) -> Program {
        Program {
            code: code.to_string(),
            name: format!("Licence {}", code),
            institution: institution.to_string(),
            university: "Université de Carthage".to_string(),
            region: region.to_string(),
            specialization: Some("Informatique".to_string()),
            hub: Vec::new(),
            cutoffs: BTreeMap::from([(2024, cutoff)]),
        }
    }

    #[test]
    fn test_category_examples() {
        let filter = RecommendationFilter::new(2024);
        let ranked = filter.rank(120.0, &[program("A", "Tunis", "INSAT", 110.0)]);
        assert_eq!(ranked[0].score_difference, 10.0);
        assert_eq!(ranked[0].category, AdmissionChance::High);
        assert_eq!(ranked[0].category.label(), "high");

        let ranked = filter.rank(120.0, &[program("B", "Tunis", "INSAT", 135.0)]);
        assert_eq!(ranked[0].score_difference, -15.0);
        assert_eq!(ranked[0].category.label(), "very-low");
    }

    #[test]
    fn test_category_thresholds() {
        assert_eq!(AdmissionChance::from_difference(15.0), AdmissionChance::VeryHigh);
        assert_eq!(AdmissionChance::from_difference(14.99), AdmissionChance::High);
        assert_eq!(AdmissionChance::from_difference(5.0), AdmissionChance::High);
        assert_eq!(AdmissionChance::from_difference(-5.0), AdmissionChance::Moderate);
        assert_eq!(AdmissionChance::from_difference(-5.01), AdmissionChance::Low);
        assert_eq!(AdmissionChance::from_difference(-14.99), AdmissionChance::Low);
        assert_eq!(AdmissionChance::from_difference(-30.0), AdmissionChance::VeryLow);
    }

    #[test]
    fn test_programs_without_positive_cutoff_excluded() {
        let mut missing_year = program("C", "Tunis", "INSAT", 100.0);
        missing_year.cutoffs = BTreeMap::from([(2023, 100.0)]);
        let catalog = vec![
            program("A", "Tunis", "INSAT", 0.0),
            program("B", "Tunis", "INSAT", -12.0),
            missing_year,
            program("D", "Tunis", "INSAT", 101.0),
        ];
        let ranked = RecommendationFilter::new(2024).rank(120.0, &catalog);
        let codes: Vec<&str> = ranked.iter().map(|r| r.program.code.as_str()).collect();
        assert_eq!(codes, vec!["D"]);
    }

    #[test]
    fn test_default_sort_is_closest_first() {
        let catalog = vec![
            program("FAR", "Tunis", "INSAT", 160.0),
            program("NEAR", "Tunis", "INSAT", 118.0),
            program("MID", "Tunis", "INSAT", 110.0),
        ];
        let ranked = RecommendationFilter::new(2024).rank(120.0, &catalog);
        let codes: Vec<&str> = ranked.iter().map(|r| r.program.code.as_str()).collect();
        assert_eq!(codes, vec!["NEAR", "MID", "FAR"]);
    }

    #[test]
    fn test_best_chances_sort_and_limit() {
        let catalog = vec![
            program("FAR", "Tunis", "INSAT", 160.0),
            program("NEAR", "Tunis", "INSAT", 118.0),
            program("MID", "Tunis", "INSAT", 110.0),
        ];
        let ranked = RecommendationFilter::new(2024)
            .with_sort(SortOrder::BestChances)
            .with_limit(2)
            .rank(120.0, &catalog);
        let codes: Vec<&str> = ranked.iter().map(|r| r.program.code.as_str()).collect();
        assert_eq!(codes, vec!["MID", "NEAR"]);
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let catalog = vec![
            program("A", "Tunis", "INSAT", 110.0),
            program("B", "Sfax", "INSAT", 110.0),
            program("C", "Tunis", "ENIT", 110.0),
        ];
        let filter = ProgramFilter {
            region: Some("tunis".to_string()),
            institution: Some("insat".to_string()),
            ..Default::default()
        };
        let ranked = RecommendationFilter::new(2024).with_filter(filter).rank(120.0, &catalog);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].program.code, "A");
    }

    #[test]
    fn test_free_text_requires_every_token() {
        let catalog = vec![
            program("A", "Tunis", "INSAT", 110.0),
            program("B", "Tunis", "ENIT", 110.0),
        ];
        let filter = ProgramFilter {
            query: Some("licence  carthage, insat".to_string()),
            ..Default::default()
        };
        let ranked = RecommendationFilter::new(2024).with_filter(filter).rank(120.0, &catalog);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].program.code, "A");
    }

    #[test]
    fn test_specialization_filter_skips_unspecified() {
        let mut plain = program("B", "Tunis", "INSAT", 110.0);
        plain.specialization = None;
        let catalog = vec![program("A", "Tunis", "INSAT", 110.0), plain];
        let filter = ProgramFilter {
            specialization: Some("informatique".to_string()),
            ..Default::default()
        };
        let ranked = RecommendationFilter::new(2024).with_filter(filter).rank(120.0, &catalog);
        assert_eq!(ranked.len(), 1);
    }
}
