use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Raw grades keyed by subject key (`math`, `physique`, ...)
pub type Grades = BTreeMap<String, f64>;

/// Highest reachable FG. Every track's bonus weights sum to 6, so
/// `4 * 20 + 6 * 20 = 200`.
pub const MAX_SCORE: f64 = 200.0;

/// Highest grade on the BAC scale
pub const MAX_GRADE: f64 = 20.0;

/// BAC specialization. Each track owns its MG coefficients and FS formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Mathematiques,
    SciencesExperimentales,
    Techniques,
    EconomieGestion,
    Lettres,
    SciencesInformatique,
    Sport,
}

impl Track {
    pub const ALL: [Track; 7] = [
        Track::Mathematiques,
        Track::SciencesExperimentales,
        Track::Techniques,
        Track::EconomieGestion,
        Track::Lettres,
        Track::SciencesInformatique,
        Track::Sport,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Track::Mathematiques => "mathematiques",
            Track::SciencesExperimentales => "sciences_experimentales",
            Track::Techniques => "techniques",
            Track::EconomieGestion => "economie_gestion",
            Track::Lettres => "lettres",
            Track::SciencesInformatique => "sciences_informatique",
            Track::Sport => "sport",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Track::Mathematiques => "Mathématiques",
            Track::SciencesExperimentales => "Sciences expérimentales",
            Track::Techniques => "Sciences techniques",
            Track::EconomieGestion => "Économie et gestion",
            Track::Lettres => "Lettres",
            Track::SciencesInformatique => "Sciences de l'informatique",
            Track::Sport => "Sport",
        }
    }

    /// Subjects and coefficients entering the weighted mean, in bulletin order
    pub fn coefficients(&self) -> &'static [(&'static str, f64)] {
        match self {
            Track::Mathematiques => &[
                ("math", 4.0),
                ("physique", 4.0),
                ("svt", 1.0),
                ("francais", 1.0),
                ("anglais", 1.0),
                ("arabe", 1.0),
                ("philosophie", 1.0),
                ("informatique", 0.5),
                ("sport", 1.0),
            ],
            Track::SciencesExperimentales => &[
                ("svt", 4.0),
                ("physique", 4.0),
                ("math", 3.0),
                ("francais", 1.0),
                ("anglais", 1.0),
                ("arabe", 1.0),
                ("philosophie", 1.0),
                ("informatique", 0.5),
                ("sport", 1.0),
            ],
            Track::Techniques => &[
                ("technique", 4.0),
                ("math", 3.0),
                ("physique", 3.0),
                ("francais", 1.0),
                ("anglais", 1.0),
                ("arabe", 1.0),
                ("philosophie", 1.0),
                ("informatique", 0.5),
                ("sport", 1.0),
            ],
            Track::EconomieGestion => &[
                ("economie", 3.0),
                ("gestion", 3.0),
                ("math", 2.0),
                ("histoire_geo", 2.0),
                ("francais", 1.0),
                ("anglais", 1.0),
                ("arabe", 1.0),
                ("philosophie", 1.0),
                ("informatique", 0.5),
                ("sport", 1.0),
            ],
            Track::Lettres => &[
                ("arabe", 4.0),
                ("philosophie", 4.0),
                ("histoire_geo", 3.0),
                ("francais", 2.0),
                ("anglais", 2.0),
                ("informatique", 0.5),
                ("sport", 1.0),
            ],
            Track::SciencesInformatique => &[
                ("algorithmique", 3.0),
                ("sti", 3.0),
                ("math", 3.0),
                ("physique", 2.0),
                ("francais", 1.0),
                ("anglais", 1.0),
                ("arabe", 1.0),
                ("philosophie", 1.0),
                ("sport", 1.0),
            ],
            Track::Sport => &[
                ("sciences_bio", 3.0),
                ("sport_specialite", 3.0),
                ("sport", 2.0),
                ("physique", 1.0),
                ("philosophie", 1.0),
                ("francais", 1.0),
                ("anglais", 1.0),
                ("arabe", 1.0),
                ("informatique", 0.5),
            ],
        }
    }

    /// Weighted subjects added on top of FB. Weights sum to 6 on every track.
    pub fn bonus_weights(&self) -> &'static [(&'static str, f64)] {
        match self {
            Track::Mathematiques => &[
                ("math", 2.0),
                ("physique", 1.5),
                ("svt", 0.5),
                ("francais", 1.0),
                ("anglais", 1.0),
            ],
            Track::SciencesExperimentales => &[
                ("math", 1.0),
                ("physique", 1.5),
                ("svt", 1.5),
                ("francais", 1.0),
                ("anglais", 1.0),
            ],
            Track::Techniques => &[
                ("technique", 1.5),
                ("math", 1.5),
                ("physique", 1.0),
                ("francais", 1.0),
                ("anglais", 1.0),
            ],
            Track::EconomieGestion => &[
                ("economie", 1.5),
                ("gestion", 1.5),
                ("math", 0.5),
                ("histoire_geo", 0.5),
                ("francais", 1.0),
                ("anglais", 1.0),
            ],
            Track::Lettres => &[
                ("arabe", 1.5),
                ("philosophie", 1.5),
                ("histoire_geo", 1.0),
                ("francais", 1.0),
                ("anglais", 1.0),
            ],
            Track::SciencesInformatique => &[
                ("math", 1.5),
                ("algorithmique", 1.5),
                ("physique", 0.5),
                ("sti", 0.5),
                ("francais", 1.0),
                ("anglais", 1.0),
            ],
            Track::Sport => &[
                ("sciences_bio", 1.5),
                ("sport_specialite", 1.5),
                ("sport", 0.5),
                ("philosophie", 0.5),
                ("francais", 1.0),
                ("anglais", 1.0),
            ],
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Track {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Track::ALL
            .iter()
            .copied()
            .find(|t| t.key() == normalized)
            .or(match normalized.as_str() {
                "math" | "maths" => Some(Track::Mathematiques),
                "sciences" | "sc_exp" => Some(Track::SciencesExperimentales),
                "technique" | "tech" => Some(Track::Techniques),
                "eco" | "economie" => Some(Track::EconomieGestion),
                "info" | "informatique" => Some(Track::SciencesInformatique),
                _ => None,
            })
            .ok_or_else(|| format!("unknown track: {}", s))
    }
}

/// Score breakdown. Values are unrounded; use `rounded()` for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub mg: f64,
    pub fb: f64,
    pub fs: f64,
    pub fg: f64,
}

impl ScoreResult {
    /// Legacy "bonus only" figure shown next to FG
    pub fn bonus_only(&self) -> f64 {
        self.fg - self.fb
    }

    pub fn rounded(&self) -> ScoreResult {
        ScoreResult {
            mg: round2(self.mg),
            fb: round2(self.fb),
            fs: round2(self.fs),
            fg: round2(self.fg),
        }
    }

    pub fn level(&self) -> ScoreLevel {
        score_level(self.fg)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Grade used for a subject. Missing subjects count as 0, out-of-range
/// values are clamped into [0, 20].
fn grade_of(grades: &Grades, subject: &str) -> f64 {
    match grades.get(subject) {
        Some(g) if g.is_finite() => g.clamp(0.0, MAX_GRADE),
        _ => 0.0,
    }
}

/// Compute MG, FB, FS and FG for a track.
///
/// Only the subjects the track defines are read; anything else in `grades`
/// is ignored. A subject absent from `grades` counts as 0.
pub fn compute_score(grades: &Grades, track: Track) -> ScoreResult {
    let (weighted, total) = track
        .coefficients()
        .iter()
        .fold((0.0, 0.0), |(sum, coef_sum), (subject, coef)| {
            (sum + grade_of(grades, subject) * coef, coef_sum + coef)
        });
    let mg = if total > 0.0 { weighted / total } else { 0.0 };
    let fb = 4.0 * mg;
    let fs: f64 = track
        .bonus_weights()
        .iter()
        .map(|(subject, weight)| grade_of(grades, subject) * weight)
        .sum();

    ScoreResult { mg, fb, fs, fg: fb + fs }
}

/// Check raw grades before they enter a request.
pub fn validate_grades(grades: &Grades) -> Result<(), String> {
    for (subject, grade) in grades {
        if !grade.is_finite() || *grade < 0.0 || *grade > MAX_GRADE {
            return Err(format!(
                "grade for '{}' must be between 0 and {}, got {}",
                subject, MAX_GRADE, grade
            ));
        }
    }
    Ok(())
}

/// Qualitative band of a final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreLevel {
    Passable,
    AssezBien,
    Bien,
    TresBien,
    Excellent,
}

impl ScoreLevel {
    pub fn label(&self) -> &'static str {
        match self {
            ScoreLevel::Excellent => "Excellent",
            ScoreLevel::TresBien => "Très Bien",
            ScoreLevel::Bien => "Bien",
            ScoreLevel::AssezBien => "Assez Bien",
            ScoreLevel::Passable => "Passable",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            ScoreLevel::Excellent => "#7c3aed",
            ScoreLevel::TresBien => "#2563eb",
            ScoreLevel::Bien => "#16a34a",
            ScoreLevel::AssezBien => "#ca8a04",
            ScoreLevel::Passable => "#dc2626",
        }
    }

    /// Inclusive lower bound of the band
    pub fn min_score(&self) -> f64 {
        match self {
            ScoreLevel::Excellent => 160.0,
            ScoreLevel::TresBien => 140.0,
            ScoreLevel::Bien => 120.0,
            ScoreLevel::AssezBien => 100.0,
            ScoreLevel::Passable => 0.0,
        }
    }
}

pub fn score_level(fg: f64) -> ScoreLevel {
    [
        ScoreLevel::Excellent,
        ScoreLevel::TresBien,
        ScoreLevel::Bien,
        ScoreLevel::AssezBien,
    ]
    .into_iter()
    .find(|level| fg >= level.min_score())
    .unwrap_or(ScoreLevel::Passable)
}
