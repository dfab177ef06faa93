//! Grade scale model and range lookup.
//!
//! # Responsibility
//! - Represent rule bounds as exact two-decimal values.
//! - Validate candidate rules before they reach storage.
//! - Resolve a score against an ordered, non-overlapping rule set.
//!
//! # Invariants
//! - Rule bounds are inclusive on both ends.
//! - Letter grade and numeric scale are always present together.
//! - Rules of one scale never overlap, so a score maps to at most one rule.
//! - Rule bounds are stored as hundredths; scores are not rounded. A score
//!   resolves only when its exact value lies inside a rule, so one that falls
//!   between two rules (e.g. `59.5` or `59.996` between `[0, 59]` and
//!   `[60, 69]`) is unresolved, not an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ScaleId = Uuid;
pub type RuleId = Uuid;

const HUNDREDTHS_PER_POINT: i64 = 100;
// Keeps `value * 100` well inside i64 and f64's exact-integer range.
const MAX_ABS_HUNDREDTHS: i64 = 1_000_000_000_000;
// `value * 100` this close to an integer is that integer (`0.29 * 100` is 28.999...).
const EXACT_HUNDREDTH_EPSILON: f64 = 1e-6;
const MAX_LETTER_GRADE_CHARS: usize = 50;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Decimal value with two fractional digits, stored as integer hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Points(i64);

impl Points {
    pub const fn from_hundredths(value: i64) -> Self {
        Self(value)
    }

    pub const fn from_whole(value: i64) -> Self {
        Self(value * HUNDREDTHS_PER_POINT)
    }

    /// Rounds half away from zero to the nearest hundredth.
    ///
    /// Returns `None` for NaN, infinities, and magnitudes beyond storage range.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * HUNDREDTHS_PER_POINT as f64).round();
        if scaled.abs() > MAX_ABS_HUNDREDTHS as f64 {
            return None;
        }
        Some(Self(scaled as i64))
    }

    pub const fn hundredths(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / HUNDREDTHS_PER_POINT as f64
    }
}

impl Display for Points {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:02}",
            magnitude / HUNDREDTHS_PER_POINT as u64,
            magnitude % HUNDREDTHS_PER_POINT as u64
        )
    }
}

/// Raw score held as the pair of hundredths that bracket it.
///
/// A score with at most two decimals has `floor == ceil`. Anything finer sits
/// strictly between the two, so a rule contains it only when the rule
/// contains both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreSpan {
    floor: Points,
    ceil: Points,
}

impl ScoreSpan {
    /// Returns `None` for NaN, infinities, and magnitudes beyond storage range.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = value * HUNDREDTHS_PER_POINT as f64;
        if scaled.abs() > MAX_ABS_HUNDREDTHS as f64 {
            return None;
        }
        let nearest = scaled.round();
        if (scaled - nearest).abs() < EXACT_HUNDREDTH_EPSILON {
            return Some(Self::exact(Points(nearest as i64)));
        }
        Some(Self {
            floor: Points(scaled.floor() as i64),
            ceil: Points(scaled.ceil() as i64),
        })
    }

    pub const fn exact(points: Points) -> Self {
        Self {
            floor: points,
            ceil: points,
        }
    }

    pub const fn floor(self) -> Points {
        self.floor
    }

    pub const fn ceil(self) -> Points {
        self.ceil
    }
}

/// Named rule set, e.g. "Letter grades" or "4.0 scale".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeScale {
    pub scale_id: ScaleId,
    pub name: String,
}

/// One persisted range of a grade scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeScaleRule {
    pub rule_id: RuleId,
    pub scale_id: ScaleId,
    pub min_grade: Points,
    pub max_grade: Points,
    pub letter_grade: String,
    pub numeric_scale: Points,
}

impl GradeScaleRule {
    pub fn covers(&self, score: ScoreSpan) -> bool {
        self.min_grade <= score.floor && score.ceil <= self.max_grade
    }
}

/// Unvalidated rule input as authored through CRUD.
///
/// Letter and numeric values are optional here so that half-filled input can be
/// rejected with a precise reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRuleDraft {
    pub min_grade: f64,
    pub max_grade: f64,
    pub letter_grade: Option<String>,
    pub numeric_scale: Option<f64>,
}

impl GradeRuleDraft {
    /// Fully populated draft.
    pub fn new(
        min_grade: f64,
        max_grade: f64,
        letter_grade: impl Into<String>,
        numeric_scale: f64,
    ) -> Self {
        Self {
            min_grade,
            max_grade,
            letter_grade: Some(letter_grade.into()),
            numeric_scale: Some(numeric_scale),
        }
    }

    /// Checks every rule constraint that does not depend on sibling rules.
    ///
    /// Overlap with existing rules is checked at commit time, under the same
    /// write lock that inserts the row.
    pub fn validate(&self) -> Result<ValidRule, RuleViolation> {
        let letter_grade = self
            .letter_grade
            .as_deref()
            .map(normalize_letter_grade)
            .filter(|value| !value.is_empty());

        let (letter_grade, numeric_scale) = match (letter_grade, self.numeric_scale) {
            (Some(letter), Some(numeric)) => (letter, numeric),
            (None, None) => return Err(RuleViolation::MissingGrade),
            (Some(_), None) => return Err(RuleViolation::LetterWithoutNumeric),
            (None, Some(_)) => return Err(RuleViolation::NumericWithoutLetter),
        };

        let letter_chars = letter_grade.chars().count();
        if letter_chars > MAX_LETTER_GRADE_CHARS {
            return Err(RuleViolation::LetterTooLong {
                chars: letter_chars,
                max: MAX_LETTER_GRADE_CHARS,
            });
        }

        let min_grade =
            Points::from_f64(self.min_grade).ok_or(RuleViolation::NonFinite("min_grade"))?;
        let max_grade =
            Points::from_f64(self.max_grade).ok_or(RuleViolation::NonFinite("max_grade"))?;
        let numeric_scale =
            Points::from_f64(numeric_scale).ok_or(RuleViolation::NonFinite("numeric_scale"))?;

        if min_grade > max_grade {
            return Err(RuleViolation::InvertedRange {
                min_grade,
                max_grade,
            });
        }

        Ok(ValidRule {
            min_grade,
            max_grade,
            letter_grade,
            numeric_scale,
        })
    }
}

/// Rule that passed field-level validation and is ready to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRule {
    pub min_grade: Points,
    pub max_grade: Points,
    pub letter_grade: String,
    pub numeric_scale: Points,
}

/// Reasons a grade-scale rule is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    /// Neither letter grade nor numeric scale was provided.
    MissingGrade,
    LetterWithoutNumeric,
    NumericWithoutLetter,
    LetterTooLong { chars: usize, max: usize },
    /// Named field is NaN, infinite, or out of storage range.
    NonFinite(&'static str),
    InvertedRange { min_grade: Points, max_grade: Points },
    /// Range intersects an existing rule of the same scale.
    Overlap {
        rule_id: RuleId,
        min_grade: Points,
        max_grade: Points,
    },
}

impl Display for RuleViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingGrade => {
                write!(f, "either a letter grade or numeric scale must be provided")
            }
            Self::LetterWithoutNumeric => write!(
                f,
                "a letter grade was provided without a numeric scale"
            ),
            Self::NumericWithoutLetter => write!(
                f,
                "a numeric scale was provided without a letter grade"
            ),
            Self::LetterTooLong { chars, max } => {
                write!(f, "letter grade has {chars} characters; at most {max} allowed")
            }
            Self::NonFinite(field) => write!(f, "{field} must be a finite number"),
            Self::InvertedRange {
                min_grade,
                max_grade,
            } => write!(
                f,
                "min_grade {min_grade} is greater than max_grade {max_grade}"
            ),
            Self::Overlap {
                rule_id,
                min_grade,
                max_grade,
            } => write!(
                f,
                "range overlaps rule {rule_id} [{min_grade}, {max_grade}]"
            ),
        }
    }
}

impl Error for RuleViolation {}

/// In-memory snapshot of one scale's rules, ordered by `min_grade`.
///
/// Suited to result computation that resolves many scores against the same
/// scale without a query per score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeScaleTable {
    scale: GradeScale,
    rules: Vec<GradeScaleRule>,
}

impl GradeScaleTable {
    /// Builds a table, rejecting rule sets that overlap.
    pub fn new(scale: GradeScale, mut rules: Vec<GradeScaleRule>) -> Result<Self, RuleViolation> {
        rules.sort_by_key(|rule| (rule.min_grade, rule.max_grade));
        for pair in rules.windows(2) {
            if pair[1].min_grade <= pair[0].max_grade {
                return Err(RuleViolation::Overlap {
                    rule_id: pair[0].rule_id,
                    min_grade: pair[0].min_grade,
                    max_grade: pair[0].max_grade,
                });
            }
        }
        Ok(Self { scale, rules })
    }

    pub fn scale(&self) -> &GradeScale {
        &self.scale
    }

    pub fn rules(&self) -> &[GradeScaleRule] {
        &self.rules
    }

    /// Resolves an optional raw score; absent or non-finite scores yield `None`.
    pub fn resolve(&self, grade: Option<f64>) -> Option<&GradeScaleRule> {
        self.resolve_span(ScoreSpan::from_f64(grade?)?)
    }

    pub fn resolve_points(&self, grade: Points) -> Option<&GradeScaleRule> {
        self.resolve_span(ScoreSpan::exact(grade))
    }

    /// Only the last rule starting at or below `score.floor()` can contain it.
    pub fn resolve_span(&self, score: ScoreSpan) -> Option<&GradeScaleRule> {
        let after = self.rules.partition_point(|rule| rule.min_grade <= score.floor);
        let candidate = self.rules.get(after.checked_sub(1)?)?;
        candidate.covers(score).then_some(candidate)
    }

    pub fn to_letter(&self, grade: Option<f64>) -> Option<&str> {
        self.resolve(grade).map(|rule| rule.letter_grade.as_str())
    }

    pub fn to_numeric(&self, grade: Option<f64>) -> Option<f64> {
        self.resolve(grade).map(|rule| rule.numeric_scale.as_f64())
    }
}

/// Trims and collapses internal whitespace (`" A  + "` becomes `"A +"`).
pub fn normalize_letter_grade(value: &str) -> String {
    WHITESPACE_RE.replace_all(value.trim(), " ").into_owned()
}
