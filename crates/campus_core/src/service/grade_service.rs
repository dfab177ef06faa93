//! Grade resolution use-case service.
//!
//! # Responsibility
//! - Validate rules before they reach storage and commit them atomically.
//! - Map raw scores to letter grades and numeric scale values.
//!
//! # Invariants
//! - A rule is validated in full before any write; an invalid rule never
//!   becomes visible to readers.
//! - Lookups are read-only and never block on rule mutations.

use crate::config::ContentionPolicy;
use crate::error::{ErrorKind, HasErrorKind};
use crate::model::grade::{
    GradeRuleDraft, GradeScale, GradeScaleRule, GradeScaleTable, RuleId, RuleViolation, ScaleId,
    ScoreSpan, ValidRule,
};
use crate::repo::grade_repo::{GradeRepoError, GradeScaleRepository};
use crate::service::contention::retry_on_contention;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type GradeResult<T> = Result<T, GradeError>;

/// Errors from grade service operations.
#[derive(Debug)]
pub enum GradeError {
    /// Rule is malformed or overlaps a sibling rule.
    InconsistentRule(RuleViolation),
    ScaleNotFound(ScaleId),
    RuleNotFound(RuleId),
    DuplicateScaleName(String),
    InvalidScaleName,
    Contention,
    /// Any other repository failure.
    Repo(GradeRepoError),
}

impl Display for GradeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InconsistentRule(violation) => write!(f, "inconsistent rule: {violation}"),
            Self::ScaleNotFound(id) => write!(f, "grade scale not found: {id}"),
            Self::RuleNotFound(id) => write!(f, "grade scale rule not found: {id}"),
            Self::DuplicateScaleName(name) => {
                write!(f, "grade scale named `{name}` already exists")
            }
            Self::InvalidScaleName => write!(f, "grade scale name must not be blank"),
            Self::Contention => write!(f, "grade store is busy; retry the operation"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for GradeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InconsistentRule(violation) => Some(violation),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl HasErrorKind for GradeError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InconsistentRule(_) => ErrorKind::InconsistentRule,
            Self::ScaleNotFound(_) | Self::RuleNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateScaleName(_) => ErrorKind::DuplicateName,
            Self::InvalidScaleName => ErrorKind::InvalidInput,
            Self::Contention => ErrorKind::Contention,
            Self::Repo(err) => err.kind(),
        }
    }
}

impl From<GradeRepoError> for GradeError {
    fn from(value: GradeRepoError) -> Self {
        match value {
            GradeRepoError::ScaleNotFound(id) => Self::ScaleNotFound(id),
            GradeRepoError::RuleNotFound(id) => Self::RuleNotFound(id),
            GradeRepoError::DuplicateScaleName(name) => Self::DuplicateScaleName(name),
            GradeRepoError::InvalidScaleName => Self::InvalidScaleName,
            GradeRepoError::RuleOverlap {
                rule_id,
                min_grade,
                max_grade,
            } => Self::InconsistentRule(RuleViolation::Overlap {
                rule_id,
                min_grade,
                max_grade,
            }),
            GradeRepoError::Contention => Self::Contention,
            other => Self::Repo(other),
        }
    }
}

impl From<RuleViolation> for GradeError {
    fn from(value: RuleViolation) -> Self {
        Self::InconsistentRule(value)
    }
}

/// Grade scale service facade over a repository implementation.
pub struct GradeService<R: GradeScaleRepository> {
    repo: R,
    policy: ContentionPolicy,
}

impl<R: GradeScaleRepository> GradeService<R> {
    /// Creates a service with the default contention policy.
    pub fn new(repo: R) -> Self {
        Self::with_policy(repo, ContentionPolicy::default())
    }

    pub fn with_policy(repo: R, policy: ContentionPolicy) -> Self {
        Self { repo, policy }
    }

    pub fn create_scale(&self, name: &str) -> GradeResult<GradeScale> {
        let scale = retry_on_contention(&self.policy, "create_scale", || {
            self.repo.create_scale(name).map_err(GradeError::from)
        })?;
        info!("event=scale_create module=grade status=ok");
        Ok(scale)
    }

    pub fn scale(&self, scale_id: ScaleId) -> GradeResult<GradeScale> {
        self.repo
            .get_scale(scale_id)?
            .ok_or(GradeError::ScaleNotFound(scale_id))
    }

    pub fn find_scale_by_name(&self, name: &str) -> GradeResult<Option<GradeScale>> {
        Ok(self.repo.find_scale_by_name(name)?)
    }

    /// Deletes a scale and every rule it owns.
    pub fn delete_scale(&self, scale_id: ScaleId) -> GradeResult<()> {
        retry_on_contention(&self.policy, "delete_scale", || {
            self.repo.delete_scale(scale_id).map_err(GradeError::from)
        })?;
        info!("event=scale_delete module=grade status=ok");
        Ok(())
    }

    /// Rules of one scale ordered by `min_grade`.
    pub fn rules(&self, scale_id: ScaleId) -> GradeResult<Vec<GradeScaleRule>> {
        self.scale(scale_id)?;
        Ok(self.repo.list_rules(scale_id)?)
    }

    /// Field-level validation only; sibling overlap is checked on commit.
    pub fn validate(&self, draft: &GradeRuleDraft) -> GradeResult<ValidRule> {
        draft.validate().map_err(|violation| {
            info!(
                "event=rule_validate module=grade status=rejected reason={}",
                violation_code(&violation)
            );
            GradeError::InconsistentRule(violation)
        })
    }

    /// Persists a validated rule; the overlap check and the insert share one
    /// write transaction.
    pub fn commit_rule(&self, scale_id: ScaleId, rule: &ValidRule) -> GradeResult<GradeScaleRule> {
        let result = retry_on_contention(&self.policy, "commit_rule", || {
            self.repo
                .insert_rule(scale_id, rule)
                .map_err(GradeError::from)
        });
        log_rule_commit("insert", &result);
        result
    }

    /// Validates then commits a new rule.
    ///
    /// # Errors
    /// - `InconsistentRule` for a malformed rule or one overlapping a sibling.
    /// - `ScaleNotFound` when the scale does not exist.
    pub fn add_rule(
        &self,
        scale_id: ScaleId,
        draft: &GradeRuleDraft,
    ) -> GradeResult<GradeScaleRule> {
        let rule = self.validate(draft)?;
        self.commit_rule(scale_id, &rule)
    }

    /// Replaces an existing rule, rechecking overlap against its siblings.
    pub fn update_rule(
        &self,
        rule_id: RuleId,
        draft: &GradeRuleDraft,
    ) -> GradeResult<GradeScaleRule> {
        let rule = self.validate(draft)?;
        let result = retry_on_contention(&self.policy, "update_rule", || {
            self.repo.update_rule(rule_id, &rule).map_err(GradeError::from)
        });
        log_rule_commit("update", &result);
        result
    }

    pub fn delete_rule(&self, rule_id: RuleId) -> GradeResult<()> {
        retry_on_contention(&self.policy, "delete_rule", || {
            self.repo.delete_rule(rule_id).map_err(GradeError::from)
        })?;
        info!("event=rule_delete module=grade status=ok");
        Ok(())
    }

    /// Finds the rule whose inclusive range contains the exact `grade`.
    ///
    /// An absent or non-finite grade, or one no rule covers, yields `Ok(None)`.
    /// An unknown scale is `ScaleNotFound` whatever the grade.
    pub fn resolve(
        &self,
        scale_id: ScaleId,
        grade: Option<f64>,
    ) -> GradeResult<Option<GradeScaleRule>> {
        let Some(score) = grade.and_then(ScoreSpan::from_f64) else {
            self.scale(scale_id)?;
            return Ok(None);
        };
        Ok(self.repo.find_covering_rule(scale_id, score)?)
    }

    pub fn to_letter(&self, scale_id: ScaleId, grade: Option<f64>) -> GradeResult<Option<String>> {
        Ok(self
            .resolve(scale_id, grade)?
            .map(|rule| rule.letter_grade))
    }

    pub fn to_numeric(&self, scale_id: ScaleId, grade: Option<f64>) -> GradeResult<Option<f64>> {
        Ok(self
            .resolve(scale_id, grade)?
            .map(|rule| rule.numeric_scale.as_f64()))
    }

    /// Loads a scale into memory for resolving many scores at once.
    pub fn load_table(&self, scale_id: ScaleId) -> GradeResult<GradeScaleTable> {
        let scale = self.scale(scale_id)?;
        let rules = self.repo.list_rules(scale_id)?;
        Ok(GradeScaleTable::new(scale, rules)?)
    }
}

fn log_rule_commit(action: &'static str, result: &GradeResult<GradeScaleRule>) {
    match result {
        Ok(_) => info!("event=rule_commit module=grade action={action} status=ok"),
        Err(GradeError::InconsistentRule(violation)) => info!(
            "event=rule_commit module=grade action={action} status=rejected reason={}",
            violation_code(violation)
        ),
        Err(err) => warn!(
            "event=rule_commit module=grade action={action} status=error error_code={}",
            err.kind()
        ),
    }
}

fn violation_code(violation: &RuleViolation) -> &'static str {
    match violation {
        RuleViolation::MissingGrade => "missing_grade",
        RuleViolation::LetterWithoutNumeric => "letter_without_numeric",
        RuleViolation::NumericWithoutLetter => "numeric_without_letter",
        RuleViolation::LetterTooLong { .. } => "letter_too_long",
        RuleViolation::NonFinite(_) => "non_finite",
        RuleViolation::InvertedRange { .. } => "inverted_range",
        RuleViolation::Overlap { .. } => "overlap",
    }
}
