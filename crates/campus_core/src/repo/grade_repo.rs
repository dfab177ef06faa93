//! Grade scale repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist grade scales and their rules.
//! - Commit already-validated rules, rejecting overlaps under the write lock.
//! - Answer range lookups in a single statement.
//!
//! # Invariants
//! - Overlap checks and the insert/update they guard share one immediate
//!   transaction, so two racing inserts cannot both land.
//! - Bounds are stored as integer hundredths; comparisons are exact.

use crate::db::{ensure_schema, DbError, RequiredTable};
use crate::error::{ErrorKind, HasErrorKind};
use crate::model::grade::{
    GradeScale, GradeScaleRule, Points, RuleId, ScaleId, ScoreSpan, ValidRule,
};
use crate::repo::parse_uuid;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const RULE_SELECT_SQL: &str = "SELECT
    rule_uuid,
    scale_uuid,
    min_grade_centi,
    max_grade_centi,
    letter_grade,
    numeric_scale_centi
FROM grade_scale_rules";

const SCALES_TABLE: RequiredTable = RequiredTable {
    name: "grade_scales",
    columns: &["scale_uuid", "name"],
};

const RULES_TABLE: RequiredTable = RequiredTable {
    name: "grade_scale_rules",
    columns: &[
        "rule_uuid",
        "scale_uuid",
        "min_grade_centi",
        "max_grade_centi",
        "letter_grade",
        "numeric_scale_centi",
    ],
};

pub type GradeRepoResult<T> = Result<T, GradeRepoError>;

/// Errors from grade scale persistence.
#[derive(Debug)]
pub enum GradeRepoError {
    Db(DbError),
    ScaleNotFound(ScaleId),
    RuleNotFound(RuleId),
    DuplicateScaleName(String),
    /// Scale name is blank after trim.
    InvalidScaleName,
    /// Candidate range intersects a stored rule of the same scale.
    RuleOverlap {
        rule_id: RuleId,
        min_grade: Points,
        max_grade: Points,
    },
    Contention,
    InvalidData(String),
}

impl Display for GradeRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::ScaleNotFound(id) => write!(f, "grade scale not found: {id}"),
            Self::RuleNotFound(id) => write!(f, "grade scale rule not found: {id}"),
            Self::DuplicateScaleName(name) => {
                write!(f, "grade scale named `{name}` already exists")
            }
            Self::InvalidScaleName => write!(f, "grade scale name must not be blank"),
            Self::RuleOverlap {
                rule_id,
                min_grade,
                max_grade,
            } => write!(
                f,
                "range overlaps rule {rule_id} [{min_grade}, {max_grade}]"
            ),
            Self::Contention => write!(f, "grade store is busy; retry the operation"),
            Self::InvalidData(message) => write!(f, "invalid grade scale data: {message}"),
        }
    }
}

impl Error for GradeRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl HasErrorKind for GradeRepoError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Db(_) => ErrorKind::Storage,
            Self::ScaleNotFound(_) | Self::RuleNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateScaleName(_) => ErrorKind::DuplicateName,
            Self::InvalidScaleName => ErrorKind::InvalidInput,
            Self::RuleOverlap { .. } => ErrorKind::InconsistentRule,
            Self::Contention => ErrorKind::Contention,
            Self::InvalidData(_) => ErrorKind::InvalidData,
        }
    }
}

impl From<DbError> for GradeRepoError {
    fn from(value: DbError) -> Self {
        if value.is_contention() {
            Self::Contention
        } else {
            Self::Db(value)
        }
    }
}

impl From<rusqlite::Error> for GradeRepoError {
    fn from(value: rusqlite::Error) -> Self {
        DbError::Sqlite(value).into()
    }
}

/// Repository interface for grade scales and rules.
pub trait GradeScaleRepository {
    /// Creates an empty scale with a unique name.
    fn create_scale(&self, name: &str) -> GradeRepoResult<GradeScale>;
    fn get_scale(&self, scale_id: ScaleId) -> GradeRepoResult<Option<GradeScale>>;
    fn find_scale_by_name(&self, name: &str) -> GradeRepoResult<Option<GradeScale>>;
    /// Deletes a scale and all of its rules.
    fn delete_scale(&self, scale_id: ScaleId) -> GradeRepoResult<()>;
    /// Lists rules ordered by `min_grade`.
    fn list_rules(&self, scale_id: ScaleId) -> GradeRepoResult<Vec<GradeScaleRule>>;
    /// Inserts a validated rule unless it overlaps a sibling.
    fn insert_rule(&self, scale_id: ScaleId, rule: &ValidRule) -> GradeRepoResult<GradeScaleRule>;
    /// Replaces a rule's range and grades unless it would overlap a sibling.
    fn update_rule(&self, rule_id: RuleId, rule: &ValidRule) -> GradeRepoResult<GradeScaleRule>;
    fn delete_rule(&self, rule_id: RuleId) -> GradeRepoResult<()>;
    /// Finds the rule containing both ends of `score`; `ScaleNotFound` when the
    /// scale is unknown.
    fn find_covering_rule(
        &self,
        scale_id: ScaleId,
        score: ScoreSpan,
    ) -> GradeRepoResult<Option<GradeScaleRule>>;
}

/// SQLite-backed grade scale repository.
pub struct SqliteGradeScaleRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteGradeScaleRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> GradeRepoResult<Self> {
        ensure_schema(conn, &[SCALES_TABLE, RULES_TABLE])?;
        Ok(Self { conn })
    }
}

impl GradeScaleRepository for SqliteGradeScaleRepository<'_> {
    fn create_scale(&self, name: &str) -> GradeRepoResult<GradeScale> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GradeRepoError::InvalidScaleName);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if load_scale_by_name(&tx, name)?.is_some() {
            return Err(GradeRepoError::DuplicateScaleName(name.to_string()));
        }

        let scale = GradeScale {
            scale_id: Uuid::new_v4(),
            name: name.to_string(),
        };
        tx.execute(
            "INSERT INTO grade_scales (scale_uuid, name) VALUES (?1, ?2);",
            params![scale.scale_id.to_string(), scale.name.as_str()],
        )?;
        tx.commit()?;
        Ok(scale)
    }

    fn get_scale(&self, scale_id: ScaleId) -> GradeRepoResult<Option<GradeScale>> {
        load_scale(self.conn, scale_id)
    }

    fn find_scale_by_name(&self, name: &str) -> GradeRepoResult<Option<GradeScale>> {
        load_scale_by_name(self.conn, name.trim())
    }

    fn delete_scale(&self, scale_id: ScaleId) -> GradeRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM grade_scales WHERE scale_uuid = ?1;",
            [scale_id.to_string()],
        )?;
        if changed == 0 {
            return Err(GradeRepoError::ScaleNotFound(scale_id));
        }
        Ok(())
    }

    fn list_rules(&self, scale_id: ScaleId) -> GradeRepoResult<Vec<GradeScaleRule>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RULE_SELECT_SQL}
             WHERE scale_uuid = ?1
             ORDER BY min_grade_centi ASC, max_grade_centi ASC;"
        ))?;
        let mut rows = stmt.query([scale_id.to_string()])?;
        let mut rules = Vec::new();
        while let Some(row) = rows.next()? {
            rules.push(parse_rule_row(row)?);
        }
        Ok(rules)
    }

    fn insert_rule(&self, scale_id: ScaleId, rule: &ValidRule) -> GradeRepoResult<GradeScaleRule> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if load_scale(&tx, scale_id)?.is_none() {
            return Err(GradeRepoError::ScaleNotFound(scale_id));
        }
        ensure_no_overlap(&tx, scale_id, rule, None)?;

        let stored = GradeScaleRule {
            rule_id: Uuid::new_v4(),
            scale_id,
            min_grade: rule.min_grade,
            max_grade: rule.max_grade,
            letter_grade: rule.letter_grade.clone(),
            numeric_scale: rule.numeric_scale,
        };
        tx.execute(
            "INSERT INTO grade_scale_rules (
                rule_uuid,
                scale_uuid,
                min_grade_centi,
                max_grade_centi,
                letter_grade,
                numeric_scale_centi
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                stored.rule_id.to_string(),
                scale_id.to_string(),
                stored.min_grade.hundredths(),
                stored.max_grade.hundredths(),
                stored.letter_grade.as_str(),
                stored.numeric_scale.hundredths(),
            ],
        )?;
        tx.commit()?;
        Ok(stored)
    }

    fn update_rule(&self, rule_id: RuleId, rule: &ValidRule) -> GradeRepoResult<GradeScaleRule> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let current = load_rule(&tx, rule_id)?.ok_or(GradeRepoError::RuleNotFound(rule_id))?;
        ensure_no_overlap(&tx, current.scale_id, rule, Some(rule_id))?;

        tx.execute(
            "UPDATE grade_scale_rules
             SET min_grade_centi = ?2,
                 max_grade_centi = ?3,
                 letter_grade = ?4,
                 numeric_scale_centi = ?5
             WHERE rule_uuid = ?1;",
            params![
                rule_id.to_string(),
                rule.min_grade.hundredths(),
                rule.max_grade.hundredths(),
                rule.letter_grade.as_str(),
                rule.numeric_scale.hundredths(),
            ],
        )?;
        tx.commit()?;

        Ok(GradeScaleRule {
            rule_id,
            scale_id: current.scale_id,
            min_grade: rule.min_grade,
            max_grade: rule.max_grade,
            letter_grade: rule.letter_grade.clone(),
            numeric_scale: rule.numeric_scale,
        })
    }

    fn delete_rule(&self, rule_id: RuleId) -> GradeRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM grade_scale_rules WHERE rule_uuid = ?1;",
            [rule_id.to_string()],
        )?;
        if changed == 0 {
            return Err(GradeRepoError::RuleNotFound(rule_id));
        }
        Ok(())
    }

    fn find_covering_rule(
        &self,
        scale_id: ScaleId,
        score: ScoreSpan,
    ) -> GradeRepoResult<Option<GradeScaleRule>> {
        // One statement: the scale check and the range match see the same snapshot.
        let mut stmt = self.conn.prepare(
            "SELECT
                r.rule_uuid AS rule_uuid,
                s.scale_uuid AS scale_uuid,
                r.min_grade_centi AS min_grade_centi,
                r.max_grade_centi AS max_grade_centi,
                r.letter_grade AS letter_grade,
                r.numeric_scale_centi AS numeric_scale_centi
             FROM grade_scales s
             LEFT JOIN grade_scale_rules r
               ON r.scale_uuid = s.scale_uuid
              AND r.min_grade_centi <= ?2
              AND r.max_grade_centi >= ?3
             WHERE s.scale_uuid = ?1
             ORDER BY r.min_grade_centi ASC
             LIMIT 1;",
        )?;
        let mut rows = stmt.query(params![
            scale_id.to_string(),
            score.floor().hundredths(),
            score.ceil().hundredths()
        ])?;
        let Some(row) = rows.next()? else {
            return Err(GradeRepoError::ScaleNotFound(scale_id));
        };
        if row.get::<_, Option<String>>("rule_uuid")?.is_none() {
            return Ok(None);
        }
        parse_rule_row(row).map(Some)
    }
}

fn ensure_no_overlap(
    conn: &Connection,
    scale_id: ScaleId,
    rule: &ValidRule,
    ignore: Option<RuleId>,
) -> GradeRepoResult<()> {
    let mut stmt = conn.prepare(&format!(
        "{RULE_SELECT_SQL}
         WHERE scale_uuid = ?1
           AND min_grade_centi <= ?3
           AND max_grade_centi >= ?2
           AND (?4 IS NULL OR rule_uuid != ?4)
         ORDER BY min_grade_centi ASC
         LIMIT 1;"
    ))?;
    let mut rows = stmt.query(params![
        scale_id.to_string(),
        rule.min_grade.hundredths(),
        rule.max_grade.hundredths(),
        ignore.map(|id| id.to_string()),
    ])?;
    if let Some(row) = rows.next()? {
        let existing = parse_rule_row(row)?;
        return Err(GradeRepoError::RuleOverlap {
            rule_id: existing.rule_id,
            min_grade: existing.min_grade,
            max_grade: existing.max_grade,
        });
    }
    Ok(())
}

fn load_scale(conn: &Connection, scale_id: ScaleId) -> GradeRepoResult<Option<GradeScale>> {
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM grade_scales WHERE scale_uuid = ?1;",
            [scale_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name.map(|name| GradeScale { scale_id, name }))
}

fn load_scale_by_name(conn: &Connection, name: &str) -> GradeRepoResult<Option<GradeScale>> {
    let scale_text: Option<String> = conn
        .query_row(
            "SELECT scale_uuid FROM grade_scales WHERE name = ?1;",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    scale_text
        .map(|text| {
            let scale_id = parse_uuid(&text, "grade_scales.scale_uuid")
                .map_err(GradeRepoError::InvalidData)?;
            Ok(GradeScale {
                scale_id,
                name: name.to_string(),
            })
        })
        .transpose()
}

fn load_rule(conn: &Connection, rule_id: RuleId) -> GradeRepoResult<Option<GradeScaleRule>> {
    let mut stmt = conn.prepare(&format!("{RULE_SELECT_SQL} WHERE rule_uuid = ?1;"))?;
    let mut rows = stmt.query([rule_id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_rule_row(row)?));
    }
    Ok(None)
}

fn parse_rule_row(row: &Row<'_>) -> GradeRepoResult<GradeScaleRule> {
    let rule_text: String = row.get("rule_uuid")?;
    let scale_text: String = row.get("scale_uuid")?;
    Ok(GradeScaleRule {
        rule_id: parse_uuid(&rule_text, "grade_scale_rules.rule_uuid")
            .map_err(GradeRepoError::InvalidData)?,
        scale_id: parse_uuid(&scale_text, "grade_scale_rules.scale_uuid")
            .map_err(GradeRepoError::InvalidData)?,
        min_grade: Points::from_hundredths(row.get("min_grade_centi")?),
        max_grade: Points::from_hundredths(row.get("max_grade_centi")?),
        letter_grade: row.get("letter_grade")?,
        numeric_scale: Points::from_hundredths(row.get("numeric_scale_centi")?),
    })
}
