//! Capacity store: durable `{pool -> (capacity, occupied)}` records.
//!
//! # Responsibility
//! - Define, size, list, and delete classroom and dormitory pools.
//! - Own the only code path that changes `occupied`.
//!
//! # Invariants
//! - `occupied` changes only through `compare_and_increment*`, inside a write
//!   transaction; the update is guarded on the value that was read.
//! - `0 <= occupied <= capacity` is checked here and again by a table `CHECK`.
//! - Multi-pool operations touch pool rows in ascending `pool_id` order.

use crate::db::{ensure_schema, DbError, RequiredTable};
use crate::error::{ErrorKind, HasErrorKind};
use crate::model::pool::{NewPool, PoolCategory, PoolId, PoolSnapshot, ResourcePool};
use crate::repo::allocation_repo::{self, ALLOCATIONS_TABLE};
use crate::repo::{now_epoch_ms, parse_uuid};
use log::info;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const POOL_SELECT_SQL: &str = "SELECT
    pool_uuid,
    category,
    label,
    capacity,
    occupied,
    created_at,
    updated_at
FROM resource_pools";

pub(crate) const POOLS_TABLE: RequiredTable = RequiredTable {
    name: "resource_pools",
    columns: &[
        "pool_uuid",
        "category",
        "label",
        "capacity",
        "occupied",
        "created_at",
        "updated_at",
    ],
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from capacity store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    NotFound(PoolId),
    /// Increment would push `occupied` above `capacity`.
    CapacityExceeded { pool_id: PoolId, capacity: u32 },
    /// Decrement would push `occupied` below zero.
    Underflow {
        pool_id: PoolId,
        occupied: u32,
        delta: i64,
    },
    CapacityBelowOccupancy {
        pool_id: PoolId,
        requested: u32,
        occupied: u32,
    },
    PoolNotEmpty { pool_id: PoolId, occupied: u32 },
    /// Pool label is blank after trim.
    InvalidLabel,
    /// Lock wait timed out, or the guarded update lost a race.
    Contention,
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "pool not found: {id}"),
            Self::CapacityExceeded { pool_id, capacity } => {
                write!(f, "pool {pool_id} is at capacity {capacity}")
            }
            Self::Underflow {
                pool_id,
                occupied,
                delta,
            } => write!(
                f,
                "pool {pool_id} occupancy {occupied} cannot change by {delta}"
            ),
            Self::CapacityBelowOccupancy {
                pool_id,
                requested,
                occupied,
            } => write!(
                f,
                "pool {pool_id} cannot shrink to {requested}; {occupied} units are occupied"
            ),
            Self::PoolNotEmpty { pool_id, occupied } => {
                write!(f, "pool {pool_id} still has {occupied} occupants")
            }
            Self::InvalidLabel => write!(f, "pool label must not be blank"),
            Self::Contention => write!(f, "capacity store is busy; retry the operation"),
            Self::InvalidData(message) => write!(f, "invalid pool data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl HasErrorKind for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Db(_) => ErrorKind::Storage,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::Underflow { .. } => ErrorKind::Underflow,
            Self::CapacityBelowOccupancy { .. } => ErrorKind::CapacityBelowOccupancy,
            Self::PoolNotEmpty { .. } => ErrorKind::PoolNotEmpty,
            Self::InvalidLabel => ErrorKind::InvalidInput,
            Self::Contention => ErrorKind::Contention,
            Self::InvalidData(_) => ErrorKind::InvalidData,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        if value.is_contention() {
            Self::Contention
        } else {
            Self::Db(value)
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        DbError::Sqlite(value).into()
    }
}

/// SQLite-backed capacity store.
pub struct SqliteCapacityStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCapacityStore<'conn> {
    /// Creates the store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_schema(conn, &[POOLS_TABLE, ALLOCATIONS_TABLE])?;
        Ok(Self { conn })
    }

    /// Registers a pool with zero occupancy.
    pub fn define_pool(&self, pool: &NewPool) -> StoreResult<ResourcePool> {
        let label = pool.label.trim();
        if label.is_empty() {
            return Err(StoreError::InvalidLabel);
        }

        let pool_id = Uuid::new_v4();
        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO resource_pools (
                pool_uuid,
                category,
                label,
                capacity,
                occupied,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5);",
            params![
                pool_id.to_string(),
                pool.category.as_str(),
                label,
                pool.capacity,
                now,
            ],
        )?;

        info!(
            "event=pool_define module=store status=ok category={} capacity={}",
            pool.category.as_str(),
            pool.capacity
        );
        self.pool(pool_id)
    }

    /// Reads `(capacity, occupied)` for one pool.
    pub fn get(&self, pool_id: PoolId) -> StoreResult<PoolSnapshot> {
        self.pool(pool_id).map(|pool| pool.snapshot())
    }

    /// Loads the full pool row.
    pub fn pool(&self, pool_id: PoolId) -> StoreResult<ResourcePool> {
        load_pool(self.conn, pool_id)?.ok_or(StoreError::NotFound(pool_id))
    }

    /// Lists pools ordered by label, optionally filtered by category.
    pub fn list_pools(&self, category: Option<PoolCategory>) -> StoreResult<Vec<ResourcePool>> {
        let mut stmt = self.conn.prepare(&format!(
            "{POOL_SELECT_SQL}
             WHERE (?1 IS NULL OR category = ?1)
             ORDER BY label ASC, pool_uuid ASC;"
        ))?;
        let mut rows = stmt.query([category.map(PoolCategory::as_str)])?;
        let mut pools = Vec::new();
        while let Some(row) = rows.next()? {
            pools.push(parse_pool_row(row)?);
        }
        Ok(pools)
    }

    /// Atomically applies `delta` to a pool's occupancy and returns the new value.
    ///
    /// Runs in its own immediate transaction. The allocation engine uses the
    /// transaction-scoped variant instead so the counter and the allocation row
    /// commit together; a bare call here is not paired with any allocation.
    pub fn compare_and_increment(&self, pool_id: PoolId, delta: i64) -> StoreResult<u32> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let occupied = compare_and_increment_in(&tx, pool_id, delta)?;
        tx.commit()?;
        Ok(occupied)
    }

    /// Changes a pool's capacity; never below its current occupancy.
    pub fn resize_pool(&self, pool_id: PoolId, capacity: u32) -> StoreResult<ResourcePool> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let pool = load_pool(&tx, pool_id)?.ok_or(StoreError::NotFound(pool_id))?;
        if capacity < pool.occupied {
            return Err(StoreError::CapacityBelowOccupancy {
                pool_id,
                requested: capacity,
                occupied: pool.occupied,
            });
        }

        tx.execute(
            "UPDATE resource_pools
             SET capacity = ?2,
                 updated_at = ?3
             WHERE pool_uuid = ?1;",
            params![pool_id.to_string(), capacity, now_epoch_ms()],
        )?;
        let resized = load_pool(&tx, pool_id)?.ok_or(StoreError::NotFound(pool_id))?;
        tx.commit()?;

        info!(
            "event=pool_resize module=store status=ok from={} to={}",
            pool.capacity, capacity
        );
        Ok(resized)
    }

    /// Deletes an empty pool together with its closed allocation history.
    pub fn delete_pool(&self, pool_id: PoolId) -> StoreResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let pool = load_pool(&tx, pool_id)?.ok_or(StoreError::NotFound(pool_id))?;
        let active = allocation_repo::count_active_in_pool(&tx, pool_id)?;
        if pool.occupied > 0 || active > 0 {
            return Err(StoreError::PoolNotEmpty {
                pool_id,
                occupied: pool.occupied.max(active),
            });
        }

        tx.execute(
            "DELETE FROM resource_pools WHERE pool_uuid = ?1;",
            [pool_id.to_string()],
        )?;
        tx.commit()?;
        info!("event=pool_delete module=store status=ok");
        Ok(())
    }
}

/// Reads one pool row through any connection or open transaction.
pub(crate) fn load_pool(conn: &Connection, pool_id: PoolId) -> StoreResult<Option<ResourcePool>> {
    let mut stmt = conn.prepare(&format!("{POOL_SELECT_SQL} WHERE pool_uuid = ?1;"))?;
    let mut rows = stmt.query([pool_id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_pool_row(row)?));
    }
    Ok(None)
}

/// Loads every listed pool in ascending id order, failing on the first unknown id.
///
/// Call inside the write transaction before mutating any of the pools. The
/// fixed order keeps two opposite transfers from locking rows crosswise on
/// stores with row-level locks.
pub(crate) fn lock_pools_in_order(
    conn: &Connection,
    pool_ids: &[PoolId],
) -> StoreResult<Vec<ResourcePool>> {
    let mut ordered = pool_ids.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    ordered
        .into_iter()
        .map(|pool_id| load_pool(conn, pool_id)?.ok_or(StoreError::NotFound(pool_id)))
        .collect()
}

/// Guarded read-modify-write of `occupied`. Caller must hold a write transaction.
pub(crate) fn compare_and_increment_in(
    conn: &Connection,
    pool_id: PoolId,
    delta: i64,
) -> StoreResult<u32> {
    let pool = load_pool(conn, pool_id)?.ok_or(StoreError::NotFound(pool_id))?;
    let next = i64::from(pool.occupied) + delta;

    if delta > 0 && next > i64::from(pool.capacity) {
        return Err(StoreError::CapacityExceeded {
            pool_id,
            capacity: pool.capacity,
        });
    }
    if next < 0 {
        return Err(StoreError::Underflow {
            pool_id,
            occupied: pool.occupied,
            delta,
        });
    }
    let next = u32::try_from(next)
        .map_err(|_| StoreError::InvalidData(format!("occupancy {next} out of range")))?;

    let changed = conn.execute(
        "UPDATE resource_pools
         SET occupied = ?2,
             updated_at = ?4
         WHERE pool_uuid = ?1
           AND occupied = ?3;",
        params![pool_id.to_string(), next, pool.occupied, now_epoch_ms()],
    )?;
    if changed == 0 {
        return Err(StoreError::Contention);
    }

    Ok(next)
}

fn parse_pool_row(row: &Row<'_>) -> StoreResult<ResourcePool> {
    let pool_text: String = row.get("pool_uuid")?;
    let pool_id =
        parse_uuid(&pool_text, "resource_pools.pool_uuid").map_err(StoreError::InvalidData)?;

    let category_text: String = row.get("category")?;
    let category = PoolCategory::parse(&category_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid category `{category_text}` in resource_pools.category"
        ))
    })?;

    Ok(ResourcePool {
        pool_id,
        category,
        label: row.get("label")?,
        capacity: parse_count(row, "capacity")?,
        occupied: parse_count(row, "occupied")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_count(row: &Row<'_>, column: &'static str) -> StoreResult<u32> {
    let value: i64 = row.get(column)?;
    u32::try_from(value).map_err(|_| {
        StoreError::InvalidData(format!("invalid {column} value `{value}` in resource_pools"))
    })
}
