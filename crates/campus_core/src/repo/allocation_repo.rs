//! Allocation row persistence.
//!
//! All functions take `&Connection` so the engine can run them inside the same
//! immediate transaction that moves the pool counter.
//!
//! # Invariants
//! - At most one row per `(occupant, category)` has `allocated_until IS NULL`
//!   (enforced by a partial unique index as well as by engine checks).
//! - Closing an allocation only touches active rows.

use crate::db::RequiredTable;
use crate::model::allocation::{Allocation, AllocationId, OccupantId};
use crate::model::pool::{PoolCategory, PoolId};
use crate::repo::capacity_store::{StoreError, StoreResult};
use crate::repo::parse_uuid;
use rusqlite::{params, Connection, Row};

const ALLOCATION_SELECT_SQL: &str = "SELECT
    allocation_uuid,
    occupant_uuid,
    pool_uuid,
    category,
    allocated_from,
    allocated_until
FROM allocations";

pub(crate) const ALLOCATIONS_TABLE: RequiredTable = RequiredTable {
    name: "allocations",
    columns: &[
        "allocation_uuid",
        "occupant_uuid",
        "pool_uuid",
        "category",
        "allocated_from",
        "allocated_until",
    ],
};

pub(crate) fn insert_allocation(conn: &Connection, allocation: &Allocation) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO allocations (
            allocation_uuid,
            occupant_uuid,
            pool_uuid,
            category,
            allocated_from,
            allocated_until
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            allocation.allocation_id.to_string(),
            allocation.occupant_id.to_string(),
            allocation.pool_id.to_string(),
            allocation.category.as_str(),
            allocation.from,
            allocation.until,
        ],
    )?;
    Ok(())
}

pub(crate) fn find_allocation(
    conn: &Connection,
    allocation_id: AllocationId,
) -> StoreResult<Option<Allocation>> {
    query_one(
        conn,
        &format!("{ALLOCATION_SELECT_SQL} WHERE allocation_uuid = ?1;"),
        &[&allocation_id.to_string()],
    )
}

pub(crate) fn find_active_allocation(
    conn: &Connection,
    occupant_id: OccupantId,
    category: PoolCategory,
) -> StoreResult<Option<Allocation>> {
    query_one(
        conn,
        &format!(
            "{ALLOCATION_SELECT_SQL}
             WHERE occupant_uuid = ?1
               AND category = ?2
               AND allocated_until IS NULL;"
        ),
        &[&occupant_id.to_string(), &category.as_str()],
    )
}

/// Sets `allocated_until`; returns false when the row was already closed.
pub(crate) fn close_allocation(
    conn: &Connection,
    allocation_id: AllocationId,
    until: i64,
) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE allocations
         SET allocated_until = MAX(?2, allocated_from)
         WHERE allocation_uuid = ?1
           AND allocated_until IS NULL;",
        params![allocation_id.to_string(), until],
    )?;
    Ok(changed == 1)
}

pub(crate) fn count_active_in_pool(conn: &Connection, pool_id: PoolId) -> StoreResult<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM allocations
         WHERE pool_uuid = ?1
           AND allocated_until IS NULL;",
        [pool_id.to_string()],
        |row| row.get(0),
    )?;
    u32::try_from(count)
        .map_err(|_| StoreError::InvalidData(format!("active allocation count {count}")))
}

pub(crate) fn list_active_in_pool(
    conn: &Connection,
    pool_id: PoolId,
) -> StoreResult<Vec<Allocation>> {
    query_many(
        conn,
        &format!(
            "{ALLOCATION_SELECT_SQL}
             WHERE pool_uuid = ?1
               AND allocated_until IS NULL
             ORDER BY allocated_from ASC, allocation_uuid ASC;"
        ),
        &[&pool_id.to_string()],
    )
}

/// Every allocation an occupant ever held, oldest first.
pub(crate) fn list_for_occupant(
    conn: &Connection,
    occupant_id: OccupantId,
) -> StoreResult<Vec<Allocation>> {
    query_many(
        conn,
        &format!(
            "{ALLOCATION_SELECT_SQL}
             WHERE occupant_uuid = ?1
             ORDER BY allocated_from ASC, allocation_uuid ASC;"
        ),
        &[&occupant_id.to_string()],
    )
}

fn query_one(
    conn: &Connection,
    sql: &str,
    bind: &[&dyn rusqlite::ToSql],
) -> StoreResult<Option<Allocation>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(bind)?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_allocation_row(row)?));
    }
    Ok(None)
}

fn query_many(
    conn: &Connection,
    sql: &str,
    bind: &[&dyn rusqlite::ToSql],
) -> StoreResult<Vec<Allocation>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(bind)?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse_allocation_row(row)?);
    }
    Ok(items)
}

fn parse_allocation_row(row: &Row<'_>) -> StoreResult<Allocation> {
    let allocation_text: String = row.get("allocation_uuid")?;
    let occupant_text: String = row.get("occupant_uuid")?;
    let pool_text: String = row.get("pool_uuid")?;
    let category_text: String = row.get("category")?;

    let category = PoolCategory::parse(&category_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid category `{category_text}` in allocations.category"
        ))
    })?;

    Ok(Allocation {
        allocation_id: parse_uuid(&allocation_text, "allocations.allocation_uuid")
            .map_err(StoreError::InvalidData)?,
        occupant_id: parse_uuid(&occupant_text, "allocations.occupant_uuid")
            .map_err(StoreError::InvalidData)?,
        pool_id: parse_uuid(&pool_text, "allocations.pool_uuid")
            .map_err(StoreError::InvalidData)?,
        category,
        from: row.get("allocated_from")?,
        until: row.get("allocated_until")?,
    })
}
