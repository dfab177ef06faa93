//! Allocation engine: seats and beds under a hard capacity limit.
//!
//! # Responsibility
//! - Allocate, release, and transfer occupants between capacity pools.
//! - Commit the pool counter change and the allocation row together.
//! - Surface invariant violations to operators without crashing.
//!
//! # Invariants
//! - Every mutation runs in one `BEGIN IMMEDIATE` transaction; the write lock
//!   is held before the capacity check, so concurrent allocations serialize
//!   and occupancy is never observed above capacity.
//! - A failed step rolls back every earlier step of the same operation.
//! - One active allocation per `(occupant, category)`.
//! - Classroom and dormitory allocations share this single code path.

use crate::config::ContentionPolicy;
use crate::error::{ErrorKind, HasErrorKind};
use crate::model::allocation::{Allocation, AllocationId, OccupantId};
use crate::model::pool::{PoolCategory, PoolId, PoolSnapshot};
use crate::repo::allocation_repo;
use crate::repo::capacity_store::{
    compare_and_increment_in, load_pool, lock_pools_in_order, SqliteCapacityStore, StoreError,
};
use crate::repo::now_epoch_ms;
use crate::service::contention::{retry_on_contention, CancellationToken};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type AllocationResult<T> = Result<T, AllocationError>;

/// Errors from allocation engine operations.
#[derive(Debug)]
pub enum AllocationError {
    PoolNotFound(PoolId),
    AllocationNotFound(AllocationId),
    /// Pool has no free seat or bed; nothing was written.
    PoolFull { pool_id: PoolId, capacity: u32 },
    AlreadyAllocated {
        occupant_id: OccupantId,
        category: PoolCategory,
        allocation_id: AllocationId,
    },
    NotActive(AllocationId),
    CategoryMismatch {
        pool_id: PoolId,
        expected: PoolCategory,
        actual: PoolCategory,
    },
    /// Write lock could not be acquired within the retry budget.
    Contention,
    /// Persisted counters disagree with allocation rows.
    InvariantViolation(String),
    Cancelled,
    /// Any other capacity store failure.
    Store(StoreError),
}

impl Display for AllocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PoolNotFound(id) => write!(f, "pool not found: {id}"),
            Self::AllocationNotFound(id) => write!(f, "allocation not found: {id}"),
            Self::PoolFull { pool_id, capacity } => {
                write!(f, "pool {pool_id} is full ({capacity} of {capacity} taken)")
            }
            Self::AlreadyAllocated {
                occupant_id,
                category,
                allocation_id,
            } => write!(
                f,
                "occupant {occupant_id} already holds {} allocation {allocation_id}",
                category.as_str()
            ),
            Self::NotActive(id) => write!(f, "allocation {id} is not active"),
            Self::CategoryMismatch {
                pool_id,
                expected,
                actual,
            } => write!(
                f,
                "pool {pool_id} is a {} pool, not {}",
                actual.as_str(),
                expected.as_str()
            ),
            Self::Contention => write!(f, "allocation store is busy; retry the operation"),
            Self::InvariantViolation(message) => write!(f, "invariant violation: {message}"),
            Self::Cancelled => write!(f, "operation cancelled before commit"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AllocationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl HasErrorKind for AllocationError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::PoolNotFound(_) | Self::AllocationNotFound(_) => ErrorKind::NotFound,
            Self::PoolFull { .. } => ErrorKind::CapacityExceeded,
            Self::AlreadyAllocated { .. } => ErrorKind::AlreadyAllocated,
            Self::NotActive(_) => ErrorKind::NotActive,
            Self::CategoryMismatch { .. } => ErrorKind::CategoryMismatch,
            Self::Contention => ErrorKind::Contention,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(err) => err.kind(),
        }
    }
}

impl From<StoreError> for AllocationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(pool_id) => Self::PoolNotFound(pool_id),
            StoreError::CapacityExceeded { pool_id, capacity } => {
                Self::PoolFull { pool_id, capacity }
            }
            StoreError::Contention => Self::Contention,
            other => Self::Store(other),
        }
    }
}

impl From<rusqlite::Error> for AllocationError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::from(value).into()
    }
}

/// Transactional allocation use cases over one connection.
///
/// Concurrent callers each hold their own connection to the same database;
/// isolation comes from SQLite's write lock, not from in-process locking.
pub struct AllocationEngine<'conn> {
    conn: &'conn Connection,
    store: SqliteCapacityStore<'conn>,
    policy: ContentionPolicy,
}

impl<'conn> AllocationEngine<'conn> {
    /// Creates an engine with the default contention policy.
    pub fn try_new(conn: &'conn Connection) -> AllocationResult<Self> {
        Self::with_policy(conn, ContentionPolicy::default())
    }

    pub fn with_policy(
        conn: &'conn Connection,
        policy: ContentionPolicy,
    ) -> AllocationResult<Self> {
        let store = SqliteCapacityStore::try_new(conn)?;
        Ok(Self {
            conn,
            store,
            policy,
        })
    }

    /// Capacity store sharing this engine's connection (pool CRUD, `get`).
    pub fn store(&self) -> &SqliteCapacityStore<'conn> {
        &self.store
    }

    /// Takes one unit of `pool_id` for `occupant_id`.
    ///
    /// # Errors
    /// - `AlreadyAllocated` when the occupant holds an active allocation in `category`.
    /// - `CategoryMismatch` when the pool hands out a different category.
    /// - `PoolFull` when no unit is free; nothing is written.
    pub fn allocate(
        &self,
        occupant_id: OccupantId,
        pool_id: PoolId,
        category: PoolCategory,
    ) -> AllocationResult<Allocation> {
        self.allocate_with(occupant_id, pool_id, category, &CancellationToken::new())
    }

    /// [`Self::allocate`] with a cancellation token checked before commit.
    pub fn allocate_with(
        &self,
        occupant_id: OccupantId,
        pool_id: PoolId,
        category: PoolCategory,
        cancel: &CancellationToken,
    ) -> AllocationResult<Allocation> {
        let started_at = Instant::now();
        let result = retry_on_contention(&self.policy, "allocate", || {
            self.try_allocate(occupant_id, pool_id, category, cancel)
        });
        log_outcome("allocate", category, started_at, &result);
        result
    }

    /// Closes an active allocation and frees its unit.
    ///
    /// If the pool counter is already zero the allocation is still closed, and
    /// `InvariantViolation` reports the drift.
    pub fn release(&self, allocation_id: AllocationId) -> AllocationResult<()> {
        self.release_with(allocation_id, &CancellationToken::new())
    }

    pub fn release_with(
        &self,
        allocation_id: AllocationId,
        cancel: &CancellationToken,
    ) -> AllocationResult<()> {
        let started_at = Instant::now();
        let result = retry_on_contention(&self.policy, "release", || {
            self.try_release(allocation_id, cancel)
        });
        let category = result.as_ref().ok().copied();
        let result = result.map(|_| ());
        log_outcome_optional("release", category, started_at, &result);
        result
    }

    /// Moves an active allocation to `new_pool_id` in one transaction.
    ///
    /// When the destination is full the source allocation stays active and
    /// both counters are unchanged. Transferring into the current pool
    /// returns the allocation as-is.
    pub fn transfer(
        &self,
        allocation_id: AllocationId,
        new_pool_id: PoolId,
    ) -> AllocationResult<Allocation> {
        self.transfer_with(allocation_id, new_pool_id, &CancellationToken::new())
    }

    pub fn transfer_with(
        &self,
        allocation_id: AllocationId,
        new_pool_id: PoolId,
        cancel: &CancellationToken,
    ) -> AllocationResult<Allocation> {
        let started_at = Instant::now();
        let result = retry_on_contention(&self.policy, "transfer", || {
            self.try_transfer(allocation_id, new_pool_id, cancel)
        });
        let category = result.as_ref().ok().map(|allocation| allocation.category);
        log_outcome_optional("transfer", category, started_at, &result);
        result
    }

    pub fn get_allocation(&self, allocation_id: AllocationId) -> AllocationResult<Allocation> {
        allocation_repo::find_allocation(self.conn, allocation_id)?
            .ok_or(AllocationError::AllocationNotFound(allocation_id))
    }

    /// The occupant's current seat or bed, if any.
    pub fn active_allocation(
        &self,
        occupant_id: OccupantId,
        category: PoolCategory,
    ) -> AllocationResult<Option<Allocation>> {
        Ok(allocation_repo::find_active_allocation(
            self.conn,
            occupant_id,
            category,
        )?)
    }

    /// Active allocations of one pool, oldest first.
    pub fn list_active_allocations(&self, pool_id: PoolId) -> AllocationResult<Vec<Allocation>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Deferred)?;
        if load_pool(&tx, pool_id)?.is_none() {
            return Err(AllocationError::PoolNotFound(pool_id));
        }
        let items = allocation_repo::list_active_in_pool(&tx, pool_id)?;
        tx.commit()?;
        Ok(items)
    }

    /// Every allocation the occupant held, closed ones included, oldest first.
    pub fn allocation_history(&self, occupant_id: OccupantId) -> AllocationResult<Vec<Allocation>> {
        Ok(allocation_repo::list_for_occupant(self.conn, occupant_id)?)
    }

    /// Compares a pool's counter with its active allocation rows.
    ///
    /// Returns the snapshot when they agree; otherwise logs and returns
    /// `InvariantViolation` for operator follow-up.
    pub fn verify_pool(&self, pool_id: PoolId) -> AllocationResult<PoolSnapshot> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Deferred)?;
        let pool = load_pool(&tx, pool_id)?.ok_or(AllocationError::PoolNotFound(pool_id))?;
        let active = allocation_repo::count_active_in_pool(&tx, pool_id)?;
        tx.commit()?;

        if active != pool.occupied {
            error!(
                "event=invariant_violation module=allocation check=verify_pool category={} occupied={} active={}",
                pool.category.as_str(),
                pool.occupied,
                active
            );
            return Err(AllocationError::InvariantViolation(format!(
                "pool {pool_id} records {} occupied but has {active} active allocations",
                pool.occupied
            )));
        }
        Ok(pool.snapshot())
    }

    fn try_allocate(
        &self,
        occupant_id: OccupantId,
        pool_id: PoolId,
        category: PoolCategory,
        cancel: &CancellationToken,
    ) -> AllocationResult<Allocation> {
        ensure_not_cancelled(cancel)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let pool = load_pool(&tx, pool_id)?.ok_or(AllocationError::PoolNotFound(pool_id))?;
        if pool.category != category {
            return Err(AllocationError::CategoryMismatch {
                pool_id,
                expected: category,
                actual: pool.category,
            });
        }
        if let Some(existing) = allocation_repo::find_active_allocation(&tx, occupant_id, category)?
        {
            return Err(AllocationError::AlreadyAllocated {
                occupant_id,
                category,
                allocation_id: existing.allocation_id,
            });
        }

        compare_and_increment_in(&tx, pool_id, 1)?;
        let allocation = Allocation::open(occupant_id, pool_id, category, now_epoch_ms());
        allocation_repo::insert_allocation(&tx, &allocation)?;

        ensure_not_cancelled(cancel)?;
        tx.commit()?;
        Ok(allocation)
    }

    fn try_release(
        &self,
        allocation_id: AllocationId,
        cancel: &CancellationToken,
    ) -> AllocationResult<PoolCategory> {
        ensure_not_cancelled(cancel)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let allocation = allocation_repo::find_allocation(&tx, allocation_id)?
            .ok_or(AllocationError::AllocationNotFound(allocation_id))?;
        if !allocation.is_active()
            || !allocation_repo::close_allocation(&tx, allocation_id, now_epoch_ms())?
        {
            return Err(AllocationError::NotActive(allocation_id));
        }

        let violation = match compare_and_increment_in(&tx, allocation.pool_id, -1) {
            Ok(_) => None,
            Err(StoreError::Underflow { pool_id, .. }) => Some(format!(
                "released allocation {allocation_id} but pool {pool_id} already had zero occupancy"
            )),
            Err(other) => return Err(other.into()),
        };

        ensure_not_cancelled(cancel)?;
        tx.commit()?;

        match violation {
            Some(message) => {
                error!(
                    "event=invariant_violation module=allocation check=release_underflow category={}",
                    allocation.category.as_str()
                );
                Err(AllocationError::InvariantViolation(message))
            }
            None => Ok(allocation.category),
        }
    }

    fn try_transfer(
        &self,
        allocation_id: AllocationId,
        new_pool_id: PoolId,
        cancel: &CancellationToken,
    ) -> AllocationResult<Allocation> {
        ensure_not_cancelled(cancel)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let current = allocation_repo::find_allocation(&tx, allocation_id)?
            .ok_or(AllocationError::AllocationNotFound(allocation_id))?;
        if !current.is_active() {
            return Err(AllocationError::NotActive(allocation_id));
        }
        if current.pool_id == new_pool_id {
            return Ok(current);
        }

        let pools = lock_pools_in_order(&tx, &[current.pool_id, new_pool_id])?;
        let destination = pools
            .iter()
            .find(|pool| pool.pool_id == new_pool_id)
            .ok_or(AllocationError::PoolNotFound(new_pool_id))?;
        if destination.category != current.category {
            return Err(AllocationError::CategoryMismatch {
                pool_id: new_pool_id,
                expected: current.category,
                actual: destination.category,
            });
        }

        let now = now_epoch_ms();
        if !allocation_repo::close_allocation(&tx, allocation_id, now)? {
            return Err(AllocationError::NotActive(allocation_id));
        }
        match compare_and_increment_in(&tx, current.pool_id, -1) {
            Ok(_) => {}
            Err(StoreError::Underflow { pool_id, .. }) => {
                error!(
                    "event=invariant_violation module=allocation check=transfer_underflow category={}",
                    current.category.as_str()
                );
                return Err(AllocationError::InvariantViolation(format!(
                    "transfer of allocation {allocation_id} found pool {pool_id} at zero occupancy"
                )));
            }
            Err(other) => return Err(other.into()),
        }
        compare_and_increment_in(&tx, new_pool_id, 1)?;

        let moved = Allocation::open(current.occupant_id, new_pool_id, current.category, now);
        allocation_repo::insert_allocation(&tx, &moved)?;

        ensure_not_cancelled(cancel)?;
        tx.commit()?;
        Ok(moved)
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> AllocationResult<()> {
    if cancel.is_cancelled() {
        return Err(AllocationError::Cancelled);
    }
    Ok(())
}

fn log_outcome<T>(
    operation: &'static str,
    category: PoolCategory,
    started_at: Instant,
    result: &AllocationResult<T>,
) {
    log_outcome_optional(operation, Some(category), started_at, result);
}

fn log_outcome_optional<T>(
    operation: &'static str,
    category: Option<PoolCategory>,
    started_at: Instant,
    result: &AllocationResult<T>,
) {
    let category = category.map_or("unknown", PoolCategory::as_str);
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(_) => info!(
            "event={operation} module=allocation status=ok category={category} duration_ms={duration_ms}"
        ),
        Err(err) => match err.kind() {
            ErrorKind::InvariantViolation | ErrorKind::Storage | ErrorKind::InvalidData => error!(
                "event={operation} module=allocation status=error category={category} duration_ms={duration_ms} error_code={}",
                err.kind()
            ),
            ErrorKind::Contention => warn!(
                "event={operation} module=allocation status=error category={category} duration_ms={duration_ms} error_code=contention"
            ),
            kind => info!(
                "event={operation} module=allocation status=rejected category={category} duration_ms={duration_ms} reason={kind}"
            ),
        },
    }
}
