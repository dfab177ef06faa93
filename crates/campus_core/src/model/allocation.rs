//! Allocation model: one occupant bound to one pool for a time interval.

use super::pool::{PoolCategory, PoolId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AllocationId = Uuid;

/// Stable student identifier supplied by the embedding layer.
pub type OccupantId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub allocation_id: AllocationId,
    pub occupant_id: OccupantId,
    pub pool_id: PoolId,
    pub category: PoolCategory,
    /// Epoch ms when the allocation took effect.
    pub from: i64,
    /// Epoch ms when the allocation was closed; `None` while active.
    pub until: Option<i64>,
}

impl Allocation {
    /// Builds a new active allocation with a fresh id.
    pub(crate) fn open(
        occupant_id: OccupantId,
        pool_id: PoolId,
        category: PoolCategory,
        from: i64,
    ) -> Self {
        Self {
            allocation_id: Uuid::new_v4(),
            occupant_id,
            pool_id,
            category,
            from,
            until: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.until.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::Allocation;
    use crate::model::pool::PoolCategory;
    use uuid::Uuid;

    #[test]
    fn opened_allocation_is_active() {
        let allocation =
            Allocation::open(Uuid::new_v4(), Uuid::new_v4(), PoolCategory::Dormitory, 10);
        assert!(allocation.is_active());
        assert_eq!(allocation.from, 10);
    }
}
