//! Capacity pool model.
//!
//! # Responsibility
//! - Describe classrooms and dormitories as capacity-bounded pools.
//! - Provide read-side helpers over a capacity/occupancy pair.
//!
//! # Invariants
//! - `0 <= occupied <= capacity` for every persisted pool.
//! - `occupied` has no public setter; only the capacity store changes it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a classroom or dormitory pool.
pub type PoolId = Uuid;

/// Seats a classroom gets when the caller does not size it explicitly.
pub const DEFAULT_CLASSROOM_CAPACITY: u32 = 40;

/// Which kind of unit a pool hands out.
///
/// An occupant may hold one active allocation per category at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolCategory {
    /// Classroom seats.
    Classroom,
    /// Dormitory beds.
    Dormitory,
}

impl PoolCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classroom => "classroom",
            Self::Dormitory => "dormitory",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "classroom" => Some(Self::Classroom),
            "dormitory" => Some(Self::Dormitory),
            _ => None,
        }
    }

    /// Unit name used in messages (`seat` or `bed`).
    pub fn unit(self) -> &'static str {
        match self {
            Self::Classroom => "seat",
            Self::Dormitory => "bed",
        }
    }
}

/// Pool definition handed in by the embedding layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPool {
    pub category: PoolCategory,
    pub label: String,
    pub capacity: u32,
}

impl NewPool {
    pub fn new(category: PoolCategory, label: impl Into<String>, capacity: u32) -> Self {
        Self {
            category,
            label: label.into(),
            capacity,
        }
    }

    /// Classroom with [`DEFAULT_CLASSROOM_CAPACITY`] seats.
    pub fn classroom(label: impl Into<String>) -> Self {
        Self::new(PoolCategory::Classroom, label, DEFAULT_CLASSROOM_CAPACITY)
    }

    /// Dormitories have no default size; beds must be counted.
    pub fn dormitory(label: impl Into<String>, beds: u32) -> Self {
        Self::new(PoolCategory::Dormitory, label, beds)
    }
}

/// Persisted pool row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub pool_id: PoolId,
    pub category: PoolCategory,
    pub label: String,
    pub capacity: u32,
    pub occupied: u32,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms timestamp of the last capacity or occupancy change.
    pub updated_at: i64,
}

impl ResourcePool {
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            capacity: self.capacity,
            occupied: self.occupied,
        }
    }
}

/// Capacity and occupancy read at one consistent point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub capacity: u32,
    pub occupied: u32,
}

impl PoolSnapshot {
    /// Free units left; zero when the row is over-committed.
    pub fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.occupied)
    }

    pub fn is_full(&self) -> bool {
        self.occupied >= self.capacity
    }

    /// Occupancy as a percentage of capacity. A zero-capacity pool reports 0.
    pub fn occupancy_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        f64::from(self.occupied) / f64::from(self.capacity) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::{NewPool, PoolCategory, PoolSnapshot, DEFAULT_CLASSROOM_CAPACITY};

    #[test]
    fn category_names_roundtrip() {
        for category in [PoolCategory::Classroom, PoolCategory::Dormitory] {
            assert_eq!(PoolCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(PoolCategory::parse("library"), None);
    }

    #[test]
    fn classroom_defaults_to_forty_seats() {
        let pool = NewPool::classroom("Form 1 East");
        assert_eq!(pool.capacity, DEFAULT_CLASSROOM_CAPACITY);
        assert_eq!(pool.category, PoolCategory::Classroom);
    }

    #[test]
    fn snapshot_reports_available_and_percent() {
        let snapshot = PoolSnapshot {
            capacity: 40,
            occupied: 30,
        };
        assert_eq!(snapshot.available(), 10);
        assert!(!snapshot.is_full());
        assert!((snapshot.occupancy_percent() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_capacity_pool_is_full_with_zero_percent() {
        let snapshot = PoolSnapshot {
            capacity: 0,
            occupied: 0,
        };
        assert!(snapshot.is_full());
        assert_eq!(snapshot.available(), 0);
        assert_eq!(snapshot.occupancy_percent(), 0.0);
    }
}
