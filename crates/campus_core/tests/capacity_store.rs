use campus_core::db::open_db_in_memory;
use campus_core::{
    ErrorKind, HasErrorKind, NewPool, PoolCategory, PoolSnapshot, SqliteCapacityStore, StoreError,
};
use uuid::Uuid;

fn setup() -> rusqlite::Connection {
    open_db_in_memory().unwrap()
}

#[test]
fn define_pool_starts_empty_and_applies_classroom_default() {
    let conn = setup();
    let store = SqliteCapacityStore::try_new(&conn).unwrap();

    let room = store.define_pool(&NewPool::classroom("  Room 101 ")).unwrap();
    assert_eq!(room.label, "Room 101");
    assert_eq!(room.category, PoolCategory::Classroom);
    assert_eq!(
        store.get(room.pool_id).unwrap(),
        PoolSnapshot {
            capacity: 40,
            occupied: 0
        }
    );

    let err = store.define_pool(&NewPool::dormitory("   ", 4)).unwrap_err();
    assert!(matches!(err, StoreError::InvalidLabel));
}

#[test]
fn get_unknown_pool_is_not_found() {
    let conn = setup();
    let store = SqliteCapacityStore::try_new(&conn).unwrap();

    let missing = Uuid::new_v4();
    let err = store.get(missing).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(id) if id == missing));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn compare_and_increment_stops_at_capacity_and_zero() {
    let conn = setup();
    let store = SqliteCapacityStore::try_new(&conn).unwrap();
    let dorm = store.define_pool(&NewPool::dormitory("North Hall", 2)).unwrap();

    assert_eq!(store.compare_and_increment(dorm.pool_id, 1).unwrap(), 1);
    assert_eq!(store.compare_and_increment(dorm.pool_id, 1).unwrap(), 2);

    let err = store.compare_and_increment(dorm.pool_id, 1).unwrap_err();
    assert!(matches!(err, StoreError::CapacityExceeded { capacity: 2, .. }));
    assert_eq!(store.get(dorm.pool_id).unwrap().occupied, 2);

    assert_eq!(store.compare_and_increment(dorm.pool_id, -2).unwrap(), 0);
    let err = store.compare_and_increment(dorm.pool_id, -1).unwrap_err();
    assert!(matches!(err, StoreError::Underflow { occupied: 0, delta: -1, .. }));
    assert_eq!(err.kind(), ErrorKind::Underflow);
    assert_eq!(store.get(dorm.pool_id).unwrap().occupied, 0);
}

#[test]
fn zero_capacity_pool_never_admits() {
    let conn = setup();
    let store = SqliteCapacityStore::try_new(&conn).unwrap();
    let closed = store.define_pool(&NewPool::dormitory("Closed wing", 0)).unwrap();

    let err = store.compare_and_increment(closed.pool_id, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

    let snapshot = store.get(closed.pool_id).unwrap();
    assert_eq!(snapshot.available(), 0);
    assert!(snapshot.is_full());
    assert_eq!(snapshot.occupancy_percent(), 0.0);
}

#[test]
fn resize_refuses_to_drop_below_occupancy() {
    let conn = setup();
    let store = SqliteCapacityStore::try_new(&conn).unwrap();
    let room = store
        .define_pool(&NewPool::new(PoolCategory::Classroom, "Lab", 3))
        .unwrap();
    store.compare_and_increment(room.pool_id, 2).unwrap();

    let err = store.resize_pool(room.pool_id, 1).unwrap_err();
    assert!(matches!(
        err,
        StoreError::CapacityBelowOccupancy {
            requested: 1,
            occupied: 2,
            ..
        }
    ));

    let resized = store.resize_pool(room.pool_id, 2).unwrap();
    assert_eq!(resized.capacity, 2);
    assert!(resized.snapshot().is_full());
}

#[test]
fn delete_pool_requires_empty_pool() {
    let conn = setup();
    let store = SqliteCapacityStore::try_new(&conn).unwrap();
    let room = store.define_pool(&NewPool::classroom("Room 7")).unwrap();
    store.compare_and_increment(room.pool_id, 1).unwrap();

    let err = store.delete_pool(room.pool_id).unwrap_err();
    assert!(matches!(err, StoreError::PoolNotEmpty { occupied: 1, .. }));

    store.compare_and_increment(room.pool_id, -1).unwrap();
    store.delete_pool(room.pool_id).unwrap();
    assert!(matches!(
        store.get(room.pool_id).unwrap_err(),
        StoreError::NotFound(_)
    ));
}

#[test]
fn list_pools_filters_by_category_and_sorts_by_label() {
    let conn = setup();
    let store = SqliteCapacityStore::try_new(&conn).unwrap();
    store.define_pool(&NewPool::classroom("Room B")).unwrap();
    store.define_pool(&NewPool::dormitory("East Hall", 10)).unwrap();
    store.define_pool(&NewPool::classroom("Room A")).unwrap();

    let classrooms = store.list_pools(Some(PoolCategory::Classroom)).unwrap();
    let labels: Vec<&str> = classrooms.iter().map(|pool| pool.label.as_str()).collect();
    assert_eq!(labels, vec!["Room A", "Room B"]);

    assert_eq!(store.list_pools(None).unwrap().len(), 3);
    assert_eq!(
        store.list_pools(Some(PoolCategory::Dormitory)).unwrap()[0].capacity,
        10
    );
}
