use campus_core::db::open_db_in_memory;
use campus_core::{
    AllocationEngine, AllocationError, CancellationToken, ErrorKind, HasErrorKind, NewPool,
    PoolCategory, ResourcePool,
};
use rusqlite::Connection;
use uuid::Uuid;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn define(engine: &AllocationEngine<'_>, pool: NewPool) -> ResourcePool {
    engine.store().define_pool(&pool).unwrap()
}

fn occupied(engine: &AllocationEngine<'_>, pool: &ResourcePool) -> u32 {
    engine.store().get(pool.pool_id).unwrap().occupied
}

#[test]
fn allocate_takes_one_unit_and_records_active_allocation() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let room = define(&engine, NewPool::classroom("Room 101"));
    let student = Uuid::new_v4();

    let seat = engine
        .allocate(student, room.pool_id, PoolCategory::Classroom)
        .unwrap();

    assert!(seat.is_active());
    assert_eq!(seat.pool_id, room.pool_id);
    assert_eq!(occupied(&engine, &room), 1);
    assert_eq!(
        engine
            .active_allocation(student, PoolCategory::Classroom)
            .unwrap(),
        Some(seat.clone())
    );
    assert_eq!(engine.get_allocation(seat.allocation_id).unwrap(), seat);
    assert_eq!(engine.list_active_allocations(room.pool_id).unwrap(), vec![seat]);
}

#[test]
fn full_pool_rejects_without_writing() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let dorm = define(&engine, NewPool::dormitory("Single room", 1));

    engine
        .allocate(Uuid::new_v4(), dorm.pool_id, PoolCategory::Dormitory)
        .unwrap();
    let late = Uuid::new_v4();
    let err = engine
        .allocate(late, dorm.pool_id, PoolCategory::Dormitory)
        .unwrap_err();

    assert!(matches!(err, AllocationError::PoolFull { capacity: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert_eq!(occupied(&engine, &dorm), 1);
    assert!(engine.allocation_history(late).unwrap().is_empty());
}

#[test]
fn one_active_allocation_per_category() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let room_a = define(&engine, NewPool::classroom("Room A"));
    let room_b = define(&engine, NewPool::classroom("Room B"));
    let dorm = define(&engine, NewPool::dormitory("West Hall", 4));
    let student = Uuid::new_v4();

    let seat = engine
        .allocate(student, room_a.pool_id, PoolCategory::Classroom)
        .unwrap();
    let err = engine
        .allocate(student, room_b.pool_id, PoolCategory::Classroom)
        .unwrap_err();
    match err {
        AllocationError::AlreadyAllocated { allocation_id, .. } => {
            assert_eq!(allocation_id, seat.allocation_id)
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(occupied(&engine, &room_b), 0);

    // A bed does not conflict with a seat.
    engine
        .allocate(student, dorm.pool_id, PoolCategory::Dormitory)
        .unwrap();
    assert_eq!(occupied(&engine, &dorm), 1);
}

#[test]
fn category_must_match_pool() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let room = define(&engine, NewPool::classroom("Room 2"));

    let err = engine
        .allocate(Uuid::new_v4(), room.pool_id, PoolCategory::Dormitory)
        .unwrap_err();
    assert!(matches!(
        err,
        AllocationError::CategoryMismatch {
            expected: PoolCategory::Dormitory,
            actual: PoolCategory::Classroom,
            ..
        }
    ));
    assert_eq!(occupied(&engine, &room), 0);
}

#[test]
fn unknown_ids_are_not_found() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();

    let err = engine
        .allocate(Uuid::new_v4(), Uuid::new_v4(), PoolCategory::Classroom)
        .unwrap_err();
    assert!(matches!(err, AllocationError::PoolNotFound(_)));

    let err = engine.release(Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, AllocationError::AllocationNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn release_frees_unit_and_rejects_second_release() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let dorm = define(&engine, NewPool::dormitory("South Hall", 1));
    let student = Uuid::new_v4();
    let newcomer = Uuid::new_v4();

    let bed = engine
        .allocate(student, dorm.pool_id, PoolCategory::Dormitory)
        .unwrap();
    let err = engine
        .allocate(newcomer, dorm.pool_id, PoolCategory::Dormitory)
        .unwrap_err();
    assert!(matches!(err, AllocationError::PoolFull { .. }));

    engine.release(bed.allocation_id).unwrap();
    assert_eq!(occupied(&engine, &dorm), 0);
    let closed = engine.get_allocation(bed.allocation_id).unwrap();
    assert!(closed.until.is_some_and(|until| until >= closed.from));

    let err = engine.release(bed.allocation_id).unwrap_err();
    assert!(matches!(err, AllocationError::NotActive(id) if id == bed.allocation_id));
    assert_eq!(occupied(&engine, &dorm), 0);

    // Another occupant takes the freed bed.
    let taken = engine
        .allocate(newcomer, dorm.pool_id, PoolCategory::Dormitory)
        .unwrap();
    assert_eq!(taken.occupant_id, newcomer);
    assert_eq!(occupied(&engine, &dorm), 1);
    assert!(engine.active_allocation(student, PoolCategory::Dormitory).unwrap().is_none());

    let err = engine
        .allocate(student, dorm.pool_id, PoolCategory::Dormitory)
        .unwrap_err();
    assert!(matches!(err, AllocationError::PoolFull { .. }));
    assert_eq!(engine.allocation_history(student).unwrap().len(), 1);
}

#[test]
fn transfer_moves_allocation_and_both_counters() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let from = define(&engine, NewPool::dormitory("Hall 1", 2));
    let to = define(&engine, NewPool::dormitory("Hall 2", 2));
    let student = Uuid::new_v4();

    let bed = engine
        .allocate(student, from.pool_id, PoolCategory::Dormitory)
        .unwrap();
    let moved = engine.transfer(bed.allocation_id, to.pool_id).unwrap();

    assert_eq!(moved.pool_id, to.pool_id);
    assert_eq!(moved.occupant_id, student);
    assert!(moved.is_active());
    assert_eq!(occupied(&engine, &from), 0);
    assert_eq!(occupied(&engine, &to), 1);
    assert!(!engine.get_allocation(bed.allocation_id).unwrap().is_active());
    assert_eq!(
        engine
            .active_allocation(student, PoolCategory::Dormitory)
            .unwrap()
            .map(|allocation| allocation.allocation_id),
        Some(moved.allocation_id)
    );
}

#[test]
fn transfer_into_full_pool_leaves_everything_untouched() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let from = define(&engine, NewPool::dormitory("Hall 1", 2));
    let to = define(&engine, NewPool::dormitory("Hall 2", 1));

    engine
        .allocate(Uuid::new_v4(), to.pool_id, PoolCategory::Dormitory)
        .unwrap();
    let bed = engine
        .allocate(Uuid::new_v4(), from.pool_id, PoolCategory::Dormitory)
        .unwrap();

    let err = engine.transfer(bed.allocation_id, to.pool_id).unwrap_err();
    assert!(matches!(err, AllocationError::PoolFull { pool_id, .. } if pool_id == to.pool_id));

    assert_eq!(occupied(&engine, &from), 1);
    assert_eq!(occupied(&engine, &to), 1);
    assert_eq!(engine.get_allocation(bed.allocation_id).unwrap(), bed);
}

#[test]
fn transfer_to_current_pool_is_a_no_op() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let room = define(&engine, NewPool::classroom("Room 9"));

    let seat = engine
        .allocate(Uuid::new_v4(), room.pool_id, PoolCategory::Classroom)
        .unwrap();
    let same = engine.transfer(seat.allocation_id, room.pool_id).unwrap();

    assert_eq!(same, seat);
    assert_eq!(occupied(&engine, &room), 1);
}

#[test]
fn transfer_rejects_other_category_and_closed_allocations() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let room = define(&engine, NewPool::classroom("Room 3"));
    let dorm = define(&engine, NewPool::dormitory("Hall 3", 3));

    let seat = engine
        .allocate(Uuid::new_v4(), room.pool_id, PoolCategory::Classroom)
        .unwrap();
    let err = engine.transfer(seat.allocation_id, dorm.pool_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CategoryMismatch);
    assert_eq!(occupied(&engine, &room), 1);
    assert_eq!(occupied(&engine, &dorm), 0);

    engine.release(seat.allocation_id).unwrap();
    let err = engine.transfer(seat.allocation_id, room.pool_id).unwrap_err();
    assert!(matches!(err, AllocationError::NotActive(_)));
}

#[test]
fn cancelled_token_aborts_before_commit() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let room = define(&engine, NewPool::classroom("Room 4"));
    let student = Uuid::new_v4();

    let token = CancellationToken::new();
    token.cancel();
    let err = engine
        .allocate_with(student, room.pool_id, PoolCategory::Classroom, &token)
        .unwrap_err();

    assert!(matches!(err, AllocationError::Cancelled));
    assert_eq!(occupied(&engine, &room), 0);
    assert!(engine
        .active_allocation(student, PoolCategory::Classroom)
        .unwrap()
        .is_none());

    let seat = engine
        .allocate(student, room.pool_id, PoolCategory::Classroom)
        .unwrap();
    let err = engine
        .release_with(seat.allocation_id, &token)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(engine.get_allocation(seat.allocation_id).unwrap().is_active());
    assert_eq!(occupied(&engine, &room), 1);
}

#[test]
fn release_underflow_closes_allocation_and_reports_invariant_violation() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let dorm = define(&engine, NewPool::dormitory("Annex", 2));

    let bed = engine
        .allocate(Uuid::new_v4(), dorm.pool_id, PoolCategory::Dormitory)
        .unwrap();
    conn.execute(
        "UPDATE resource_pools SET occupied = 0 WHERE pool_uuid = ?1;",
        [dorm.pool_id.to_string()],
    )
    .unwrap();

    let err = engine.release(bed.allocation_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    assert!(!engine.get_allocation(bed.allocation_id).unwrap().is_active());
    assert_eq!(occupied(&engine, &dorm), 0);
}

#[test]
fn verify_pool_detects_counter_drift() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let room = define(&engine, NewPool::classroom("Room 5"));

    engine
        .allocate(Uuid::new_v4(), room.pool_id, PoolCategory::Classroom)
        .unwrap();
    let snapshot = engine.verify_pool(room.pool_id).unwrap();
    assert_eq!(snapshot.occupied, 1);
    assert_eq!(snapshot.available(), 39);

    conn.execute(
        "UPDATE resource_pools SET occupied = 3 WHERE pool_uuid = ?1;",
        [room.pool_id.to_string()],
    )
    .unwrap();
    let err = engine.verify_pool(room.pool_id).unwrap_err();
    assert!(matches!(err, AllocationError::InvariantViolation(_)));
}

#[test]
fn delete_pool_is_refused_while_occupied() {
    let conn = setup();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let room = define(&engine, NewPool::classroom("Room 6"));

    let seat = engine
        .allocate(Uuid::new_v4(), room.pool_id, PoolCategory::Classroom)
        .unwrap();
    let err = engine.store().delete_pool(room.pool_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolNotEmpty);

    engine.release(seat.allocation_id).unwrap();
    engine.store().delete_pool(room.pool_id).unwrap();
    assert!(matches!(
        engine.get_allocation(seat.allocation_id).unwrap_err(),
        AllocationError::AllocationNotFound(_)
    ));
}
