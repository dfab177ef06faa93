use campus_core::db::{open_db, open_db_with_config};
use campus_core::{
    AllocationEngine, AllocationError, ContentionPolicy, HasErrorKind, NewPool, PoolCategory,
    PoolId, StoreConfig,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn fresh_db(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("campus.db");
    drop(open_db(&path).unwrap());
    path
}

fn define_pool(path: &Path, pool: NewPool) -> PoolId {
    let conn = open_db(path).unwrap();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    engine.store().define_pool(&pool).unwrap().pool_id
}

#[test]
fn concurrent_allocations_never_exceed_capacity() {
    const CAPACITY: u32 = 5;
    const CONTENDERS: usize = 16;

    let dir = tempfile::tempdir().unwrap();
    let path = fresh_db(&dir);
    let pool_id = define_pool(&path, NewPool::dormitory("Contested Hall", CAPACITY));

    let barrier = Arc::new(Barrier::new(CONTENDERS + 1));
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let path = path.clone();
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let conn = open_db(&path).unwrap();
            let engine = AllocationEngine::try_new(&conn).unwrap();
            barrier.wait();
            let mut observations = 0u32;
            loop {
                let snapshot = engine.store().get(pool_id).unwrap();
                assert!(snapshot.occupied <= snapshot.capacity);
                observations += 1;
                if done.load(Ordering::Acquire) {
                    break observations;
                }
            }
        })
    };

    let workers: Vec<_> = (0..CONTENDERS)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let engine = AllocationEngine::try_new(&conn).unwrap();
                barrier.wait();
                engine.allocate(Uuid::new_v4(), pool_id, PoolCategory::Dormitory)
            })
        })
        .collect();

    let outcomes: Vec<_> = workers
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    done.store(true, Ordering::Release);
    assert!(reader.join().unwrap() > 0);

    let granted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Err(AllocationError::PoolFull { .. })))
        .count();
    assert_eq!(granted, CAPACITY as usize);
    assert_eq!(rejected, CONTENDERS - CAPACITY as usize);

    let conn = open_db(&path).unwrap();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    let snapshot = engine.verify_pool(pool_id).unwrap();
    assert_eq!(snapshot.occupied, CAPACITY);
    assert_eq!(
        engine.list_active_allocations(pool_id).unwrap().len(),
        CAPACITY as usize
    );
}

#[test]
fn racing_duplicate_allocations_grant_one_seat() {
    const ATTEMPTS: usize = 8;

    let dir = tempfile::tempdir().unwrap();
    let path = fresh_db(&dir);
    let pool_id = define_pool(&path, NewPool::classroom("Room 12"));
    let student = Uuid::new_v4();
    let barrier = Arc::new(Barrier::new(ATTEMPTS));

    let outcomes: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let engine = AllocationEngine::try_new(&conn).unwrap();
                barrier.wait();
                engine.allocate(student, pool_id, PoolCategory::Classroom)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes.iter().all(|outcome| matches!(
        outcome,
        Ok(_) | Err(AllocationError::AlreadyAllocated { .. })
    )));

    let conn = open_db(&path).unwrap();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    assert_eq!(engine.verify_pool(pool_id).unwrap().occupied, 1);
}

#[test]
fn opposite_transfers_complete_without_deadlock() {
    const ROUNDS: usize = 20;

    let dir = tempfile::tempdir().unwrap();
    let path = fresh_db(&dir);
    let east = define_pool(&path, NewPool::dormitory("East", 4));
    let west = define_pool(&path, NewPool::dormitory("West", 4));

    let (first, second) = {
        let conn = open_db(&path).unwrap();
        let engine = AllocationEngine::try_new(&conn).unwrap();
        (
            engine
                .allocate(Uuid::new_v4(), east, PoolCategory::Dormitory)
                .unwrap(),
            engine
                .allocate(Uuid::new_v4(), west, PoolCategory::Dormitory)
                .unwrap(),
        )
    };

    let barrier = Arc::new(Barrier::new(2));
    let shuttle = |start: campus_core::Allocation, there: PoolId, back: PoolId| {
        let path = path.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let conn = open_db(&path).unwrap();
            let engine = AllocationEngine::try_new(&conn).unwrap();
            barrier.wait();
            let mut current = start;
            for round in 0..ROUNDS {
                let target = if round % 2 == 0 { there } else { back };
                current = engine.transfer(current.allocation_id, target).unwrap();
            }
            current
        })
    };

    let a = shuttle(first, west, east);
    let b = shuttle(second, east, west);
    let final_a = a.join().unwrap();
    let final_b = b.join().unwrap();

    // Even round count brings each occupant back home.
    assert_eq!(final_a.pool_id, east);
    assert_eq!(final_b.pool_id, west);

    let conn = open_db(&path).unwrap();
    let engine = AllocationEngine::try_new(&conn).unwrap();
    assert_eq!(engine.verify_pool(east).unwrap().occupied, 1);
    assert_eq!(engine.verify_pool(west).unwrap().occupied, 1);
    assert_eq!(
        engine.allocation_history(final_a.occupant_id).unwrap().len(),
        ROUNDS + 1
    );
}

#[test]
fn held_write_lock_surfaces_contention_after_bounded_wait() {
    let dir = tempfile::tempdir().unwrap();
    let path = fresh_db(&dir);
    let pool_id = define_pool(&path, NewPool::dormitory("Locked Hall", 3));

    let conn = open_db_with_config(&path, &StoreConfig { busy_timeout_ms: 50 }).unwrap();
    let policy = ContentionPolicy {
        max_retries: 2,
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        backoff_multiplier: 2.0,
    };
    let engine = AllocationEngine::with_policy(&conn, policy).unwrap();

    let holder = open_db(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let started = Instant::now();
    let err = engine
        .allocate(Uuid::new_v4(), pool_id, PoolCategory::Dormitory)
        .unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, AllocationError::Contention), "got {err}");
    assert!(err.kind().is_transient());
    assert!(waited < Duration::from_secs(5), "waited {waited:?}");

    holder.execute_batch("ROLLBACK;").unwrap();
    assert_eq!(engine.store().get(pool_id).unwrap().occupied, 0);
    assert!(engine.list_active_allocations(pool_id).unwrap().is_empty());

    // Once the lock is gone the same engine succeeds.
    engine
        .allocate(Uuid::new_v4(), pool_id, PoolCategory::Dormitory)
        .unwrap();
    assert_eq!(engine.verify_pool(pool_id).unwrap().occupied, 1);
}
