use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use txlock::error::TxLockError;
use txlock::options::TransactionOptions;
use txlock::{
    LockHolder, LockManager, LockMode, PointLockManager, TransactionID, TransactionManager,
    TransactionStatus,
};

type Manager = TransactionManager<&'static str, PointLockManager<&'static str>>;

fn new_manager() -> Arc<Manager> {
    let _ = env_logger::try_init();
    Arc::new(Manager::new(TransactionOptions::default()))
}

#[derive(Debug)]
enum Event {
    Acquired(TransactionID, &'static str, LockMode),
    Released(TransactionID, &'static str),
}

/// Replays an event log and checks that no two holders ever overlap
/// incompatibly. Returns, per resource, the transactions in access order.
fn replay(events: &[Event]) -> HashMap<&'static str, Vec<TransactionID>> {
    let mut holders: HashMap<&'static str, Vec<(TransactionID, LockMode)>> = HashMap::new();
    let mut order: HashMap<&'static str, Vec<TransactionID>> = HashMap::new();
    for event in events {
        match *event {
            Event::Acquired(txn, resource, mode) => {
                let current = holders.entry(resource).or_default();
                match mode {
                    LockMode::Exclusive => assert!(
                        current.is_empty(),
                        "{} locked {} exclusively while held by {:?}",
                        txn,
                        resource,
                        current
                    ),
                    _ => assert!(
                        current.iter().all(|(_, m)| *m == LockMode::Shared),
                        "{} locked {} shared while held by {:?}",
                        txn,
                        resource,
                        current
                    ),
                }
                current.push((txn, mode));
                order.entry(resource).or_default().push(txn);
            }
            Event::Released(txn, resource) => {
                let current = holders.entry(resource).or_default();
                current.retain(|(t, _)| *t != txn);
            }
        }
    }
    order
}

#[test]
fn test_two_transaction_schedule() {
    for _ in 0..50 {
        let manager = new_manager();
        let (sender, receiver) = crossbeam_channel::unbounded();

        let writer = {
            let manager = manager.clone();
            let sender = sender.clone();
            thread::spawn(move || {
                let mut txn = Manager::begin(&manager);
                for resource in ["o1", "o2", "o3"].iter() {
                    txn.request_lock(resource, LockMode::Exclusive).unwrap();
                    sender
                        .send(Event::Acquired(txn.id(), *resource, LockMode::Exclusive))
                        .unwrap();
                }
                for resource in ["o1", "o2", "o3"].iter() {
                    sender.send(Event::Released(txn.id(), *resource)).unwrap();
                }
                txn.commit().unwrap();
                txn.id()
            })
        };
        let reader = {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut txn = Manager::begin(&manager);
                for resource in ["o1", "o3"].iter() {
                    txn.request_lock(resource, LockMode::Shared).unwrap();
                    sender
                        .send(Event::Acquired(txn.id(), *resource, LockMode::Shared))
                        .unwrap();
                }
                for resource in ["o1", "o3"].iter() {
                    sender.send(Event::Released(txn.id(), *resource)).unwrap();
                }
                txn.commit().unwrap();
                txn.id()
            })
        };
        let writer_id = writer.join().unwrap();
        let reader_id = reader.join().unwrap();

        let events: Vec<Event> = receiver.try_iter().collect();
        assert_eq!(events.len(), 10);
        let order = replay(&events);

        // Either the writer or the reader went first on both shared objects.
        let first = order["o1"][0];
        assert!(first == writer_id || first == reader_id);
        assert_eq!(order["o3"][0], first);

        for resource in ["o1", "o2", "o3"].iter() {
            assert_eq!(manager.lock_manager().mode_of(resource), LockMode::NoLock);
        }
    }
}

fn lock_in_order(
    manager: Arc<Manager>,
    order: [&'static str; 3],
    barrier: Arc<Barrier>,
) -> Option<TxLockError> {
    let mut txn = Manager::begin(&manager);
    txn.request_lock(&order[0], LockMode::Exclusive).unwrap();
    barrier.wait();
    for resource in order[1..].iter() {
        if let Err(e) = txn.request_lock(resource, LockMode::Exclusive) {
            assert_eq!(txn.status(), TransactionStatus::Error);
            txn.rollback().unwrap();
            return Some(e);
        }
    }
    txn.commit().unwrap();
    None
}

#[test]
fn test_deadlock_has_exactly_one_victim() {
    for _ in 0..20 {
        let manager = new_manager();
        let barrier = Arc::new(Barrier::new(2));

        let t1 = {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || lock_in_order(manager, ["o1", "o2", "o3"], barrier))
        };
        let t2 = {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || lock_in_order(manager, ["o3", "o2", "o1"], barrier))
        };
        let results = vec![t1.join().unwrap(), t2.join().unwrap()];

        let errors: Vec<&TxLockError> = results.iter().flatten().collect();
        assert_eq!(errors.len(), 1, "{:?}", results);
        match errors[0] {
            TxLockError::Deadlock { requester, cycle } => {
                assert_eq!(cycle.len(), 2);
                assert_eq!(cycle[0], *requester);
            }
            e => panic!("unexpected error {:?}", e),
        }

        let history = manager.history();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history
                .iter()
                .filter(|m| m.status == TransactionStatus::Committed)
                .count(),
            1
        );
        assert!(manager.lock_manager().wait_for_graph().is_empty());
        for resource in ["o1", "o2", "o3"].iter() {
            assert_eq!(manager.lock_manager().mode_of(resource), LockMode::NoLock);
        }
    }
}

#[test]
fn test_mutual_exclusion_under_contention() {
    const RESOURCES: [&str; 3] = ["schema", "schema.entity", "schema.entity.index"];
    let manager = new_manager();
    let readers: Arc<Vec<AtomicI64>> = Arc::new((0..3).map(|_| AtomicI64::new(0)).collect());
    let writers: Arc<Vec<AtomicI64>> = Arc::new((0..3).map(|_| AtomicI64::new(0)).collect());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let readers = readers.clone();
            let writers = writers.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut deadlocks = 0;
                for _ in 0..200 {
                    let mut txn = Manager::begin(&manager);
                    let mut held = vec![];
                    let mut failed = false;
                    for _ in 0..2 {
                        let idx = rng.gen_range(0..RESOURCES.len());
                        let mode = if rng.gen_bool(0.5) {
                            LockMode::Shared
                        } else {
                            LockMode::Exclusive
                        };
                        let before = txn.lock_on(&RESOURCES[idx]);
                        if let Err(e) = txn.request_lock(&RESOURCES[idx], mode) {
                            assert!(e.is_deadlock());
                            failed = true;
                            break;
                        }
                        let after = txn.lock_on(&RESOURCES[idx]);
                        assert!(after >= before && after >= mode);
                        if after != before {
                            if before == LockMode::Shared {
                                readers[idx].fetch_sub(1, Ordering::SeqCst);
                                held.retain(|(i, _)| *i != idx);
                            }
                            match after {
                                LockMode::Exclusive => {
                                    assert_eq!(readers[idx].load(Ordering::SeqCst), 0);
                                    assert_eq!(writers[idx].fetch_add(1, Ordering::SeqCst), 0);
                                }
                                _ => {
                                    assert_eq!(writers[idx].load(Ordering::SeqCst), 0);
                                    readers[idx].fetch_add(1, Ordering::SeqCst);
                                }
                            }
                            held.push((idx, after));
                        }
                    }
                    for (idx, mode) in held {
                        match mode {
                            LockMode::Exclusive => writers[idx].fetch_sub(1, Ordering::SeqCst),
                            _ => readers[idx].fetch_sub(1, Ordering::SeqCst),
                        };
                    }
                    if failed {
                        deadlocks += 1;
                        txn.rollback().unwrap();
                    } else {
                        txn.commit().unwrap();
                    }
                }
                deadlocks
            })
        })
        .collect();
    let deadlocks: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    log::info!("{} deadlocks resolved", deadlocks);

    assert!(manager.active().is_empty());
    assert!(manager.lock_manager().wait_for_graph().is_empty());
    for resource in RESOURCES.iter() {
        assert_eq!(manager.lock_manager().mode_of(resource), LockMode::NoLock);
        assert!(manager.lock_manager().owners_of(resource).is_empty());
    }
}

#[test]
fn test_independent_resources_do_not_block() {
    let manager = Arc::new(PointLockManager::<&'static str>::new());
    let t1 = Arc::new(LockHolder::new(1));
    let t2 = Arc::new(LockHolder::new(2));
    let t3 = Arc::new(LockHolder::new(3));

    manager.acquire(&t1, &"a", LockMode::Exclusive).unwrap();

    let (blocked_sender, blocked_receiver) = crossbeam_channel::unbounded();
    let blocked = {
        let manager = manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || {
            manager.acquire(&t2, &"a", LockMode::Exclusive).unwrap();
            blocked_sender.send(()).unwrap();
        })
    };
    while manager.wait_for_graph().waiting_for(2).is_empty() {
        thread::sleep(Duration::from_millis(5));
    }

    let (free_sender, free_receiver) = crossbeam_channel::unbounded();
    let free = {
        let manager = manager.clone();
        let t3 = t3.clone();
        thread::spawn(move || {
            manager.acquire(&t3, &"b", LockMode::Exclusive).unwrap();
            manager.release(&t3, &"b").unwrap();
            free_sender.send(()).unwrap();
        })
    };
    free_receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    free.join().unwrap();
    assert!(blocked_receiver.try_recv().is_err());

    manager.release_all(&t1).unwrap();
    blocked_receiver
        .recv_timeout(Duration::from_secs(5))
        .unwrap();
    blocked.join().unwrap();
    assert_eq!(manager.lock_on(&t2, &"a"), LockMode::Exclusive);
}

#[test]
fn test_upgrade_never_exposes_no_lock() {
    let manager = Arc::new(PointLockManager::<&'static str>::new());
    let t1 = Arc::new(LockHolder::new(1));
    let t2 = Arc::new(LockHolder::new(2));
    manager.acquire(&t1, &"entity", LockMode::Shared).unwrap();
    manager.acquire(&t2, &"entity", LockMode::Shared).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let observer = {
        let manager = manager.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                assert_ne!(manager.mode_of(&"entity"), LockMode::NoLock);
                let owners = manager.owners_of(&"entity");
                assert!(!owners.is_empty() && owners[0].id() == 1);
            }
        })
    };

    let upgrader = {
        let manager = manager.clone();
        let t1 = t1.clone();
        thread::spawn(move || manager.acquire(&t1, &"entity", LockMode::Exclusive))
    };
    while manager.wait_for_graph().waiting_for(1).is_empty() {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(manager.mode_of(&"entity"), LockMode::Shared);

    manager.release(&t2, &"entity").unwrap();
    upgrader.join().unwrap().unwrap();
    done.store(true, Ordering::Release);
    observer.join().unwrap();

    assert_eq!(manager.mode_of(&"entity"), LockMode::Exclusive);
    assert_eq!(manager.owners_of(&"entity"), vec![t1.clone()]);
    assert_eq!(t1.number_of_locks(), 1);
    assert_eq!(t2.number_of_locks(), 0);
}
