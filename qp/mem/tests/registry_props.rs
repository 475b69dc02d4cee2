//! Property tests for the pool registry.
//!
//! Best fit is checked against a brute-force model; the concurrency property
//! runs ISR-style create/release (inside a caller-held critical section)
//! on one thread while another registers and unregisters pools.

use std::thread;

use proptest::prelude::*;
use qp_core::{EventOrigin, QError, QEvt, QSignal};
use qp_mem::{EventPools, QMPool, MAX_EVENT_POOLS};

const SIG: QSignal = QSignal::new(100);

fn assert_sorted(pools: &EventPools) {
    let layout = pools.layout();
    assert!(
        layout.windows(2).all(|w| w[0].1 <= w[1].1),
        "registry out of order: {layout:?}"
    );
}

fn block_size_of(pools: &EventPools, e: &QEvt) -> usize {
    let EventOrigin::Pool { pool, .. } = e.origin() else {
        panic!("expected a pooled event");
    };
    pools.layout().iter().find(|(id, _)| *id == pool).unwrap().1
}

#[derive(Debug, Clone)]
enum IsrOp {
    Create(usize),
    Release(usize),
}

#[derive(Debug, Clone)]
enum TaskOp {
    Register(usize),
    Unregister(usize),
}

fn isr_op() -> impl Strategy<Value = IsrOp> {
    prop_oneof![
        (1usize..80).prop_map(IsrOp::Create),
        (0usize..16).prop_map(IsrOp::Release),
    ]
}

fn task_op() -> impl Strategy<Value = TaskOp> {
    prop_oneof![
        (1usize..80).prop_map(TaskOp::Register),
        (0usize..16).prop_map(TaskOp::Unregister),
    ]
}

proptest! {
    #[test]
    fn best_fit_matches_model(
        sizes in prop::collection::vec(1usize..256, 1..MAX_EVENT_POOLS),
        request in 1usize..300,
    ) {
        let pools = EventPools::new();
        for &size in &sizes {
            pools.register(QMPool::new(size, 1).unwrap()).unwrap();
        }
        let expected = sizes.iter().copied().filter(|&s| s >= request).min();

        match (pools.create(request, SIG), expected) {
            (Ok(e), Some(best)) => prop_assert_eq!(block_size_of(&pools, &e), best),
            (Err(err), None) => prop_assert_eq!(err, QError::OutOfMemory),
            (res, exp) => prop_assert!(false, "got {:?}, expected block size {:?}", res, exp),
        }
    }

    #[test]
    fn interleaved_isr_and_task_access_keeps_registry_sound(
        isr_ops in prop::collection::vec(isr_op(), 1..64),
        task_ops in prop::collection::vec(task_op(), 1..32),
    ) {
        let pools = EventPools::new();
        pools.register(QMPool::new(16, 4).unwrap()).unwrap();

        let (created, freed) = thread::scope(|s| {
            let isr = s.spawn(|| {
                let mut held: Vec<QEvt> = Vec::new();
                let (mut created, mut freed) = (0usize, 0usize);
                for op in &isr_ops {
                    critical_section::with(|cs| match *op {
                        IsrOp::Create(size) => {
                            if let Ok(e) = pools.create_from_isr(cs, size, SIG) {
                                held.push(e);
                                created += 1;
                            }
                        }
                        IsrOp::Release(i) if !held.is_empty() => {
                            let e = held.swap_remove(i % held.len());
                            if pools.release_from_isr(cs, &e).unwrap() {
                                freed += 1;
                            }
                        }
                        IsrOp::Release(_) => {}
                    });
                    assert_sorted(&pools);
                }
                for e in held.drain(..) {
                    if pools.release(&e).unwrap() {
                        freed += 1;
                    }
                }
                (created, freed)
            });

            s.spawn(|| {
                let mut mine = Vec::new();
                for op in &task_ops {
                    match *op {
                        TaskOp::Register(size) => {
                            if let Ok(id) = pools.register(QMPool::new(size, 2).unwrap()) {
                                mine.push(id);
                            }
                        }
                        TaskOp::Unregister(i) if !mine.is_empty() => {
                            let id = mine[i % mine.len()];
                            match pools.unregister(id) {
                                Ok(_) => {
                                    mine.retain(|&m| m != id);
                                }
                                Err(err) => assert_eq!(err, QError::NotPermitted),
                            }
                        }
                        TaskOp::Unregister(_) => {}
                    }
                    assert_sorted(&pools);
                }
            });

            isr.join().unwrap()
        });

        // every event freed exactly once, every pool back to full
        prop_assert_eq!(created, freed);
        assert_sorted(&pools);
        for (id, _) in pools.layout() {
            let stats = pools.stats(id).unwrap();
            prop_assert_eq!(stats.used_blocks, 0);
            prop_assert_eq!(stats.free_blocks, stats.total_blocks);
        }
    }
}
