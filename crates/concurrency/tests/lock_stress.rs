//! Lock manager stress: random interleavings must drain without deadlock

use rand::Rng;
use std::sync::Arc;
use tessera_concurrency::LockManager;
use tessera_core::{Key, NodeId, TxId};

fn tx(ticks: u64, node: u8) -> TxId {
    TxId::new(ticks, NodeId::from_bytes([node; 16]))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_workload_always_drains() {
    let locks = Arc::new(LockManager::new());
    let keys: Vec<Key> = (0..5u64).map(Key::from).collect();

    let mut tasks = Vec::new();
    for worker in 0..8u8 {
        let locks = Arc::clone(&locks);
        let keys = keys.clone();
        tasks.push(tokio::spawn(async move {
            let mut rng_state = rand::thread_rng().gen::<u64>() | 1;
            for round in 0..200u64 {
                rng_state ^= rng_state << 13;
                rng_state ^= rng_state >> 7;
                rng_state ^= rng_state << 17;

                // Timestamps must be globally unique and roughly
                // interleaved across workers.
                let id = tx(round * 8 + worker as u64, worker);
                let key = &keys[(rng_state % keys.len() as u64) as usize];
                let want_write = rng_state & 1 == 0;

                let acquired = if want_write {
                    locks.acquire_exclusive(key, id).await
                } else {
                    locks.acquire_shared(key, id).await
                };
                match acquired {
                    Ok(()) => {
                        // Occasionally take a second key before releasing,
                        // exercising multi-key hold patterns.
                        if rng_state & 4 == 0 {
                            let other = &keys[((rng_state >> 8) % keys.len() as u64) as usize];
                            let _ = locks.acquire_shared(other, id).await;
                        }
                        tokio::task::yield_now().await;
                        locks.release_all(id);
                    }
                    Err(e) => {
                        assert!(e.is_conflict(), "unexpected error: {e}");
                        locks.release_all(id);
                    }
                }
            }
        }));
    }

    for task in tasks {
        tokio::time::timeout(std::time::Duration::from_secs(30), task)
            .await
            .expect("lock workload wedged")
            .unwrap();
    }
    assert!(locks.is_quiescent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_single_key_serialises_writers() {
    let locks = Arc::new(LockManager::new());
    let key = Key::from("hot");

    let mut tasks = Vec::new();
    for worker in 0..6u8 {
        let locks = Arc::clone(&locks);
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            let mut granted = 0u32;
            for round in 0..100u64 {
                let id = tx(round * 6 + worker as u64, worker);
                match locks.acquire_exclusive(&key, id).await {
                    Ok(()) => {
                        granted += 1;
                        tokio::task::yield_now().await;
                        locks.release_exclusive(&key, id).unwrap();
                    }
                    Err(e) => assert!(e.is_conflict()),
                }
            }
            granted
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += tokio::time::timeout(std::time::Duration::from_secs(30), task)
            .await
            .expect("writer workload wedged")
            .unwrap();
    }
    assert!(total > 0);
    assert!(locks.is_quiescent());
}
