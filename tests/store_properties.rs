//! Concurrent add / pop / collect on disjoint keys never loses or duplicates an entry

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use proptest::prelude::*;

use stun_trace::stun::{Attribute, AttributeType};
use stun_trace::{CorrelationKey, CorrelationStore, Message};

const TTL: Duration = Duration::from_secs(50);
const MAX_KEYS: usize = 40;

fn tagged(worker: usize, n: usize) -> Message {
    let mut msg = Message::binding_request();
    msg.add_attribute(Attribute::new(
        AttributeType::Username,
        format!("{}:{}", worker, n).into_bytes(),
    ))
    .unwrap();
    msg
}

fn key(worker: usize, n: usize) -> CorrelationKey {
    CorrelationKey::new(IpAddr::V4(Ipv4Addr::new(10, worker as u8, 0, 1)), 1024 + n as u16)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[derive(Default)]
struct WorkerLog {
    popped: HashSet<usize>,
    missed: HashSet<usize>,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Entry n is created at t0 + created[n]; a sweep at t0 + TTL + c evicts
    // every entry with created[n] <= c. Workers pop at t0, where every entry
    // still present is fresh.
    #[test]
    fn concurrent_sweeps_never_lose_or_duplicate(
        workers in 2usize..6,
        per_worker in 1usize..MAX_KEYS,
        pop_mask in prop::collection::vec(any::<bool>(), MAX_KEYS),
        created in prop::collection::vec(0u64..100, MAX_KEYS),
        sweeps in prop::collection::vec(0u64..100, 0..20),
    ) {
        let store = CorrelationStore::new(TTL);
        let t0 = Instant::now();

        let (logs, collected): (Vec<WorkerLog>, usize) = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let store = &store;
                    let pop_mask = &pop_mask;
                    let created = &created;
                    scope.spawn(move || {
                        let mut log = WorkerLog::default();
                        for n in 0..per_worker {
                            let msg = tagged(worker, n);
                            store.add_at(key(worker, n), &msg, t0 + secs(created[n]));
                            if pop_mask[n] {
                                match store.pop_at(&key(worker, n), t0) {
                                    Some(got) => {
                                        assert_eq!(got, msg);
                                        log.popped.insert(n);
                                    }
                                    None => {
                                        log.missed.insert(n);
                                    }
                                }
                                assert!(store.pop_at(&key(worker, n), t0).is_none());
                            }
                        }
                        log
                    })
                })
                .collect();

            let sweeper = scope.spawn(|| {
                let mut collected = 0;
                for &cutoff in &sweeps {
                    collected += store.collect_at(t0 + TTL + secs(cutoff));
                    std::thread::yield_now();
                }
                collected
            });

            let logs = handles.into_iter().map(|h| h.join().unwrap()).collect();
            (logs, sweeper.join().unwrap())
        });

        let added = workers * per_worker;
        let worker_popped: usize = logs.iter().map(|l| l.popped.len()).sum();
        let remaining = store.len();
        prop_assert_eq!(worker_popped + collected + remaining, added);

        // only entries some sweep could see as expired may vanish
        let latest_sweep = sweeps.iter().copied().max();
        let mut drained = 0;
        for (worker, log) in logs.iter().enumerate() {
            for n in 0..per_worker {
                let evictable = latest_sweep.map_or(false, |c| created[n] <= c);
                if log.missed.contains(&n) {
                    prop_assert!(evictable);
                }

                match store.pop_at(&key(worker, n), t0) {
                    Some(left) => {
                        prop_assert!(!log.popped.contains(&n));
                        prop_assert!(!log.missed.contains(&n));
                        let username = left
                            .get_attribute(AttributeType::Username)
                            .map(|a| a.value.clone());
                        prop_assert_eq!(username, Some(format!("{}:{}", worker, n).into_bytes()));
                        drained += 1;
                    }
                    None => {
                        if !log.popped.contains(&n) {
                            // collected by a sweep
                            prop_assert!(evictable);
                        }
                    }
                }
            }
        }

        prop_assert_eq!(drained, remaining);
        prop_assert!(store.is_empty());

        let stats = store.stats().snapshot();
        prop_assert_eq!(stats.added as usize, added);
        prop_assert_eq!(stats.popped as usize, worker_popped + remaining);
        prop_assert_eq!(stats.collected as usize, collected);
    }
}
