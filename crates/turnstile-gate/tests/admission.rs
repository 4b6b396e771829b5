use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use test_case::test_case;
use turnstile_common_metrics::MetricsRegistry;
use turnstile_gate::{AdmissionGate, GateError, PortMetric, SlotState};

#[test]
fn ceiling_of_one_rejects_second_connection() {
    let gate = AdmissionGate::new(1).unwrap();

    let first = gate.admit("first");
    assert_eq!(first.state(), SlotState::Admitted);
    assert_eq!(gate.num_connections(), 1);

    let second = gate.admit("second");
    assert_eq!(second.state(), SlotState::Rejected);
    assert_eq!(gate.num_connections(), 1);

    drop(first);
    assert_eq!(gate.num_connections(), 0);

    let third = gate.admit("third");
    assert!(third.is_admitted());
}

#[test_case(0 ; "zero")]
#[test_case(-1 ; "negative")]
#[test_case(i64::MIN ; "min")]
fn invalid_ceilings_fail_construction(value: i64) {
    assert!(matches!(
        AdmissionGate::from_signed(value),
        Err(GateError::InvalidConfiguration { .. })
    ));
}

#[test_case(i64::from(i32::MAX) ; "int max")]
#[test_case(i64::MAX ; "long max")]
fn large_ceilings_are_accepted(value: i64) {
    let gate = AdmissionGate::from_signed(value).unwrap();
    assert_eq!(gate.max_connections() as u128, value as u128);
}

#[test]
fn usize_max_is_accepted() {
    let gate = AdmissionGate::new(usize::MAX).unwrap();
    assert_eq!(gate.max_connections(), usize::MAX);
    let _permit = gate.try_admit().unwrap();
    assert_eq!(gate.num_connections(), 1);
}

#[test]
fn double_release_frees_one_slot() {
    let gate = AdmissionGate::new(2).unwrap();
    let a = gate.try_admit().unwrap();
    let _b = gate.try_admit().unwrap();

    assert!(a.release());
    assert!(!a.release());
    drop(a);

    assert_eq!(gate.num_connections(), 1);
}

#[test]
fn concurrent_attempts_never_exceed_ceiling() {
    const MAX: usize = 8;
    const THREADS: usize = 64;

    let gate = AdmissionGate::new(MAX).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let gate = gate.clone();
            let barrier = barrier.clone();
            let admitted = admitted.clone();
            thread::spawn(move || {
                barrier.wait();
                let permit = gate.try_admit();
                if permit.is_some() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
                assert!(gate.num_connections() <= MAX + THREADS);
                permit
            })
        })
        .collect();

    let permits: Vec<_> = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(admitted.load(Ordering::SeqCst), MAX);
    assert_eq!(permits.len(), MAX);
    assert_eq!(gate.num_connections(), MAX);
    assert_eq!(gate.num_rejected(), (THREADS - MAX) as u64);

    drop(permits);
    assert_eq!(gate.num_connections(), 0);
}

#[test]
fn concurrent_churn_returns_to_zero() {
    const MAX: usize = 4;

    let gate = AdmissionGate::new(MAX).unwrap();
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let gate = gate.clone();
            thread::spawn(move || {
                for _ in 0..1_000 {
                    if let Some(permit) = gate.try_admit() {
                        assert!(gate.num_connections() >= 1);
                        drop(permit);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(gate.num_connections(), 0);
}

#[test]
fn port_metric_mirrors_gate() {
    let registry = MetricsRegistry::new();
    let metric = Arc::new(PortMetric::new("public", 8080, &registry));
    let gate = AdmissionGate::builder(2)
        .label("public")
        .metric_sink(metric.clone())
        .build()
        .unwrap();

    let a = gate.try_admit().unwrap();
    let b = gate.try_admit().unwrap();
    assert!(gate.try_admit().is_none());
    drop(a);

    let stats = metric.stats();
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.max_connections, 2);
    assert_eq!(stats.peak_connections, 2);
    assert_eq!(stats.rejected_total, 1);

    drop(b);
    assert_eq!(metric.stats().active_connections, 0);
    assert_eq!(metric.stats().closed_total, 2);
}

proptest! {
    #[test]
    fn sequential_admits_stop_at_ceiling(max in 1usize..64, attempts in 0usize..128) {
        let gate = AdmissionGate::new(max).unwrap();
        let permits: Vec<_> = (0..attempts).filter_map(|_| gate.try_admit()).collect();

        prop_assert_eq!(permits.len(), attempts.min(max));
        prop_assert_eq!(gate.num_connections(), attempts.min(max));
        prop_assert_eq!(gate.num_rejected() as usize, attempts.saturating_sub(max));

        drop(permits);
        prop_assert_eq!(gate.num_connections(), 0);
    }

    #[test]
    fn releasing_any_subset_restores_count(max in 1usize..32, keep in proptest::collection::vec(any::<bool>(), 0..32)) {
        let gate = AdmissionGate::new(max).unwrap();
        let permits: Vec<_> = keep.iter().filter_map(|_| gate.try_admit()).collect();
        let admitted = permits.len();

        let kept: Vec<_> = permits
            .into_iter()
            .zip(keep.iter())
            .filter_map(|(permit, keep)| keep.then_some(permit))
            .collect();

        prop_assert!(admitted <= max);
        prop_assert_eq!(gate.num_connections(), kept.len());
    }
}
