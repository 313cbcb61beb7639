// Counter reconciler: reset accounting, restart seeding, direction and scope independence

use relaymon::models::{CounterPair, CounterReading, Scope};
use relaymon::reconciler::CounterReconciler;

fn tx(v: u64) -> CounterPair {
    CounterPair::new(v, 0)
}

#[test]
fn reset_folds_last_raw_into_offset() {
    let mut r = CounterReconciler::new();
    let out: Vec<u64> = [100, 200, 50, 150]
        .into_iter()
        .map(|raw| r.reconcile(&Scope::Total, tx(raw)).tx)
        .collect();
    assert_eq!(out, vec![100, 200, 250, 350]);
}

#[test]
fn output_never_decreases_across_repeated_resets() {
    let mut r = CounterReconciler::new();
    let mut last = 0;
    for raw in [10, 500, 0, 30, 5, 1000, 1000, 2] {
        let v = r.reconcile(&Scope::Total, tx(raw)).tx;
        assert!(v >= last, "{} < {}", v, last);
        last = v;
    }
}

#[test]
fn seed_restores_stored_value_after_restart() {
    let mut r = CounterReconciler::new();
    // Host rebooted while we were down: raw restarted from 10, last stored was 1000.
    r.seed(&Scope::Total, tx(10), Some(tx(1000)));
    assert!(r.is_tracking(&Scope::Total));
    assert_eq!(r.reconcile(&Scope::Total, tx(10)).tx, 1000);
    assert_eq!(r.reconcile(&Scope::Total, tx(25)).tx, 1015);
}

#[test]
fn seed_without_gap_keeps_zero_offset() {
    let mut r = CounterReconciler::new();
    r.seed(&Scope::Total, tx(5000), Some(tx(4000)));
    assert_eq!(r.reconcile(&Scope::Total, tx(5100)).tx, 5100);
}

#[test]
fn tx_and_rx_reset_independently() {
    let mut r = CounterReconciler::new();
    r.reconcile(&Scope::Total, CounterPair::new(100, 1000));
    let out = r.reconcile(&Scope::Total, CounterPair::new(10, 1100));
    assert_eq!(out, CounterPair::new(110, 1100));
}

#[test]
fn scopes_do_not_share_offsets() {
    let mut r = CounterReconciler::new();
    r.reconcile(&Scope::Port(443), tx(900));
    r.reconcile(&Scope::Port(443), tx(100));
    r.reconcile(&Scope::Total, tx(5000));
    assert_eq!(r.reconcile(&Scope::Total, tx(5001)).tx, 5001);
    assert_eq!(r.reconcile(&Scope::Port(443), tx(150)).tx, 1050);
}

#[test]
fn forget_drops_scope_state() {
    let mut r = CounterReconciler::new();
    r.reconcile(&Scope::Port(8443), tx(10));
    r.forget(&Scope::Port(8443));
    assert!(!r.is_tracking(&Scope::Port(8443)));
}

fn interfaces(eth0: u64, wg0: Option<u64>) -> CounterReading {
    let reading = CounterReading::new().with("eth0", tx(eth0));
    match wg0 {
        Some(v) => reading.with("wg0", tx(v)),
        None => reading,
    }
}

#[test]
fn flapping_interface_only_loses_its_own_bytes() {
    let mut r = CounterReconciler::new();
    assert_eq!(r.reconcile(&Scope::Total, interfaces(50_000, Some(8_000))).tx, 58_000);
    // wg0 goes away for a tick, then comes back with a fresh counter.
    assert_eq!(r.reconcile(&Scope::Total, interfaces(50_100, None)).tx, 58_100);
    assert_eq!(r.reconcile(&Scope::Total, interfaces(50_200, Some(300))).tx, 58_500);
    assert_eq!(r.reconcile(&Scope::Total, interfaces(50_200, Some(400))).tx, 58_600);
}

#[test]
fn new_interface_counts_from_first_sighting() {
    let mut r = CounterReconciler::new();
    r.seed(&Scope::Total, interfaces(1_000, None), Some(tx(5_000)));
    assert_eq!(r.reconcile(&Scope::Total, interfaces(1_000, Some(700))).tx, 5_000);
    assert_eq!(r.reconcile(&Scope::Total, interfaces(1_100, Some(750))).tx, 5_150);
}
