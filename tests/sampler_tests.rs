// Samplers against scripted sources and fake probes

mod common;

use std::sync::Arc;

use common::{
    FixedProbe, ScriptedSource, allow_inserts, insert_snapshot, reject_inserts, side_pool,
    temp_store,
};
use relaymon::config::AppConfig;
use relaymon::host_repo::HostRepo;
use relaymon::models::{CounterPair, ProbeResult, Scope};
use relaymon::samplers::{LatencySampler, SystemSampler, TrafficSampler};

fn tx(v: u64) -> Option<CounterPair> {
    Some(CounterPair::new(v, 0))
}

#[tokio::test]
async fn counter_reset_is_accounted_in_stored_series() {
    let (_dir, store) = temp_store().await;
    let source = ScriptedSource::new().with_host(vec![tx(100), tx(200), tx(50), tx(150)]);
    let mut sampler = TrafficSampler::new(Arc::new(source), store.clone(), vec![]);

    for now in 1..=4 {
        sampler.tick(now).await;
    }
    let stored: Vec<u64> = store
        .traffic_snapshots(&Scope::Total, 0, 10)
        .await
        .unwrap()
        .iter()
        .map(|s| s.tx_bytes)
        .collect();
    assert_eq!(stored, vec![100, 200, 250, 350]);
}

#[tokio::test]
async fn restart_continues_from_stored_value() {
    let (_dir, store) = temp_store().await;
    insert_snapshot(&store, Scope::Total, 500, 1000, 0).await;
    let source = ScriptedSource::new().with_host(vec![tx(10), tx(10), tx(25)]);
    let mut sampler = TrafficSampler::new(Arc::new(source), store.clone(), vec![]);

    sampler.init_offsets().await;
    assert!(sampler.reconciler().is_tracking(&Scope::Total));
    sampler.tick(600).await;
    sampler.tick(601).await;

    let latest = store.latest_traffic_snapshot(&Scope::Total).await.unwrap().unwrap();
    assert_eq!(latest.tx_bytes, 1015);
    let series = store.traffic_snapshots(&Scope::Total, 0, 1000).await.unwrap();
    assert!(series.windows(2).all(|w| w[1].tx_bytes >= w[0].tx_bytes));
}

#[tokio::test]
async fn absent_port_rule_is_skipped_not_zeroed() {
    let (_dir, store) = temp_store().await;
    let source = ScriptedSource::new()
        .with_host(vec![tx(1), tx(2)])
        .with_port(443, vec![tx(10), None])
        .with_port(8443, vec![None, None]);
    let mut sampler = TrafficSampler::new(Arc::new(source), store.clone(), vec![443, 8443]);

    let first = sampler.tick(1).await;
    assert_eq!((first.written, first.skipped), (2, 1));
    let second = sampler.tick(2).await;
    assert_eq!((second.written, second.skipped), (1, 2));

    assert_eq!(store.traffic_snapshots(&Scope::Port(443), 0, 10).await.unwrap().len(), 1);
    assert!(store.traffic_snapshots(&Scope::Port(8443), 0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn host_failure_does_not_block_ports() {
    let (_dir, store) = temp_store().await;
    let source = ScriptedSource::new()
        .with_host(vec![None])
        .with_port(443, vec![tx(10)]);
    let mut sampler = TrafficSampler::new(Arc::new(source), store.clone(), vec![443]);

    let report = sampler.tick(1).await;
    assert_eq!((report.written, report.skipped), (1, 1));
    assert!(store.latest_traffic_snapshot(&Scope::Total).await.unwrap().is_none());
}

#[tokio::test]
async fn snapshot_timestamps_never_go_backwards() {
    let (_dir, store) = temp_store().await;
    let source = ScriptedSource::new().with_host(vec![tx(1), tx(2)]);
    let mut sampler = TrafficSampler::new(Arc::new(source), store.clone(), vec![]);

    sampler.tick(100).await;
    sampler.tick(90).await;
    let ts: Vec<i64> = store
        .traffic_snapshots(&Scope::Total, 0, 1000)
        .await
        .unwrap()
        .iter()
        .map(|s| s.ts)
        .collect();
    assert_eq!(ts, vec![100, 100]);
}

#[tokio::test]
async fn failed_write_still_advances_the_reconciler() {
    let (dir, store) = temp_store().await;
    let source = ScriptedSource::new().with_host(vec![tx(100), tx(200), tx(50), tx(150)]);
    let mut sampler = TrafficSampler::new(Arc::new(source), store.clone(), vec![]);
    let side = side_pool(&dir).await;

    assert_eq!(sampler.tick(1).await.written, 1);
    reject_inserts(&side, "traffic_snapshots").await;
    let report = sampler.tick(2).await;
    assert_eq!((report.written, report.skipped), (0, 1));
    allow_inserts(&side, "traffic_snapshots").await;
    sampler.tick(3).await;
    sampler.tick(4).await;

    // The dropped reading (200) still moved the baseline, so the reset to 50 adds 50 on top of 200.
    let stored: Vec<(i64, u64)> = store
        .traffic_snapshots(&Scope::Total, 0, 10)
        .await
        .unwrap()
        .iter()
        .map(|s| (s.ts, s.tx_bytes))
        .collect();
    assert_eq!(stored, vec![(1, 100), (3, 250), (4, 350)]);
}

#[tokio::test]
async fn late_seeded_scope_keeps_timestamps_ordered() {
    let (_dir, store) = temp_store().await;
    insert_snapshot(&store, Scope::Port(443), 1000, 5000, 5000).await;
    // The port rule is missing at startup, so the port is only seeded on the first tick.
    let source = ScriptedSource::new()
        .with_host(vec![tx(1), tx(2)])
        .with_port(443, vec![None, tx(10)]);
    let mut sampler = TrafficSampler::new(Arc::new(source), store.clone(), vec![443]);
    sampler.init_offsets().await;

    sampler.tick(500).await;
    let port = store
        .latest_traffic_snapshot(&Scope::Port(443))
        .await
        .unwrap()
        .unwrap();
    assert!(port.ts >= 1000, "port row written at {}", port.ts);
    assert_eq!(port.tx_bytes, 5000);
}

#[tokio::test]
async fn latency_round_writes_one_raw_record_per_target() {
    let (_dir, store) = temp_store().await;
    let config = AppConfig::load_from_str(
        r#"
[database]
path = "unused.db"
[traffic]
[latency]
targets = ["HK:127.0.0.1", "::1"]
count = 4
[billing]
monthly_limit_gb = 0
"#,
    )
    .unwrap();
    let probe = Arc::new(FixedProbe(ProbeResult {
        avg_rtt_ms: Some(12.5),
        sent: 4,
        lost: 1,
    }));
    let sampler = LatencySampler::new(probe, store.clone(), &config.latency);

    let records = sampler.run_round(1000).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].target, "HK");
    assert_eq!(records[1].target, "::1");

    let hk = store.latency_records("HK", 0, 2000).await.unwrap();
    assert_eq!(hk.len(), 1);
    assert_eq!(hk[0].rtt_ms, Some(12.5));
    assert_eq!((hk[0].sent, hk[0].lost), (4, 1));
    assert!(!hk[0].is_aggregated);
}

#[tokio::test]
async fn system_tick_writes_sample_and_prunes_window() {
    let (_dir, store) = temp_store().await;
    let sampler = SystemSampler::new(Arc::new(HostRepo::new()), store.clone(), 3600);
    let now = 1_800_000_000;

    sampler.tick(now - 7200).await.unwrap();
    let sample = sampler.tick(now).await.unwrap();

    assert!((0.0..=100.0).contains(&sample.cpu_percent));
    assert!(sample.mem_used <= sample.mem_total);
    let rows = store.system_samples(0, i64::MAX).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ts, now);
}

#[tokio::test]
async fn system_prune_runs_when_the_write_fails() {
    let (dir, store) = temp_store().await;
    let sampler = SystemSampler::new(Arc::new(HostRepo::new()), store.clone(), 3600);
    let now = 1_800_000_000;
    sampler.tick(now - 7200).await.unwrap();

    let side = side_pool(&dir).await;
    reject_inserts(&side, "system_metrics").await;
    assert!(sampler.tick(now).await.is_err());

    assert!(store.system_samples(0, i64::MAX).await.unwrap().is_empty());
}
