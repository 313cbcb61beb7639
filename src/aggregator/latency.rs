// Hourly latency down-sampling of raw probe rows.

use std::collections::BTreeMap;

use crate::models::LatencyRecord;

pub const BUCKET_SECS: i64 = 3600;

/// Start of the hour containing `ts`.
pub fn floor_to_bucket(ts: i64) -> i64 {
    ts - ts.rem_euclid(BUCKET_SECS)
}

#[derive(Default)]
struct Accum {
    rtt_sum: f64,
    rtt_count: u32,
    sent: u32,
    lost: u32,
}

/// One aggregated row per target for the records of one bucket. The RTT is the mean of the
/// non-null values and stays null when every input was null; sent and lost are summed.
pub fn downsample_bucket(records: &[LatencyRecord], bucket_start: i64) -> Vec<LatencyRecord> {
    let mut per_target: BTreeMap<&str, Accum> = BTreeMap::new();
    for record in records {
        let acc = per_target.entry(record.target.as_str()).or_default();
        if let Some(rtt) = record.rtt_ms {
            acc.rtt_sum += rtt;
            acc.rtt_count += 1;
        }
        acc.sent = acc.sent.saturating_add(record.sent);
        acc.lost = acc.lost.saturating_add(record.lost);
    }

    per_target
        .into_iter()
        .map(|(target, acc)| LatencyRecord {
            ts: bucket_start,
            target: target.to_string(),
            rtt_ms: (acc.rtt_count > 0).then(|| acc.rtt_sum / f64::from(acc.rtt_count)),
            sent: acc.sent,
            lost: acc.lost,
            is_aggregated: true,
        })
        .collect()
}
