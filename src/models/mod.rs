// Domain models

mod alert;
mod latency;
mod system;
mod traffic;

pub use alert::AlertRecord;
pub use latency::{LatencyRecord, PingTarget, ProbeResult};
pub use system::SystemMetricSample;
pub use traffic::{CounterPair, CounterReading, DailySummary, Scope, TrafficSnapshot};
