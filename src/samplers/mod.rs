// Periodic samplers. Each `tick` / `run_round` is one sampling operation; scheduling lives in
// `collector`.

mod latency;
mod system;
mod traffic;

pub use latency::LatencySampler;
pub use system::SystemSampler;
pub use traffic::{TrafficSampler, TrafficTickReport};
