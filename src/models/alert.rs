// Quota alert history (used for per-threshold cooldown)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub ts: i64,
    pub threshold: u32,
    pub message: String,
}
