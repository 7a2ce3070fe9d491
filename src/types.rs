use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// Canonical throttle snapshot shared by the coordinator, the HTTP layer and the CLI indicator.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub is_limited: bool,
    pub retry_after: Option<u64>,
    pub countdown: Option<u64>,
    // Debounce bookkeeping only; meaningless outside this process.
    #[serde(skip)]
    pub last_toast_notified_at: Option<Instant>,
}

impl RateLimitState {
    /// Human-readable indicator text. A throttle with unknown duration has no number to show.
    pub fn indicator_text(&self) -> Option<String> {
        if !self.is_limited {
            return None;
        }
        Some(match self.countdown {
            Some(n) => format!("Rate limited; retry in {} sec", n),
            None => "Rate limited; please wait".to_string(),
        })
    }
}
