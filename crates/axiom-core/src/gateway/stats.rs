use serde::{Deserialize, Serialize};

/// Gateway counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub processed: u64,
    pub exact: u64,
    pub nearest: u64,
    pub cached: u64,
    pub direct: u64,
    pub created: u64,
    pub unresolved: u64,
    /// Unresolved inputs accepted by the curiosity queue.
    pub queued: u64,
    /// Cache hits that no longer matched the Graph Store.
    pub stale_cache_hits: u64,
    pub feedback: u64,
    pub commands: u64,
}

impl GatewayStats {
    /// Inputs resolved to a token, by any route.
    #[must_use]
    pub fn resolved(&self) -> u64 {
        self.exact + self.nearest + self.cached + self.direct + self.created
    }
}
