//! Zone cache and the periodic refresher feeding it

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::session::SessionGate;
use crate::shutdown::Shutdown;
use crate::signals::ZoneDetector;
use crate::types::{Credentials, Zone};

/// Immutable view of one refresh cycle
#[derive(Debug, Clone, Default)]
pub struct ZoneSnapshot {
    pub zones: Arc<Vec<Zone>>,
    /// Bumped on every replace; 0 before the first refresh
    pub generation: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Shared zone list: whole-replace writes, whole-snapshot reads
#[derive(Default)]
pub struct ZoneCache {
    inner: RwLock<ZoneSnapshot>,
}

impl ZoneCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new zone list
    pub async fn replace(&self, zones: Vec<Zone>) {
        let zones = Arc::new(zones);
        let mut current = self.inner.write().await;
        *current = ZoneSnapshot {
            zones,
            generation: current.generation + 1,
            updated_at: Some(Utc::now()),
        };
    }

    pub async fn snapshot(&self) -> ZoneSnapshot {
        self.inner.read().await.clone()
    }
}

/// Recomputes zones on a fixed interval through the session gate
pub struct ZoneRefresher {
    gate: Arc<SessionGate>,
    cache: Arc<ZoneCache>,
    detector: Arc<dyn ZoneDetector>,
    /// Tried in order until one logs in
    credentials: Vec<Credentials>,
    symbol: String,
    interval: Duration,
}

impl ZoneRefresher {
    pub fn new(
        gate: Arc<SessionGate>,
        cache: Arc<ZoneCache>,
        detector: Arc<dyn ZoneDetector>,
        credentials: Vec<Credentials>,
        symbol: &str,
        interval: Duration,
    ) -> Self {
        Self {
            gate,
            cache,
            detector,
            credentials,
            symbol: symbol.to_string(),
            interval,
        }
    }

    /// One refresh cycle; returns the zone count on success
    pub async fn refresh_once(&self) -> Option<usize> {
        for credentials in &self.credentials {
            let detector = Arc::clone(&self.detector);
            let symbol = self.symbol.as_str();
            let computed = self
                .gate
                .with_session(credentials, |mut session| async move {
                    detector.compute_zones(&mut *session, symbol).await
                })
                .await;

            if let Some(zones) = computed {
                let count = zones.len();
                self.cache.replace(zones).await;
                return Some(count);
            }
        }
        None
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        info!("Zone refresher started (every {:?})", self.interval);

        while !shutdown.is_triggered() {
            match self.refresh_once().await {
                Some(count) => info!("Zone cache refreshed: {} zones", count),
                None => warn!("Zone refresh failed, keeping previous zones"),
            }
            if shutdown.sleep(self.interval).await {
                break;
            }
        }

        info!("Zone refresher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use rust_decimal::Decimal;

    fn zone(id: &str, lower: i64) -> Zone {
        Zone {
            id: id.to_string(),
            created_at: Utc::now(),
            direction: Direction::Long,
            lower: Decimal::from(lower),
            upper: Decimal::from(lower + 1),
            size: Decimal::ONE,
            score: 80,
        }
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_list() {
        let cache = ZoneCache::new();
        let empty = cache.snapshot().await;
        assert_eq!(empty.generation, 0);
        assert!(empty.zones.is_empty());

        cache.replace(vec![zone("a", 1), zone("b", 2)]).await;
        let first = cache.snapshot().await;
        cache.replace(vec![zone("c", 3)]).await;
        let second = cache.snapshot().await;

        // Earlier snapshots are unaffected by later replaces
        assert_eq!(first.zones.len(), 2);
        assert_eq!(first.generation, 1);
        assert_eq!(second.zones.len(), 1);
        assert_eq!(second.zones[0].id, "c");
        assert_eq!(second.generation, 2);
    }
}
