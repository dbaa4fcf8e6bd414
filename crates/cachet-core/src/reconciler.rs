//! Periodic reconciliation of registry bookkeeping
//!
//! Member sets and the reverse index grow with every new key and cache
//! name. A sweep drops the ones written since the previous sweep together
//! with the reverse index; cached entries and their TTLs are left alone.
//! Bookkeeping for entries that are still live is rebuilt by their next
//! write.

use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::registry::KeySpaceRegistry;

/// Default sweep schedule: every day at 00:10
pub const DEFAULT_SCHEDULE: &str = "0 10 0 * * *";

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Member-set addresses taken from the touched set
    pub addresses: usize,
    /// Addresses whose deletion failed
    pub failed: usize,
    /// Whether the reverse index was deleted
    pub reverse_index_cleared: bool,
}

pub struct Reconciler {
    registry: Arc<KeySpaceRegistry>,
}

impl Reconciler {
    pub fn new(registry: Arc<KeySpaceRegistry>) -> Self {
        Self { registry }
    }

    /// Run one sweep
    ///
    /// Store failures are logged and counted, never returned: whatever is
    /// left behind is picked up again once it is written to.
    pub async fn sweep(&self) -> SweepStats {
        let addresses = self.registry.touched().take();
        let store = self.registry.store();
        let mut stats = SweepStats {
            addresses: addresses.len(),
            ..Default::default()
        };

        for address in &addresses {
            if let Err(e) = store.delete(std::slice::from_ref(address)).await {
                warn!("Failed to delete member set {}: {}", address, e);
                stats.failed += 1;
            }
        }

        let reverse_index = &self.registry.config().reverse_index_key;
        match store.delete(std::slice::from_ref(reverse_index)).await {
            Ok(_) => stats.reverse_index_cleared = true,
            Err(e) => warn!("Failed to delete reverse index {}: {}", reverse_index, e),
        }

        metrics::counter!("cachet_sweeps_total").increment(1);
        info!(
            "Reconciliation sweep: {} member sets dropped, {} failed",
            stats.addresses - stats.failed,
            stats.failed
        );
        stats
    }
}

/// Parse a six- or seven-field cron expression (seconds first)
pub fn parse_schedule(expression: &str) -> Result<Schedule, CoreError> {
    Schedule::from_str(expression)
        .map_err(|e| CoreError::InvalidSchedule(format!("{}: {}", expression, e)))
}

/// Spawn a background task that sweeps on `schedule`
pub fn spawn_reconciler_task(
    reconciler: Arc<Reconciler>,
    schedule: Schedule,
) -> tokio::task::JoinHandle<()> {
    info!("Starting background reconciler task (schedule: {})", schedule);

    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                info!("Reconciler schedule has no upcoming runs, stopping");
                return;
            };
            let delay = (next - Utc::now()).to_std().unwrap_or_default();
            debug!("Next reconciliation sweep at {}", next);
            tokio::time::sleep(delay).await;

            info!("Running scheduled reconciliation sweep");
            reconciler.sweep().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use cachet_store::{CacheStore, MemoryStore};

    async fn setup() -> (Arc<MemoryStore>, Arc<KeySpaceRegistry>, Reconciler) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(KeySpaceRegistry::new(
            store.clone(),
            RegistryConfig::default(),
        ));
        for (key, cache) in [("o1", "orders"), ("o2", "orders"), ("u1", "users")] {
            store.set(key, "Avalue", None).await.unwrap();
            registry.record_write(key, cache).await.unwrap();
        }
        let reconciler = Reconciler::new(registry.clone());
        (store, registry, reconciler)
    }

    #[tokio::test]
    async fn test_sweep_drops_bookkeeping_only() {
        let (store, registry, reconciler) = setup().await;

        let stats = reconciler.sweep().await;
        assert_eq!(
            stats,
            SweepStats {
                addresses: 2,
                failed: 0,
                reverse_index_cleared: true,
            }
        );

        assert!(registry.touched().is_empty());
        assert!(!store.contains("REDIS_CACHE_KEYS_OF_orders"));
        assert!(!store.contains("REDIS_CACHE_KEYS_OF_users"));
        assert!(!store.contains("C7264226X_CACHE_NAME_OF_KEY_HASH"));

        // Entries survive
        assert_eq!(store.get("o1").await.unwrap().as_deref(), Some("Avalue"));
        assert_eq!(store.get("u1").await.unwrap().as_deref(), Some("Avalue"));
    }

    #[tokio::test]
    async fn test_bookkeeping_regrows() {
        let (store, registry, reconciler) = setup().await;
        reconciler.sweep().await;

        registry.record_write("o1", "orders").await.unwrap();
        assert_eq!(registry.owner_of("o1").await.unwrap().as_deref(), Some("orders"));
        assert_eq!(registry.touched().len(), 1);

        assert_eq!(registry.evict_cache_name("orders").await.unwrap(), 1);
        assert!(!store.contains("o1"));
        // o2 lost its bookkeeping in the sweep and now only expires by TTL
        assert!(store.contains("o2"));
    }

    #[tokio::test]
    async fn test_sweep_tolerates_store_failure() {
        let (store, registry, reconciler) = setup().await;
        store.set_offline(true);

        let stats = reconciler.sweep().await;
        assert_eq!(stats.addresses, 2);
        assert_eq!(stats.failed, 2);
        assert!(!stats.reverse_index_cleared);
        assert!(registry.touched().is_empty());
    }

    #[tokio::test]
    async fn test_empty_sweep() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(KeySpaceRegistry::new(store, RegistryConfig::default()));
        let stats = Reconciler::new(registry).sweep().await;
        assert_eq!(stats.addresses, 0);
        assert!(stats.reverse_index_cleared);
    }

    #[test]
    fn test_parse_schedule() {
        let schedule = parse_schedule(DEFAULT_SCHEDULE).unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
        assert!(matches!(
            parse_schedule("every day"),
            Err(CoreError::InvalidSchedule(_))
        ));
    }
}
