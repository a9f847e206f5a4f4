use crate::clock::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_NONCE_CAPACITY: usize = 100_000;

type NonceKey = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    #[error("nonce already used")]
    Reused,

    #[error("nonce ledger is full")]
    LedgerFull,
}

/// Anti-replay cache of `(api_key, nonce)` pairs.
///
/// A pair is accepted at most once while its first sighting is younger than
/// the TTL. The map is bounded: when full, expired entries are dropped, and if
/// that frees nothing new sightings are refused. A live entry is never evicted.
pub struct NonceLedger {
    seen: Mutex<HashMap<NonceKey, OffsetDateTime>>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl NonceLedger {
    pub fn new(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a sighting of a pair not seen within the TTL.
    pub fn try_record(&self, api_key: &str, nonce: &str) -> Result<(), NonceError> {
        let now = self.clock.now();
        let cutoff = now - self.ttl;
        let key = (api_key.to_string(), nonce.to_string());
        let mut seen = self.lock();

        if let Some(first_seen) = seen.get(&key)
            && *first_seen >= cutoff
        {
            return Err(NonceError::Reused);
        }

        if seen.len() >= self.capacity && !seen.contains_key(&key) {
            seen.retain(|_, at| *at >= cutoff);
            if seen.len() >= self.capacity {
                warn!(capacity = self.capacity, "Nonce ledger full, refusing new nonce");
                return Err(NonceError::LedgerFull);
            }
        }

        seen.insert(key, now);
        Ok(())
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.ttl;
        let mut seen = self.lock();
        let before = seen.len();
        seen.retain(|_, at| *at >= cutoff);
        before - seen.len()
    }

    /// Spawn the periodic purge.
    pub fn start_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = self.len(), "Purged expired nonces");
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NonceKey, OffsetDateTime>> {
        // The map holds no invariants a panicking writer could break.
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn ledger(ttl_secs: u64, capacity: usize) -> (Arc<ManualClock>, NonceLedger) {
        let clock = Arc::new(ManualClock::starting_now());
        let ledger = NonceLedger::new(Duration::from_secs(ttl_secs), capacity, clock.clone());
        (clock, ledger)
    }

    #[test]
    fn a_nonce_is_accepted_once() {
        let (_, ledger) = ledger(600, 10);
        assert_eq!(ledger.try_record("pk_test_a", "n1"), Ok(()));
        assert_eq!(ledger.try_record("pk_test_a", "n1"), Err(NonceError::Reused));
    }

    #[test]
    fn nonces_are_scoped_by_api_key() {
        let (_, ledger) = ledger(600, 10);
        assert_eq!(ledger.try_record("pk_test_a", "n1"), Ok(()));
        assert_eq!(ledger.try_record("pk_test_b", "n1"), Ok(()));
    }

    #[test]
    fn purge_drops_only_entries_past_the_ttl() {
        let (clock, ledger) = ledger(600, 10);
        ledger.try_record("k", "old").unwrap();
        clock.advance(Duration::from_secs(300));
        ledger.try_record("k", "young").unwrap();

        clock.advance(Duration::from_secs(300));
        assert_eq!(ledger.purge_expired(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(ledger.purge_expired(), 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.try_record("k", "old"), Ok(()));
    }

    #[test]
    fn full_ledger_makes_room_from_expired_entries() {
        let (clock, ledger) = ledger(60, 2);
        ledger.try_record("k", "a").unwrap();
        clock.advance(Duration::from_secs(61));
        ledger.try_record("k", "b").unwrap();

        assert_eq!(ledger.try_record("k", "c"), Ok(()));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.try_record("k", "b"), Err(NonceError::Reused));
    }

    #[test]
    fn flooding_a_full_ledger_cannot_evict_a_live_nonce() {
        let (clock, ledger) = ledger(600, 3);
        ledger.try_record("k", "captured").unwrap();
        clock.advance(Duration::from_secs(1));

        let mut refused = 0;
        for i in 0..10 {
            if ledger.try_record("k", &format!("junk-{i}")) == Err(NonceError::LedgerFull) {
                refused += 1;
            }
        }
        assert_eq!(refused, 8);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.try_record("k", "captured"), Err(NonceError::Reused));

        // Room comes back once the entries age out.
        clock.advance(Duration::from_secs(601));
        assert_eq!(ledger.try_record("k", "fresh"), Ok(()));
        assert_eq!(ledger.try_record("k", "captured"), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_periodically() {
        let clock = Arc::new(ManualClock::starting_now());
        let ledger = Arc::new(NonceLedger::new(Duration::from_secs(60), 10, clock.clone()));
        ledger.try_record("k", "n").unwrap();

        let handle = ledger.clone().start_sweeper(Duration::from_secs(300));
        clock.advance(Duration::from_secs(120));
        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;

        assert!(ledger.is_empty());
        handle.abort();
    }
}
