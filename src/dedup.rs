use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Keyed presence set where every entry expires on its own.
///
/// Expired entries are treated as absent and purged lazily on access, so
/// callers never prune. Uses tokio's clock so paused-time tests can drive it.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `key` was set less than its TTL ago. Does not refresh the entry.
    pub fn peek(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Inserts `key` or restarts its TTL.
    pub fn set(&self, key: impl Into<String>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, expires_at| *expires_at > now);
        entries.insert(key.into(), now + ttl);
    }

    /// Records `key` unless a live entry already holds it. Returns true when
    /// this call inserted the key. Check and insert happen under one lock.
    pub fn insert_if_absent(&self, key: impl Into<String>, ttl: Duration) -> bool {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if matches!(entries.get(&key), Some(expires_at) if *expires_at > now) {
            return false;
        }
        entries.retain(|_, expires_at| *expires_at > now);
        entries.insert(key, now + ttl);
        true
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|expires_at| **expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::advance;

    const WINDOW: Duration = Duration::from_secs(15 * 60);

    #[tokio::test(start_paused = true)]
    async fn entry_lives_for_exactly_one_ttl() {
        let cache = DedupCache::new();
        cache.set("150", WINDOW);

        assert!(cache.peek("150"));

        advance(WINDOW - Duration::from_millis(1)).await;
        assert!(cache.peek("150"), "still inside the window");

        advance(Duration::from_millis(2)).await;
        assert!(!cache.peek("150"), "expired after the window");
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn peek_does_not_refresh() {
        let cache = DedupCache::new();
        cache.set("k", Duration::from_secs(10));

        advance(Duration::from_secs(6)).await;
        assert!(cache.peek("k"));

        advance(Duration::from_secs(6)).await;
        assert!(!cache.peek("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn set_refreshes_ttl() {
        let cache = DedupCache::new();
        cache.set("k", Duration::from_secs(10));

        advance(Duration::from_secs(8)).await;
        cache.set("k", Duration::from_secs(10));

        advance(Duration::from_secs(8)).await;
        assert!(cache.peek("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_independently() {
        let cache = DedupCache::new();
        cache.set("a", Duration::from_secs(5));
        cache.set("b", Duration::from_secs(20));
        assert_eq!(cache.len(), 2);

        advance(Duration::from_secs(10)).await;
        assert!(!cache.peek("a"));
        assert!(cache.peek("b"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_peek_and_set() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let _guard = rt.enter();

        let cache = Arc::new(DedupCache::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                let handle = rt.handle().clone();
                std::thread::spawn(move || {
                    let _guard = handle.enter();
                    for i in 0..250 {
                        let key = format!("{}-{}", t, i);
                        cache.set(key.clone(), WINDOW);
                        assert!(cache.peek(&key));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_if_absent_claims_once_per_ttl() {
        let cache = DedupCache::new();

        assert!(cache.insert_if_absent("150", WINDOW));
        assert!(!cache.insert_if_absent("150", WINDOW));

        advance(WINDOW).await;
        assert!(cache.insert_if_absent("150", WINDOW), "expired entry can be claimed again");
    }

    #[test]
    fn racing_inserts_admit_exactly_one() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        for round in 0..50 {
            let cache = Arc::new(DedupCache::new());
            let barrier = Arc::new(std::sync::Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cache = cache.clone();
                    let barrier = barrier.clone();
                    let handle = rt.handle().clone();
                    std::thread::spawn(move || {
                        let _guard = handle.enter();
                        barrier.wait();
                        cache.insert_if_absent(format!("swing-{}", round), WINDOW)
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1, "round {}", round);
        }
    }
}
