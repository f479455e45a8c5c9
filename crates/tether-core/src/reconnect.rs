//! Reconnection scheduling.
//!
//! After transport loss the session manager arms a per-peer timer that
//! re-triggers key agreement with exponential backoff and uniform jitter,
//! bounded by a maximum attempt count. Arming is idempotent: a peer with a
//! timer already armed, or with its attempts exhausted, is left alone.
//! Successful connection resets the counter and cancels the timer.

use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Backoff policy parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay for the first attempt
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to every delay
    pub jitter: Duration,
    /// Attempts before the scheduler gives up until reset
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            jitter: Duration::from_millis(250),
            max_attempts: 5,
        }
    }
}

struct PeerBackoff {
    attempts: u32,
    timer: Option<JoinHandle<()>>,
}

impl PeerBackoff {
    fn new() -> Self {
        Self {
            attempts: 0,
            timer: None,
        }
    }

    fn is_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }
}

/// Per-peer reconnection timers.
///
/// Owned by the session manager; lifetime is tied to the manager, not the
/// process.
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    peers: Arc<Mutex<HashMap<String, PeerBackoff>>>,
}

impl ReconnectScheduler {
    /// Create a scheduler with the given policy.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Backoff delay for a 1-indexed attempt, before jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(&self.config, attempt)
    }

    /// Arm the reconnection timer for `peer_id`.
    ///
    /// Returns `false` without creating a timer when one is already armed
    /// or the attempt counter has reached the maximum. Otherwise the timer
    /// fires after the backoff delay for the next attempt, increments the
    /// counter, and invokes `task`; a `true` result re-arms for the
    /// following attempt, `false` stops.
    pub async fn schedule<F, Fut>(&self, peer_id: &str, task: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut peers = self.peers.lock().await;
        let entry = peers
            .entry(peer_id.to_string())
            .or_insert_with(PeerBackoff::new);
        if entry.is_armed() {
            return false;
        }
        if entry.attempts >= self.config.max_attempts {
            tracing::debug!(peer = peer_id, "reconnect attempts exhausted, not arming");
            return false;
        }

        tracing::debug!(
            peer = peer_id,
            attempt = entry.attempts + 1,
            "arming reconnect timer"
        );
        entry.timer = Some(tokio::spawn(Self::run(
            self.config.clone(),
            Arc::clone(&self.peers),
            peer_id.to_string(),
            task,
        )));
        true
    }

    /// The armed timer: sleep, fire, maybe re-arm.
    ///
    /// Loops instead of respawning so cancellation only ever has one task
    /// to abort. Locks are never held across the sleep or the task await.
    async fn run<F, Fut>(
        config: ReconnectConfig,
        peers: Arc<Mutex<HashMap<String, PeerBackoff>>>,
        peer_id: String,
        task: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        loop {
            let attempt = {
                let map = peers.lock().await;
                match map.get(&peer_id) {
                    Some(entry) if entry.attempts < config.max_attempts => entry.attempts + 1,
                    _ => break,
                }
            };

            tokio::time::sleep(jittered_delay(&config, attempt)).await;

            {
                let mut map = peers.lock().await;
                match map.get_mut(&peer_id) {
                    Some(entry) => entry.attempts = attempt,
                    None => break,
                }
            }

            let should_retry = task().await;
            tracing::debug!(peer = %peer_id, attempt, should_retry, "reconnect attempt fired");
            if !should_retry {
                break;
            }
        }

        let mut map = peers.lock().await;
        if let Some(entry) = map.get_mut(&peer_id) {
            entry.timer = None;
        }
    }

    /// Cancel any armed timer for `peer_id` and zero its attempt counter.
    ///
    /// Called on successful connection.
    pub async fn reset(&self, peer_id: &str) {
        let mut peers = self.peers.lock().await;
        if let Some(entry) = peers.get_mut(peer_id) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            entry.attempts = 0;
        }
    }

    /// Cancel every timer and drop all per-peer state.
    ///
    /// Called on full teardown so no timer can fire into a destroyed peer
    /// context.
    pub async fn clear_all(&self) {
        let mut peers = self.peers.lock().await;
        for entry in peers.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
        peers.clear();
    }

    /// Whether a timer is currently armed for `peer_id`.
    pub async fn is_armed(&self, peer_id: &str) -> bool {
        let peers = self.peers.lock().await;
        peers.get(peer_id).is_some_and(PeerBackoff::is_armed)
    }

    /// Attempts fired for `peer_id` since the last reset.
    pub async fn attempts(&self, peer_id: &str) -> u32 {
        let peers = self.peers.lock().await;
        peers.get(peer_id).map_or(0, |entry| entry.attempts)
    }
}

fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    config.base_delay.saturating_mul(factor)
}

fn jittered_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let base = backoff_delay(config, attempt);
    let jitter_ms = u64::try_from(config.jitter.as_millis()).unwrap_or(u64::MAX);
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_millis(1000),
            jitter: Duration::from_millis(250),
            max_attempts: 5,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let scheduler = ReconnectScheduler::new(test_config());
        assert_eq!(scheduler.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(scheduler.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(scheduler.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(scheduler.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(scheduler.delay_for_attempt(5), Duration::from_millis(16000));
    }

    #[test]
    fn test_jitter_stays_in_half_open_interval() {
        let config = test_config();
        for attempt in 1..=5 {
            let base = backoff_delay(&config, attempt);
            for _ in 0..100 {
                let jittered = jittered_delay(&config, attempt);
                assert!(jittered >= base);
                assert!(jittered < base + Duration::from_millis(250));
            }
        }
    }

    #[test]
    fn test_zero_jitter() {
        let mut config = test_config();
        config.jitter = Duration::ZERO;
        assert_eq!(jittered_delay(&config, 1), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_and_rearms_until_stopped() {
        let scheduler = ReconnectScheduler::new(test_config());
        let fired = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fired);
        let armed = scheduler
            .schedule("bob", move || {
                let counter = Arc::clone(&counter);
                async move {
                    // Retry twice, then report success.
                    counter.fetch_add(1, Ordering::SeqCst) < 2
                }
            })
            .await;
        assert!(armed);

        // First attempt fires within [1000, 1250) ms.
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.attempts("bob").await, 1);

        // Second attempt after a further [2000, 2250) ms.
        tokio::time::sleep(Duration::from_millis(2300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        // Third attempt returned false: no further firings.
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(!scheduler.is_armed("bob").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_is_noop_while_armed() {
        let scheduler = ReconnectScheduler::new(test_config());
        assert!(scheduler.schedule("bob", || async { false }).await);
        assert!(!scheduler.schedule("bob", || async { false }).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhaust_then_reset_rearms() {
        let scheduler = ReconnectScheduler::new(test_config());
        let fired = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fired);
        assert!(
            scheduler
                .schedule("bob", move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        true // always ask to retry
                    }
                })
                .await
        );

        // Sum of maximum delays: 1.25 + 2.25 + 4.25 + 8.25 + 16.25 s.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.attempts("bob").await, 5);
        assert!(!scheduler.is_armed("bob").await);

        // A sixth schedule before reset: not armed, no timer created.
        assert!(!scheduler.schedule("bob", || async { true }).await);

        scheduler.reset("bob").await;
        assert_eq!(scheduler.attempts("bob").await, 0);
        assert!(scheduler.schedule("bob", || async { false }).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_armed_timer() {
        let scheduler = ReconnectScheduler::new(test_config());
        let fired = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&fired);
        scheduler
            .schedule("bob", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    true
                }
            })
            .await;

        scheduler.reset("bob").await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_armed("bob").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_cancels_everything() {
        let scheduler = ReconnectScheduler::new(test_config());
        let fired = Arc::new(AtomicU32::new(0));

        for peer in ["bob", "carol"] {
            let counter = Arc::clone(&fired);
            scheduler
                .schedule(peer, move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        true
                    }
                })
                .await;
        }

        scheduler.clear_all().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_failure_counts_as_retry() {
        // A task that reports failure (retry) keeps consuming attempts.
        let scheduler = ReconnectScheduler::new(test_config());
        scheduler.schedule("bob", || async { true }).await;

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(scheduler.attempts("bob").await, 1);
        assert!(scheduler.is_armed("bob").await);
    }
}
