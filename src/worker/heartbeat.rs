use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Liveness signal emitted on every heartbeat tick.
pub type Pulse = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    pulse: Pulse,
    active: Mutex<Option<CancellationToken>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = active.take() {
            token.cancel();
        }
    }
}

/// Periodic liveness timer owned by a job handle.
///
/// Clones share the same timer. The timer task is stopped by [`stop`],
/// by dropping a [`HeartbeatGuard`], or when the last clone is dropped.
///
/// [`stop`]: Heartbeat::stop
#[derive(Clone)]
pub struct Heartbeat {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Heartbeat {
    pub fn new(pulse: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                pulse: Arc::new(pulse),
                active: Mutex::new(None),
            }),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start pulsing every `interval`, replacing any running timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, interval: Duration) {
        let token = CancellationToken::new();
        if let Some(previous) = self.active().replace(token.clone()) {
            previous.cancel();
        }

        let pulse = self.inner.pulse.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => pulse(),
                }
            }
        });
    }

    /// Stop the timer. Safe to call when it is not running.
    pub fn stop(&self) {
        if let Some(token) = self.active().take() {
            token.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    /// Start the timer and return a guard that stops it when dropped.
    pub fn guard(&self, interval: Duration) -> HeartbeatGuard {
        self.start(interval);
        HeartbeatGuard {
            heartbeat: self.clone(),
        }
    }
}

/// Keeps a heartbeat running for the lifetime of a scope.
///
/// Dropping the guard stops the heartbeat on every exit path, including
/// early returns and panics unwinding through the scope.
#[must_use = "the heartbeat stops as soon as the guard is dropped"]
#[derive(Debug)]
pub struct HeartbeatGuard {
    heartbeat: Heartbeat,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.heartbeat.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Heartbeat, Arc<AtomicUsize>) {
        let beats = Arc::new(AtomicUsize::new(0));
        let counter = beats.clone();
        let heartbeat = Heartbeat::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (heartbeat, beats)
    }

    #[tokio::test]
    async fn pulses_while_active() {
        let (heartbeat, beats) = counting();
        heartbeat.start(Duration::from_millis(10));
        assert!(heartbeat.is_active());

        tokio::time::sleep(Duration::from_millis(60)).await;
        heartbeat.stop();
        assert!(!heartbeat.is_active());

        let seen = beats.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several beats, got {seen}");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(beats.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let (heartbeat, beats) = counting();
        heartbeat.stop();
        heartbeat.stop();
        assert!(!heartbeat.is_active());
        assert_eq!(beats.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn guard_stops_on_drop() {
        let (heartbeat, _beats) = counting();
        {
            let _guard = heartbeat.guard(Duration::from_millis(10));
            assert!(heartbeat.is_active());
        }
        assert!(!heartbeat.is_active());
    }

    #[tokio::test]
    async fn guard_stops_on_early_return() {
        fn fails(heartbeat: &Heartbeat) -> Result<(), &'static str> {
            let _guard = heartbeat.guard(Duration::from_millis(10));
            Err("boom")
        }

        let (heartbeat, _beats) = counting();
        assert!(fails(&heartbeat).is_err());
        assert!(!heartbeat.is_active());
    }

    #[tokio::test]
    async fn restart_replaces_running_timer() {
        let (heartbeat, beats) = counting();
        heartbeat.start(Duration::from_millis(10));
        heartbeat.start(Duration::from_millis(10));
        heartbeat.stop();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let seen = beats.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(beats.load(Ordering::SeqCst), seen);
    }
}
