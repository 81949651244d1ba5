//! Debounce gate for rapid-fire input

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

struct Pending {
    /// Bumped by every `emit` and `cancel`; a timer only fires for its own
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Forwards the last emitted value once input has been quiet for `delay`
///
/// Each `emit` replaces the pending timer. Dropping the debouncer cancels
/// the pending timer, so no callback fires after teardown.
pub struct Debouncer<V> {
    delay: Duration,
    on_settled: Arc<dyn Fn(V) + Send + Sync>,
    pending: Arc<Mutex<Pending>>,
}

impl<V> Debouncer<V>
where
    V: Send + 'static,
{
    pub fn new<F>(delay: Duration, on_settled: F) -> Self
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        Self {
            delay,
            on_settled: Arc::new(on_settled),
            pending: Arc::new(Mutex::new(Pending {
                generation: 0,
                timer: None,
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Restart the quiet period with `value` as the candidate
    pub fn emit(&self, value: V) {
        let mut pending = self.pending.lock();
        pending.generation += 1;
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }

        let generation = pending.generation;
        let delay = self.delay;
        let shared = self.pending.clone();
        let on_settled = self.on_settled.clone();

        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut pending = shared.lock();
                if pending.generation != generation {
                    return;
                }
                pending.timer = None;
            }
            on_settled(value);
        }));
    }

    /// Drop the pending value without firing
    pub fn cancel(&self) {
        let mut pending = self.pending.lock();
        pending.generation += 1;
        if let Some(timer) = pending.timer.take() {
            timer.abort();
            debug!("Debounce timer cancelled");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().timer.is_some()
    }
}

impl<V> Drop for Debouncer<V> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        pending.generation += 1;
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
    }
}

impl<V> fmt::Debug for Debouncer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.pending.lock().timer.is_some())
            .finish()
    }
}
