//! Restartable activity deadline
//!
//! The watchdog fires only after a full timeout of silence. Every `update()`
//! cancels the pending deadline and starts counting again.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Identifies the arming a timeout belongs to.
///
/// A tick can be in flight while the watchdog is re-armed. `accept` tells
/// the receiver whether the tick still refers to the current arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogTick {
    pub generation: u64,
}

type TimeoutCallback = Arc<dyn Fn(WatchdogTick) + Send + Sync>;

#[derive(Default)]
struct Arming {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

pub struct ActivityWatchdog {
    timeout: Duration,
    on_timeout: TimeoutCallback,
    arming: Mutex<Arming>,
}

impl ActivityWatchdog {
    pub fn new(timeout: Duration, on_timeout: impl Fn(WatchdogTick) + Send + Sync + 'static) -> Self {
        Self {
            timeout,
            on_timeout: Arc::new(on_timeout),
            arming: Mutex::new(Arming::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm the deadline. Re-arms if already armed.
    pub fn start(&self) {
        self.arm();
    }

    /// Activity seen: restart the countdown
    pub fn update(&self) {
        self.arm();
    }

    /// Cancel and disarm. Idempotent.
    pub fn stop(&self) {
        let mut arming = self.arming.lock();
        arming.generation += 1;
        if let Some(pending) = arming.pending.take() {
            pending.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.arming
            .lock()
            .pending
            .as_ref()
            .is_some_and(|p| !p.is_finished())
    }

    /// Consume a tick. Returns false for ticks from a cancelled or replaced
    /// arming; a current tick disarms the watchdog.
    pub fn accept(&self, tick: WatchdogTick) -> bool {
        let mut arming = self.arming.lock();
        if arming.generation != tick.generation || arming.pending.is_none() {
            return false;
        }
        arming.pending = None;
        true
    }

    fn arm(&self) {
        let mut arming = self.arming.lock();
        arming.generation += 1;
        if let Some(pending) = arming.pending.take() {
            pending.abort();
        }

        let tick = WatchdogTick {
            generation: arming.generation,
        };
        let timeout = self.timeout;
        let on_timeout = self.on_timeout.clone();
        arming.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_timeout(tick);
        }));
    }
}

impl Drop for ActivityWatchdog {
    fn drop(&mut self) {
        if let Some(pending) = self.arming.get_mut().pending.take() {
            pending.abort();
        }
    }
}
