use std::{
    ops::ControlFlow,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Called once per tick with the driver's real time in milliseconds.
/// Returning `Break` unregisters the callback.
pub type TickCallback = Box<dyn FnMut(u64) -> ControlFlow<()> + Send>;

#[derive(Debug, Error)]
pub enum TickError {
    #[error("a tick callback is already registered")]
    AlreadyRegistered,
    #[error("failed to spawn tick thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Periodic timer that drives a scheduling consumer.
pub trait TickDriver: Send {
    fn register(&mut self, interval: Duration, callback: TickCallback) -> Result<(), TickError>;

    /// Stops delivering ticks. Once this returns no further callback runs,
    /// unless it is called from the tick context itself.
    fn unregister(&mut self);

    fn is_registered(&self) -> bool;
}

struct TickThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Runs the callback on a dedicated thread, sleeping until each deadline.
pub struct ThreadTickDriver {
    epoch: Instant,
    thread: Option<TickThread>,
}

impl Default for ThreadTickDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadTickDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            thread: None,
        }
    }
}

impl TickDriver for ThreadTickDriver {
    #[instrument(skip(self, callback))]
    fn register(&mut self, interval: Duration, mut callback: TickCallback) -> Result<(), TickError> {
        if self.is_registered() {
            return Err(TickError::AlreadyRegistered);
        }
        // reap a thread that ended on its own
        self.unregister();

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let epoch = self.epoch;
        let interval = interval.max(Duration::from_micros(100));
        let handle = thread::Builder::new()
            .name("tickseq-tick".to_string())
            .spawn(move || {
                let mut deadline = Instant::now();
                while !thread_stop.load(Ordering::Acquire) {
                    let now_ms = u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
                    if callback(now_ms).is_break() {
                        break;
                    }
                    deadline += interval;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        deadline = now;
                    }
                }
            })
            .map_err(TickError::Spawn)?;

        self.thread = Some(TickThread { stop, handle });
        debug!("tick thread started");
        Ok(())
    }

    fn unregister(&mut self) {
        let Some(tick_thread) = self.thread.take() else {
            return;
        };
        tick_thread.stop.store(true, Ordering::Release);
        if tick_thread.handle.thread().id() == thread::current().id() {
            // cannot join ourselves; the loop sees the flag and exits
            return;
        }
        if tick_thread.handle.join().is_err() {
            warn!("tick thread panicked");
        }
        debug!("tick thread stopped");
    }

    fn is_registered(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|tick_thread| !tick_thread.handle.is_finished())
    }
}

impl Drop for ThreadTickDriver {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[derive(Default)]
struct ManualSlot {
    callback: Option<TickCallback>,
    interval: Option<Duration>,
    generation: u64,
}

/// Driver fired by hand through a [`ManualTickHandle`], for deterministic
/// tests and offline rendering.
#[derive(Default)]
pub struct ManualTickDriver {
    slot: Arc<Mutex<ManualSlot>>,
}

/// Fires ticks into a [`ManualTickDriver`].
#[derive(Clone)]
pub struct ManualTickHandle {
    slot: Arc<Mutex<ManualSlot>>,
}

impl ManualTickDriver {
    #[must_use]
    pub fn new() -> (Self, ManualTickHandle) {
        let driver = Self::default();
        let handle = ManualTickHandle {
            slot: Arc::clone(&driver.slot),
        };
        (driver, handle)
    }
}

impl TickDriver for ManualTickDriver {
    fn register(&mut self, interval: Duration, callback: TickCallback) -> Result<(), TickError> {
        let mut slot = self.slot.lock();
        if slot.callback.is_some() {
            return Err(TickError::AlreadyRegistered);
        }
        slot.callback = Some(callback);
        slot.interval = Some(interval);
        slot.generation += 1;
        Ok(())
    }

    fn unregister(&mut self) {
        let mut slot = self.slot.lock();
        slot.callback = None;
        slot.interval = None;
        slot.generation += 1;
    }

    fn is_registered(&self) -> bool {
        self.slot.lock().callback.is_some()
    }
}

impl ManualTickHandle {
    /// Runs one tick at `now_ms`. Returns false if nothing is registered or
    /// the callback asked to stop.
    pub fn fire(&self, now_ms: u64) -> bool {
        let (mut callback, generation) = {
            let mut slot = self.slot.lock();
            let Some(callback) = slot.callback.take() else {
                return false;
            };
            (callback, slot.generation)
        };
        // the slot lock is not held while the callback runs
        if callback(now_ms).is_break() {
            return false;
        }
        let mut slot = self.slot.lock();
        if slot.generation == generation && slot.callback.is_none() {
            slot.callback = Some(callback);
        }
        true
    }

    /// Fires ticks every `step_ms` from `from_ms` through `to_ms` inclusive.
    /// Stops early if the callback unregisters.
    pub fn fire_range(&self, from_ms: u64, to_ms: u64, step_ms: u64) -> bool {
        let step = step_ms.max(1);
        let mut now = from_ms;
        while now <= to_ms {
            if !self.fire(now) {
                return false;
            }
            now += step;
        }
        true
    }

    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.slot.lock().interval
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.slot.lock().callback.is_some()
    }
}
