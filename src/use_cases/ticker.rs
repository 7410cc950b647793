//! High-resolution frame pacing.
//!
//! The ticker runs on its own OS thread and schedules every frame against an
//! absolute deadline measured from the start instant, so sleep overshoot never
//! accumulates into drift. It sleeps while the deadline is far away and spins on
//! the monotonic clock for the last stretch, which keeps frame spacing tight on
//! platforms whose sleep granularity is several milliseconds.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info};

// Below this remaining time the ticker spins instead of sleeping.
const SPIN_WINDOW: Duration = Duration::from_millis(1);
const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Debug)]
pub enum TickerError {
    InvalidRate,
    AlreadyStarted,
    #[allow(dead_code)]
    Spawn(std::io::Error),
}

#[derive(Debug)]
pub struct HighResTicker {
    target_fps: u32,
    frame_count: AtomicU64,
    started_at: OnceLock<Instant>,
    stopped: AtomicBool,
    ready: Notify,
}

impl HighResTicker {
    pub fn new(target_fps: u32) -> Result<Self, TickerError> {
        if target_fps == 0 {
            return Err(TickerError::InvalidRate);
        }
        Ok(Self {
            target_fps,
            frame_count: AtomicU64::new(0),
            started_at: OnceLock::new(),
            stopped: AtomicBool::new(false),
            ready: Notify::new(),
        })
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos((NANOS_PER_SEC / self.target_fps as u128) as u64)
    }

    /// Runs [`start`](Self::start) on a dedicated thread.
    pub fn spawn(self: &std::sync::Arc<Self>) -> Result<JoinHandle<()>, TickerError> {
        let ticker = std::sync::Arc::clone(self);
        std::thread::Builder::new()
            .name("high-res-ticker".to_string())
            .spawn(move || {
                if let Err(e) = ticker.start() {
                    tracing::error!(error = ?e, "ticker failed to start");
                }
            })
            .map_err(TickerError::Spawn)
    }

    /// Paces frames until [`stop`](Self::stop) is called. Blocks the calling thread.
    pub fn start(&self) -> Result<(), TickerError> {
        let start = Instant::now();
        if self.started_at.set(start).is_err() {
            return Err(TickerError::AlreadyStarted);
        }
        info!(
            target_fps = self.target_fps,
            interval_us = self.interval().as_micros() as u64,
            "ticker started"
        );

        // Index of the frame slot whose deadline we are waiting for.
        let mut slot: u64 = 1;
        while !self.stopped.load(Ordering::Acquire) {
            let deadline = start + self.slot_offset(slot);
            wait_until(deadline, &self.stopped);
            if self.stopped.load(Ordering::Acquire) {
                break;
            }

            self.frame_count.fetch_add(1, Ordering::AcqRel);
            // Single stored permit: a consumer that falls behind sees one signal, not a burst.
            self.ready.notify_one();

            // Skip slots we overslept through instead of firing them back to back.
            let elapsed_slots = self.slots_elapsed(start.elapsed());
            slot = slot.max(elapsed_slots) + 1;
        }

        debug!(
            frames = self.frame_count(),
            lifetime_ms = self.lifetime().as_millis() as u64,
            "ticker stopped"
        );
        Ok(())
    }

    /// Waits for the next frame. Returns false once the ticker has been stopped.
    pub async fn ready(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.ready.notified().await;
        !self.is_stopped()
    }

    /// Stops the pacing loop and wakes any task waiting in [`ready`](Self::ready).
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.ready.notify_waiters();
            self.ready.notify_one();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Wall time since `start`; zero if the ticker never started.
    pub fn lifetime(&self) -> Duration {
        self.started_at
            .get()
            .map(Instant::elapsed)
            .unwrap_or_default()
    }

    fn slot_offset(&self, slot: u64) -> Duration {
        let nanos = slot as u128 * NANOS_PER_SEC / self.target_fps as u128;
        Duration::from_nanos(nanos as u64)
    }

    fn slots_elapsed(&self, elapsed: Duration) -> u64 {
        (elapsed.as_nanos() * self.target_fps as u128 / NANOS_PER_SEC) as u64
    }
}

fn wait_until(deadline: Instant, stopped: &AtomicBool) {
    loop {
        let now = Instant::now();
        if now >= deadline || stopped.load(Ordering::Relaxed) {
            return;
        }
        let remaining = deadline - now;
        if remaining > SPIN_WINDOW {
            std::thread::sleep(remaining - SPIN_WINDOW);
        } else {
            std::hint::spin_loop();
        }
    }
}
