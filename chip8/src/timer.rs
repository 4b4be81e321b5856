//! Free-running delay and sound timers.
//!
//! The two 8-bit countdown timers decrement at a fixed 60 Hz, independent of
//! the instruction rate. The driver thread writes them while the interpreter
//! thread reads `DT` and rewrites both through `Fx15`/`Fx18`, so the fields
//! are atomics rather than plain bytes.
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::constants::{NANOS_IN_SECOND, TIMER_FREQUENCY};

/// Shared timer state.
#[derive(Default)]
pub struct Timers {
    /// (DT) Delay timer that counts down to 0.
    delay: AtomicU8,
    /// (ST) Sound timer that counts down to 0. While it has a non-zero
    /// value, the buzzer is on.
    sound: AtomicU8,
    /// Switch tracking whether the buzzer should be on or off.
    buzzer: AtomicBool,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(&self) -> u8 {
        self.delay.load(Ordering::Acquire)
    }

    pub fn set_delay(&self, value: u8) {
        self.delay.store(value, Ordering::Release);
    }

    pub fn sound(&self) -> u8 {
        self.sound.load(Ordering::Acquire)
    }

    pub fn set_sound(&self, value: u8) {
        self.sound.store(value, Ordering::Release);
        self.buzzer.store(value > 0, Ordering::Release);
    }

    pub fn is_beeping(&self) -> bool {
        self.buzzer.load(Ordering::Acquire)
    }

    /// Count both timers down by one, floored at zero.
    pub(crate) fn tick(&self) {
        let _ = self
            .delay
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                value.checked_sub(1)
            });
        let _ = self
            .sound
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                value.checked_sub(1)
            });
        self.buzzer
            .store(self.sound.load(Ordering::Acquire) > 0, Ordering::Release);
    }
}

/// Background thread decrementing the timers at 60 Hz.
///
/// The thread holds only a weak handle to the shared state and exits on
/// its own once the owning VM is dropped, so a session never leaks a
/// free-running thread past its lifetime.
pub struct TimerDriver {
    handle: Option<JoinHandle<()>>,
}

impl TimerDriver {
    pub fn start(timers: &Arc<Timers>) -> std::io::Result<Self> {
        let timers: Weak<Timers> = Arc::downgrade(timers);
        let handle = thread::Builder::new()
            .name("chip8-timer".to_string())
            .spawn(move || {
                let mut interval =
                    Interval::new(Duration::from_nanos(NANOS_IN_SECOND / TIMER_FREQUENCY));
                loop {
                    interval.wait();
                    match timers.upgrade() {
                        Some(timers) => timers.tick(),
                        None => return,
                    }
                }
            })?;

        Ok(Self {
            handle: Some(handle),
        })
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        // The tick thread notices the dropped state on its next wakeup.
        // Detach rather than join so dropping a VM never blocks.
        drop(self.handle.take());
    }
}

/// Fixed-rate interval to pace the tick thread.
pub(crate) struct Interval {
    deadline: Instant,
    period: Duration,
}

impl Interval {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            deadline: Instant::now() + period,
            period,
        }
    }

    /// Block the current thread until the next cycle.
    pub(crate) fn wait(&mut self) {
        let now = Instant::now();
        if now < self.deadline {
            thread::sleep(self.deadline - now);
        }

        if now > self.deadline + self.period {
            // Reset rather than trying to catch up.
            //
            // If the host was suspended for a while, the timers should
            // simply continue at their usual rate instead of bursting.
            self.deadline = Instant::now() + self.period;
        } else {
            self.deadline += self.period;
        }
    }
}
