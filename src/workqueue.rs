// TGM Wearable — Deferred Work Queue
//
// One cooperative executor thread runs every deferred task to completion,
// one at a time. Interrupt handlers only set a pending bit and ring the
// doorbell; a task that is already pending is not queued twice.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deferred tasks, in the order the executor runs them when several are
/// pending at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Work {
    ReadOptical = 0,
    ReadMotion = 1,
    RegisterCommand = 2,
    ChargeChanged = 3,
    SampleTemperature = 4,
    MeasureBattery = 5,
}

impl Work {
    pub const COUNT: usize = 6;

    pub const ALL: [Work; Self::COUNT] = [
        Self::ReadOptical,
        Self::ReadMotion,
        Self::RegisterCommand,
        Self::ChargeChanged,
        Self::SampleTemperature,
        Self::MeasureBattery,
    ];

    fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Wakes the executor. Must be callable from interrupt context.
pub trait Doorbell: Send + Sync {
    fn ring(&self);
}

impl<D: Doorbell + ?Sized> Doorbell for Arc<D> {
    fn ring(&self) {
        (**self).ring()
    }
}

/// Blocks the executor until the doorbell rings or `timeout` elapses.
pub trait Waiter {
    fn wait(&mut self, timeout: Option<Duration>);
}

/// Submission side, shared with interrupt handlers and the host task.
pub struct WorkQueue {
    pending: AtomicU32,
    doorbell: Box<dyn Doorbell>,
}

impl WorkQueue {
    pub fn new(doorbell: impl Doorbell + 'static) -> Self {
        Self {
            pending: AtomicU32::new(0),
            doorbell: Box::new(doorbell),
        }
    }

    /// Mark `work` pending. Lock-free and safe from an ISR. Returns `false`
    /// when the task was already pending and this submission coalesced.
    pub fn submit(&self, work: Work) -> bool {
        let previous = self.pending.fetch_or(work.bit(), Ordering::AcqRel);
        if previous & work.bit() != 0 {
            return false;
        }
        self.doorbell.ring();
        true
    }

    pub fn is_pending(&self, work: Work) -> bool {
        self.pending.load(Ordering::Acquire) & work.bit() != 0
    }

    fn take_pending(&self) -> u32 {
        self.pending.swap(0, Ordering::AcqRel)
    }
}

/// Delayed work, owned by the executor. Scheduling a task that already has
/// a deadline replaces it.
#[derive(Debug)]
pub struct Timers {
    deadlines: [Option<Instant>; Work::COUNT],
    now: Instant,
}

impl Timers {
    fn new(now: Instant) -> Self {
        Self {
            deadlines: [None; Work::COUNT],
            now,
        }
    }

    /// Run `work` once `delay` has elapsed from the current cycle.
    pub fn reschedule(&mut self, work: Work, delay: Duration) {
        self.deadlines[work as usize] = Some(self.now + delay);
    }

    pub fn cancel(&mut self, work: Work) {
        self.deadlines[work as usize] = None;
    }

    pub fn deadline(&self, work: Work) -> Option<Instant> {
        self.deadlines[work as usize]
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    fn take_due(&mut self, now: Instant) -> u32 {
        let mut due = 0;
        for work in Work::ALL {
            if matches!(self.deadlines[work as usize], Some(at) if at <= now) {
                self.deadlines[work as usize] = None;
                due |= work.bit();
            }
        }
        due
    }
}

/// Something that runs deferred tasks.
pub trait Handler {
    fn handle(&mut self, work: Work, timers: &mut Timers);
}

/// The executor loop: wait, collect pending and due work, run it in order.
pub struct Executor<W> {
    queue: Arc<WorkQueue>,
    timers: Timers,
    waiter: W,
}

impl<W: Waiter> Executor<W> {
    pub fn new(queue: Arc<WorkQueue>, waiter: W) -> Self {
        Self {
            queue,
            timers: Timers::new(Instant::now()),
            waiter,
        }
    }

    pub fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    /// Run everything pending or due at `now`. Returns the number of tasks run.
    pub fn run_once<H: Handler>(&mut self, handler: &mut H, now: Instant) -> usize {
        self.timers.now = now;
        let ready = self.queue.take_pending() | self.timers.take_due(now);

        let mut ran = 0;
        for work in Work::ALL {
            if ready & work.bit() != 0 {
                handler.handle(work, &mut self.timers);
                ran += 1;
            }
        }
        ran
    }

    pub fn run<H: Handler>(&mut self, handler: &mut H) -> ! {
        log::info!("Work queue running");
        loop {
            let timeout = self
                .timers
                .next_deadline()
                .map(|at| at.saturating_duration_since(Instant::now()));
            self.waiter.wait(timeout);
            self.run_once(handler, Instant::now());
        }
    }
}
