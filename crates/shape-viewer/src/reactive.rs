//! Observable values and coalescing (debounced) subscriptions.
//!
//! An [`Observable`] bumps a version on every write. A
//! [`CoalescingSubscription`] notices a new version when polled, waits for a
//! quiet period in which no further version appears, and then fires once.
//! Time comes from a [`Clock`] so tests can step it by hand.

use std::cell::Cell;
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Observable<T> {
    value: T,
    version: u64,
}

impl<T> Observable<T> {
    pub fn new(value: T) -> Self {
        Self { value, version: 0 }
    }

    #[inline]
    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.version += 1;
    }

    /// Mutates in place; counts as one write.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let r = f(&mut self.value);
        self.version += 1;
        r
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone)]
pub struct CoalescingSubscription {
    quiet: Duration,
    seen_version: u64,
    deadline: Option<Instant>,
}

impl CoalescingSubscription {
    /// Subscribes to future writes of `observable`; the current value is
    /// treated as already delivered.
    pub fn watching<T>(observable: &Observable<T>, quiet: Duration) -> Self {
        Self {
            quiet,
            seen_version: observable.version(),
            deadline: None,
        }
    }

    /// Returns `true` exactly once per burst of writes, after `quiet` has
    /// elapsed since the last write was observed.
    pub fn poll<T>(&mut self, observable: &Observable<T>, now: Instant) -> bool {
        if observable.version() != self.seen_version {
            self.seen_version = observable.version();
            self.deadline = Some(now + self.quiet);
            return false;
        }
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Drops a pending notification.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
