//! Cooperative timer wheel for the single-threaded event loop (§5).
//! Timers carry heap-owned state and are cancelled by removing them from
//! the wheel; there is no other cancellation primitive.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Entry<T> {
    id: TimerId,
    deadline: Instant,
    interval: Duration,
    repeat: bool,
    state: T,
}

/// A minimal repeating-timer wheel. Not interval-precise under heavy
/// load; callers that need a hard retry budget (token-attach: 10 ticks)
/// track that budget in their own state, not in the wheel.
pub struct TimerWheel<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        TimerWheel { next_id: 0, entries: Vec::new() }
    }
}

impl<T> TimerWheel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, interval: Duration, repeat: bool, state: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, deadline: Instant::now() + interval, interval, repeat, state });
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos).state)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Drains every timer whose deadline has passed, calling `f` with
    /// `(id, &mut state)`. Repeating timers are rearmed; `f` returning
    /// `false` cancels the timer regardless of its repeat flag.
    pub fn fire_due<F>(&mut self, mut f: F)
    where
        F: FnMut(TimerId, &mut T) -> bool,
    {
        let now = Instant::now();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].deadline > now {
                i += 1;
                continue;
            }
            let keep_going = f(self.entries[i].id, &mut self.entries[i].state);
            if keep_going && self.entries[i].repeat {
                self.entries[i].deadline = now + self.entries[i].interval;
                i += 1;
            } else {
                self.entries.remove(i);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
