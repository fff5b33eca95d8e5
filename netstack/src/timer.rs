//! Cancellable one-shot timers for the single-threaded event loop.
//!
//! [`Scheduler`] is the seam connections use to arm and cancel timers.
//! [`TimerQueue`] implements it with a deadline-ordered map.  Its clock moves
//! forward when the event loop calls [`TimerQueue::expire`], and a new timer
//! counts from the later of that clock and the wall clock, so a timer armed
//! while handling a packet is never already overdue.
//!
//! Expiry happens on the event loop between inbound events, so a timer that
//! was cancelled can never fire afterwards.
//!
//! No retransmission or keep-alive policy lives here; these are hooks only.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

pub trait Scheduler<T> {
    /// Arm a timer firing `delay` after the scheduler's current time.
    fn schedule(&mut self, delay: Duration, token: T) -> TimerHandle;

    /// Disarm `handle`.  Returns `false` if it already fired or was cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;
}

#[derive(Debug)]
pub struct TimerQueue<T> {
    now: Instant,
    next_id: u64,
    pending: BTreeMap<(Instant, TimerHandle), T>,
    deadlines: HashMap<TimerHandle, Instant>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::starting_at(Instant::now())
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue whose clock reads at least `now` until the first
    /// [`expire`](Self::expire).
    pub fn starting_at(now: Instant) -> Self {
        Self {
            now,
            next_id: 0,
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Earliest armed deadline, for the event loop to sleep until.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Advance the clock to `now` and remove every timer due by then,
    /// earliest first.  The clock never moves backwards.
    pub fn expire(&mut self, now: Instant) -> Vec<(TimerHandle, T)> {
        self.now = self.now.max(now);
        let mut fired = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            let (deadline, handle) = *entry.key();
            if deadline > self.now {
                break;
            }
            let token = entry.remove();
            self.deadlines.remove(&handle);
            fired.push((handle, token));
        }
        fired
    }
}

impl<T> Scheduler<T> for TimerQueue<T> {
    fn schedule(&mut self, delay: Duration, token: T) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.now = self.now.max(Instant::now());
        let deadline = self.now + delay;
        self.pending.insert((deadline, handle), token);
        self.deadlines.insert(handle, deadline);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.deadlines.remove(&handle) {
            Some(deadline) => self.pending.remove(&(deadline, handle)).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    /// A start far enough ahead that the wall clock never catches up with it
    /// while a test runs, which keeps deadlines exact.
    fn future() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let start = future();
        let mut q = TimerQueue::starting_at(start);
        q.schedule(30 * MS, "c");
        q.schedule(10 * MS, "a");
        q.schedule(20 * MS, "b");

        let fired: Vec<_> = q.expire(start + 25 * MS).into_iter().map(|(_, t)| t).collect();
        assert_eq!(fired, vec!["a", "b"]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_deadline(), Some(start + 30 * MS));
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let start = future();
        let mut q = TimerQueue::starting_at(start);
        q.schedule(10 * MS, ());
        assert!(q.expire(start + 9 * MS).is_empty());
        assert_eq!(q.expire(start + 10 * MS).len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let start = future();
        let mut q = TimerQueue::starting_at(start);
        let h = q.schedule(10 * MS, 1);
        q.schedule(10 * MS, 2);
        assert!(q.cancel(h));
        assert!(!q.cancel(h));

        let fired: Vec<_> = q.expire(start + 20 * MS).into_iter().map(|(_, t)| t).collect();
        assert_eq!(fired, vec![2]);
    }

    #[test]
    fn cancelling_a_fired_timer_reports_false() {
        let start = future();
        let mut q = TimerQueue::starting_at(start);
        let h = q.schedule(MS, ());
        q.expire(start + MS);
        assert!(!q.cancel(h));
    }

    #[test]
    fn schedule_is_relative_to_last_expire() {
        let start = future();
        let mut q = TimerQueue::starting_at(start);
        q.expire(start + 100 * MS);
        q.schedule(5 * MS, ());
        assert_eq!(q.next_deadline(), Some(start + 105 * MS));
    }

    #[test]
    fn clock_does_not_run_backwards() {
        let start = future();
        let mut q = TimerQueue::<()>::starting_at(start + 50 * MS);
        q.expire(start);
        assert_eq!(q.now(), start + 50 * MS);
    }

    #[test]
    fn timer_armed_after_idle_time_counts_from_the_wall_clock() {
        let mut q = TimerQueue::new();
        std::thread::sleep(40 * MS);

        let before = Instant::now();
        q.schedule(300 * MS, ());
        let deadline = q.next_deadline().unwrap();
        assert!(deadline >= before + 300 * MS);
        assert!(q.expire(before).is_empty());
        assert!(q.expire(before + 299 * MS).is_empty());
        assert_eq!(q.now(), before + 299 * MS);
    }
}
