//! Software timer wheel driven by the display event loop
//!
//! Timers live in a generation-checked arena. Disposal only marks an entry;
//! disposed entries are swept at the start of the next due-timer pass, so a
//! callback may dispose any timer (itself included) while the pass runs.
//!
//! Ordering: within one pass, due timers run sorted by deadline, ties broken
//! by higher priority first. Callbacks are collected before the first one
//! runs, so anything a callback schedules is only seen by the next pass.

use crate::error::{PlatformError, Result};
use log::trace;
use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source, expressed as time elapsed since an epoch
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Hand-driven clock for deterministic tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Scheduling priority; a higher priority fires first when deadlines tie
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TimerPriority {
    Background,
    #[default]
    Normal,
    Input,
    Render,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: u32,
    generation: u32,
}

pub type TimerCallback<S> = Box<dyn FnMut(&mut S)>;

struct TimerEntry<S> {
    next_tick: Duration,
    interval: Duration,
    priority: TimerPriority,
    /// `None` while the callback is executing
    callback: Option<TimerCallback<S>>,
    disposed: bool,
}

struct Slot<S> {
    generation: u32,
    entry: Option<TimerEntry<S>>,
}

/// A timer taken out of the wheel for execution
pub struct DueTimer<S> {
    pub id: TimerId,
    pub priority: TimerPriority,
    callback: TimerCallback<S>,
}

impl<S> DueTimer<S> {
    pub fn fire(&mut self, state: &mut S) {
        (self.callback)(state)
    }
}

pub struct TimerWheel<S> {
    slots: Vec<Slot<S>>,
    free: Vec<u32>,
}

impl<S> Default for TimerWheel<S> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<S> TimerWheel<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a repeating timer whose first tick is `now + interval`
    pub fn insert(
        &mut self,
        now: Duration,
        interval: Duration,
        priority: TimerPriority,
        callback: TimerCallback<S>,
    ) -> Result<TimerId> {
        if interval.is_zero() {
            return Err(PlatformError::contract("timer interval must be positive"));
        }

        let entry = TimerEntry {
            next_tick: now + interval,
            interval,
            priority,
            callback: Some(callback),
            disposed: false,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };

        Ok(TimerId {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    fn entry_mut(&mut self, id: TimerId) -> Option<&mut TimerEntry<S>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Marks a timer disposed; returns false for unknown or already disposed ids
    pub fn dispose(&mut self, id: TimerId) -> bool {
        match self.entry_mut(id) {
            Some(entry) if !entry.disposed => {
                entry.disposed = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .map(|entry| !entry.disposed)
            .unwrap_or(false)
    }

    /// Number of live (not disposed) timers
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| !entry.disposed)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Earliest deadline among live timers
    pub fn next_deadline(&self) -> Option<Duration> {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| !entry.disposed && entry.callback.is_some())
            .map(|entry| entry.next_tick)
            .min()
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }

    /// Removes disposed timers that are not currently executing
    pub fn sweep(&mut self) {
        let disposed: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match &slot.entry {
                Some(entry) if entry.disposed && entry.callback.is_some() => Some(index as u32),
                _ => None,
            })
            .collect();
        for index in disposed {
            self.release(index);
        }
    }

    /// Takes every timer with `next_tick < now` out of the wheel, in firing order
    pub fn take_due(&mut self, now: Duration) -> Vec<DueTimer<S>> {
        self.sweep();

        let mut due: Vec<(Duration, Reverse<TimerPriority>, u32)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let entry = slot.entry.as_ref()?;
                (!entry.disposed && entry.callback.is_some() && entry.next_tick < now)
                    .then_some((entry.next_tick, Reverse(entry.priority), index as u32))
            })
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, _, index)| {
                let slot = &mut self.slots[index as usize];
                let generation = slot.generation;
                let entry = slot.entry.as_mut()?;
                let callback = entry.callback.take()?;
                Some(DueTimer {
                    id: TimerId { index, generation },
                    priority: entry.priority,
                    callback,
                })
            })
            .collect()
    }

    /// Returns an executed timer to the wheel, rescheduling it unless disposed
    pub fn complete(&mut self, timer: DueTimer<S>, now: Duration) {
        let id = timer.id;
        let Some(entry) = self.entry_mut(id) else {
            return;
        };

        if entry.disposed {
            self.release(id.index);
            return;
        }

        entry.next_tick += entry.interval;
        if entry.next_tick <= now {
            // Fell behind by more than an interval: skip the missed ticks
            entry.next_tick = now + entry.interval;
        }
        entry.callback = Some(timer.callback);
    }
}

/// Shared handle to the loop's timer wheel
///
/// Cloned into whatever needs to schedule work; never leaves the loop thread.
pub struct Timers<S> {
    wheel: Rc<RefCell<TimerWheel<S>>>,
    clock: Rc<dyn Clock>,
}

impl<S> Clone for Timers<S> {
    fn clone(&self) -> Self {
        Self {
            wheel: Rc::clone(&self.wheel),
            clock: Rc::clone(&self.clock),
        }
    }
}

impl<S> Timers<S> {
    pub fn new() -> Self {
        Self::with_clock(Rc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self {
            wheel: Rc::new(RefCell::new(TimerWheel::new())),
            clock,
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Starts a repeating timer; dispose it to stop
    pub fn start(
        &self,
        interval: Duration,
        priority: TimerPriority,
        callback: impl FnMut(&mut S) + 'static,
    ) -> Result<TimerId> {
        let now = self.clock.now();
        let id = self
            .wheel
            .borrow_mut()
            .insert(now, interval, priority, Box::new(callback))?;
        trace!("⏱️ Timer {:?} started: every {:?} ({:?})", id, interval, priority);
        Ok(id)
    }

    pub fn dispose(&self, id: TimerId) -> bool {
        self.wheel.borrow_mut().dispose(id)
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.wheel.borrow().is_active(id)
    }

    pub fn len(&self) -> usize {
        self.wheel.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.wheel.borrow().is_empty()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.wheel.borrow().next_deadline()
    }

    /// Time left until the earliest deadline, `None` when no timer is pending
    pub fn time_to_next(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.next_deadline()
            .map(|deadline| deadline.saturating_sub(now))
    }

    /// Runs every due timer against `state`; returns how many fired
    pub fn run_due(&self, state: &mut S) -> usize {
        let now = self.clock.now();
        let due = self.wheel.borrow_mut().take_due(now);
        let fired = due.len();

        for mut timer in due {
            timer.fire(state);
            self.wheel.borrow_mut().complete(timer, now);
        }

        fired
    }
}

impl<S> Default for Timers<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manual() -> (Rc<ManualClock>, Timers<Vec<&'static str>>) {
        let clock = Rc::new(ManualClock::default());
        let timers = Timers::with_clock(clock.clone() as Rc<dyn Clock>);
        (clock, timers)
    }

    #[test]
    fn test_zero_interval_is_a_contract_violation() {
        let (_, timers) = manual();
        let err = timers
            .start(Duration::ZERO, TimerPriority::Normal, |_| {})
            .unwrap_err();
        assert!(matches!(err, PlatformError::Contract(_)));
    }

    #[test]
    fn test_timer_is_due_only_after_deadline() {
        let (clock, timers) = manual();
        timers
            .start(Duration::from_millis(10), TimerPriority::Normal, |log| {
                log.push("tick")
            })
            .unwrap();

        let mut log = Vec::new();
        clock.set(Duration::from_millis(10));
        assert_eq!(timers.run_due(&mut log), 0);

        clock.set(Duration::from_millis(11));
        assert_eq!(timers.run_due(&mut log), 1);
        assert_eq!(log, vec!["tick"]);
        assert_eq!(timers.next_deadline(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_same_deadline_higher_priority_first() {
        let (clock, timers) = manual();
        let interval = Duration::from_millis(5);
        timers
            .start(interval, TimerPriority::Background, |log| log.push("background"))
            .unwrap();
        timers
            .start(interval, TimerPriority::Render, |log| log.push("render"))
            .unwrap();
        timers
            .start(interval, TimerPriority::Input, |log| log.push("input"))
            .unwrap();

        let mut log = Vec::new();
        clock.set(Duration::from_millis(6));
        assert_eq!(timers.run_due(&mut log), 3);
        assert_eq!(log, vec!["render", "input", "background"]);
    }

    #[test]
    fn test_earlier_deadline_beats_priority() {
        let (clock, timers) = manual();
        timers
            .start(Duration::from_millis(2), TimerPriority::Background, |log| {
                log.push("early")
            })
            .unwrap();
        timers
            .start(Duration::from_millis(4), TimerPriority::Render, |log| {
                log.push("late")
            })
            .unwrap();

        let mut log = Vec::new();
        clock.set(Duration::from_millis(5));
        timers.run_due(&mut log);
        assert_eq!(log, vec!["early", "late"]);
    }

    #[test]
    fn test_no_catch_up_burst_after_stall() {
        let (clock, timers) = manual();
        timers
            .start(Duration::from_millis(10), TimerPriority::Normal, |log| {
                log.push("tick")
            })
            .unwrap();

        let mut log = Vec::new();
        clock.set(Duration::from_millis(500));
        assert_eq!(timers.run_due(&mut log), 1);
        assert_eq!(timers.run_due(&mut log), 0);
        assert_eq!(timers.next_deadline(), Some(Duration::from_millis(510)));
    }

    #[test]
    fn test_dispose_inside_own_callback() {
        let clock = Rc::new(ManualClock::default());
        let timers: Timers<(Vec<u32>, Option<TimerId>)> =
            Timers::with_clock(clock.clone() as Rc<dyn Clock>);
        let handle = timers.clone();
        let id = timers
            .start(Duration::from_millis(1), TimerPriority::Normal, move |state| {
                state.0.push(1);
                if let Some(id) = state.1 {
                    handle.dispose(id);
                }
            })
            .unwrap();

        let mut state = (Vec::new(), Some(id));
        clock.set(Duration::from_millis(2));
        timers.run_due(&mut state);
        clock.set(Duration::from_millis(10));
        timers.run_due(&mut state);

        assert_eq!(state.0, vec![1]);
        assert!(!timers.is_active(id));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_timer_started_in_callback_waits_for_next_pass() {
        let clock = Rc::new(ManualClock::default());
        let timers: Timers<Vec<&'static str>> = Timers::with_clock(clock.clone() as Rc<dyn Clock>);
        let handle = timers.clone();
        let clock_in_callback = clock.clone();
        timers
            .start(Duration::from_millis(1), TimerPriority::Normal, move |log| {
                log.push("outer");
                if log.len() == 1 {
                    // Already overdue by the time the pass could see it
                    clock_in_callback.advance(Duration::from_millis(50));
                    handle
                        .start(Duration::from_millis(1), TimerPriority::Render, |log| {
                            log.push("inner")
                        })
                        .unwrap();
                }
            })
            .unwrap();

        let mut log = Vec::new();
        clock.set(Duration::from_millis(2));
        assert_eq!(timers.run_due(&mut log), 1);
        assert_eq!(log, vec!["outer"]);

        timers.run_due(&mut log);
        assert!(log.contains(&"inner"));
    }

    #[test]
    fn test_disposed_ids_are_not_reused() {
        let (_, timers) = manual();
        let first = timers
            .start(Duration::from_millis(1), TimerPriority::Normal, |_| {})
            .unwrap();
        assert!(timers.dispose(first));
        assert!(!timers.dispose(first));

        // Sweep happens on the next pass
        timers.run_due(&mut Vec::new());
        let second = timers
            .start(Duration::from_millis(1), TimerPriority::Normal, |_| {})
            .unwrap();
        assert_ne!(first, second);
        assert!(!timers.is_active(first));
        assert!(timers.is_active(second));
    }

    proptest! {
        #[test]
        fn prop_due_timers_fire_once_in_deadline_priority_order(
            specs in proptest::collection::vec((1u64..50, 0u8..4), 1..24)
        ) {
            let clock = Rc::new(ManualClock::default());
            let timers: Timers<Vec<usize>> = Timers::with_clock(clock.clone() as Rc<dyn Clock>);
            let priorities = [
                TimerPriority::Background,
                TimerPriority::Normal,
                TimerPriority::Input,
                TimerPriority::Render,
            ];
            for (index, (interval, priority)) in specs.iter().enumerate() {
                timers
                    .start(Duration::from_millis(*interval), priorities[*priority as usize], move |log| {
                        log.push(index)
                    })
                    .unwrap();
            }

            let mut fired = Vec::new();
            clock.set(Duration::from_millis(60));
            let count = timers.run_due(&mut fired);

            prop_assert_eq!(count, specs.len());
            let mut expected: Vec<usize> = (0..specs.len()).collect();
            expected.sort_by_key(|&i| (specs[i].0, Reverse(specs[i].1), i));
            prop_assert_eq!(fired, expected);
        }
    }
}
