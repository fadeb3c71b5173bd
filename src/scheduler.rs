//! Cycle-indexed event scheduler.
//!
//! A ring of callback buckets indexed by cycle count modulo the ring size.
//! `schedule` files a callback `delay` cycles into the future;
//! `invoke_pending` advances the ring cursor to the current cycle total and
//! drains every bucket passed over, wrapping around the ring. A counter of
//! outstanding events keeps the common empty case free.
//!
//! Delays are bounded by the ring size; a delay of zero does not work,
//! call the function directly instead.

use crate::cpu::ArmCore;

/// Number of buckets in the ring, and therefore the maximum usable delay.
pub const EVENT_LIST_SIZE: u64 = 128;

type EventFn = Box<dyn FnMut(&mut ArmCore)>;

/// The event ring.
pub struct Scheduler {
    buckets: Vec<Vec<EventFn>>,
    /// Ring cursor: the last drained position.
    now: u64,
    /// Outstanding events across all buckets.
    event_count: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            buckets: (0..EVENT_LIST_SIZE).map(|_| Vec::new()).collect(),
            now: 0,
            event_count: 0,
        }
    }

    /// Drop every scheduled event and rewind the cursor.
    pub fn reset(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.now = 0;
        self.event_count = 0;
    }

    /// Number of callbacks waiting to fire.
    pub fn pending(&self) -> usize {
        self.event_count
    }

    /// File `callback` to run once `delay` cycles have elapsed past the
    /// current cycle total `time`.
    pub fn schedule(&mut self, time: u64, delay: u64, callback: EventFn) {
        if self.event_count == 0 {
            self.now = time % EVENT_LIST_SIZE;
        }
        let when = ((time + delay) % EVENT_LIST_SIZE) as usize;
        self.buckets[when].push(callback);
        self.event_count += 1;
    }

    /// Drain every bucket between the previous cursor position and the
    /// current cycle total, wrapping around the ring.
    pub fn invoke_pending(&mut self, time: u64, core: &mut ArmCore) {
        if self.event_count == 0 {
            return;
        }
        let then = self.now;
        let now = time % EVENT_LIST_SIZE;
        self.now = now;
        if then < now {
            self.invoke_range(then + 1, now, core);
        } else if then > now {
            self.invoke_range(then + 1, EVENT_LIST_SIZE - 1, core);
            self.invoke_range(0, now, core);
        }
    }

    fn invoke_range(&mut self, from: u64, to: u64, core: &mut ArmCore) {
        for slot in from..=to {
            if self.buckets[slot as usize].is_empty() {
                continue;
            }
            let mut pending = std::mem::take(&mut self.buckets[slot as usize]);
            self.event_count -= pending.len();
            for callback in &mut pending {
                callback(core);
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counter_event(hits: &Rc<Cell<u32>>) -> EventFn {
        let hits = Rc::clone(hits);
        Box::new(move |_core| hits.set(hits.get() + 1))
    }

    #[test]
    fn test_empty_scheduler_is_free() {
        let mut sched = Scheduler::new();
        let mut core = ArmCore::new();
        sched.invoke_pending(1000, &mut core);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_event_fires_after_delay() {
        let mut sched = Scheduler::new();
        let mut core = ArmCore::new();
        let hits = Rc::new(Cell::new(0));

        sched.schedule(0, 10, counter_event(&hits));
        sched.invoke_pending(5, &mut core);
        assert_eq!(hits.get(), 0);
        sched.invoke_pending(10, &mut core);
        assert_eq!(hits.get(), 1);
        assert_eq!(sched.pending(), 0);

        // Firing is one-shot.
        sched.invoke_pending(20, &mut core);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_ring_wraparound() {
        let mut sched = Scheduler::new();
        let mut core = ArmCore::new();
        let hits = Rc::new(Cell::new(0));

        // Start near the end of the ring so the drain has to wrap.
        let start = EVENT_LIST_SIZE - 4;
        sched.schedule(start, 8, counter_event(&hits));
        sched.invoke_pending(start + 8, &mut core);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_multiple_events_same_bucket() {
        let mut sched = Scheduler::new();
        let mut core = ArmCore::new();
        let hits = Rc::new(Cell::new(0));

        sched.schedule(0, 3, counter_event(&hits));
        sched.schedule(0, 3, counter_event(&hits));
        sched.schedule(0, 7, counter_event(&hits));
        assert_eq!(sched.pending(), 3);
        sched.invoke_pending(7, &mut core);
        assert_eq!(hits.get(), 3);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_event_can_touch_core() {
        let mut sched = Scheduler::new();
        let mut core = ArmCore::new();
        sched.schedule(0, 1, Box::new(|core: &mut ArmCore| core.regs[0] = 0x42));
        sched.invoke_pending(1, &mut core);
        assert_eq!(core.regs[0], 0x42);
    }
}
