// src/dispatcher.rs
//! Reservation accounting for one worker pool.
//!
//! A slot must claim a reservation here before it pops from the queue
//! store, and releases the claim if the pop came back empty. All counters
//! live behind one mutex, so two slots can never spend the same fairness
//! budget.
//!
//! With fair dispatch off a slot reserves up to `prefetch_multiplier`
//! jobs no matter what its peers hold, which lets one slot hoard queued
//! work while others sit idle. With fair dispatch on a slot may only claim
//! while it holds no more than the least-loaded peer: it never pulls a
//! second reservation while a peer holds none, and reservations never
//! exceed `ceil(total / slots)` per slot.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Reservation state of one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotState {
    /// Jobs reserved and not yet started.
    pub reserved: usize,
    pub executing: bool,
}

impl SlotState {
    pub fn is_idle(&self) -> bool {
        self.reserved == 0 && !self.executing
    }
}

#[derive(Debug)]
struct DispatchState {
    slots: Vec<SlotState>,
    closed: bool,
}

#[derive(Debug)]
pub struct Dispatcher {
    prefetch_multiplier: usize,
    fair: bool,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    pub fn new(slots: usize, prefetch_multiplier: usize, fair: bool) -> Self {
        Self {
            prefetch_multiplier,
            fair,
            state: Mutex::new(DispatchState {
                slots: vec![SlotState::default(); slots],
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes one reservation for `slot` if the policy allows it.
    ///
    /// A slot index outside the pool never gets a claim.
    pub fn try_claim(&self, slot: usize) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let Some(held) = state.slots.get(slot).map(|s| s.reserved) else {
            return false;
        };
        if held >= self.prefetch_multiplier {
            return false;
        }
        if self.fair {
            let least_loaded_peer = state
                .slots
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != slot)
                .map(|(_, s)| s.reserved)
                .min();
            if least_loaded_peer.is_some_and(|min| held > min) {
                return false;
            }
        }
        if let Some(s) = state.slots.get_mut(slot) {
            s.reserved += 1;
        }
        true
    }

    /// Gives back a claim that produced no job, or a job returned to the store.
    pub fn release(&self, slot: usize) {
        if let Some(s) = self.lock().slots.get_mut(slot) {
            s.reserved = s.reserved.saturating_sub(1);
        }
    }

    /// Moves one reservation of `slot` into execution.
    pub fn begin(&self, slot: usize) {
        if let Some(s) = self.lock().slots.get_mut(slot) {
            s.reserved = s.reserved.saturating_sub(1);
            s.executing = true;
        }
    }

    pub fn finish(&self, slot: usize) {
        if let Some(s) = self.lock().slots.get_mut(slot) {
            s.executing = false;
        }
    }

    /// Refuses every further claim. Used when the pool starts draining.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn snapshot(&self) -> Vec<SlotState> {
        self.lock().slots.clone()
    }

    pub fn executing(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.executing).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lets every slot in turn claim as much as it is allowed, `available`
    /// jobs in total. Returns how many were handed out.
    fn fill(dispatcher: &Dispatcher, slots: usize, mut available: usize) -> usize {
        let mut handed = 0;
        for slot in 0..slots {
            while available > 0 && dispatcher.try_claim(slot) {
                available -= 1;
                handed += 1;
            }
        }
        handed
    }

    fn reserved(dispatcher: &Dispatcher) -> Vec<usize> {
        dispatcher.snapshot().iter().map(|s| s.reserved).collect()
    }

    #[test]
    fn test_unfair_slot_hoards_up_to_prefetch() {
        let dispatcher = Dispatcher::new(3, 5, false);
        assert_eq!(fill(&dispatcher, 1, 20), 5);

        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot[0].reserved, 5);
        assert!(snapshot[1].is_idle());
        assert!(snapshot[2].is_idle());
        assert!(!dispatcher.try_claim(0));
    }

    #[test]
    fn test_fair_slot_waits_for_empty_peers() {
        let dispatcher = Dispatcher::new(3, 5, true);
        assert!(dispatcher.try_claim(0));
        // Peers hold nothing, so slot 0 may not take a second reservation.
        assert!(!dispatcher.try_claim(0));

        assert!(dispatcher.try_claim(1));
        assert!(dispatcher.try_claim(2));
        assert!(dispatcher.try_claim(0));
        assert_eq!(reserved(&dispatcher), vec![2, 1, 1]);
    }

    #[test]
    fn test_fair_spread_stays_within_ceiling() {
        for available in 1..=20 {
            let dispatcher = Dispatcher::new(3, 5, true);
            // Round-robin the slots until nobody can claim any more.
            let mut left = available;
            loop {
                let mut handed = 0;
                for slot in 0..3 {
                    if left > 0 && dispatcher.try_claim(slot) {
                        left -= 1;
                        handed += 1;
                    }
                }
                if handed == 0 {
                    break;
                }
            }

            let counts = reserved(&dispatcher);
            let total: usize = counts.iter().sum();
            let max = *counts.iter().max().unwrap();
            let min = *counts.iter().min().unwrap();
            assert!(max - min <= 1, "{counts:?}");
            assert!(max <= total.div_ceil(3), "{counts:?}");
            assert!(max <= 5);
        }
    }

    #[test]
    fn test_begin_and_finish_track_execution() {
        let dispatcher = Dispatcher::new(2, 2, false);
        assert!(dispatcher.try_claim(0));
        dispatcher.begin(0);

        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot[0], SlotState { reserved: 0, executing: true });
        assert_eq!(dispatcher.executing(), 1);

        dispatcher.finish(0);
        assert!(dispatcher.snapshot()[0].is_idle());
    }

    #[test]
    fn test_release_returns_budget() {
        let dispatcher = Dispatcher::new(1, 1, false);
        assert!(dispatcher.try_claim(0));
        assert!(!dispatcher.try_claim(0));
        dispatcher.release(0);
        assert!(dispatcher.try_claim(0));
    }

    #[test]
    fn test_closed_dispatcher_refuses_claims() {
        let dispatcher = Dispatcher::new(2, 4, true);
        dispatcher.close();
        assert!(dispatcher.is_closed());
        assert!(!dispatcher.try_claim(0));
        dispatcher.reopen();
        assert!(dispatcher.try_claim(0));
    }

    #[test]
    fn test_unknown_slot_is_ignored() {
        for fair in [false, true] {
            let dispatcher = Dispatcher::new(2, 2, fair);
            assert!(!dispatcher.try_claim(2));
            dispatcher.release(7);
            dispatcher.begin(7);
            dispatcher.finish(7);
            assert!(dispatcher.snapshot().iter().all(SlotState::is_idle));
            assert!(dispatcher.try_claim(0));
        }
    }

    #[test]
    fn test_single_slot_fair_pool_uses_full_prefetch() {
        let dispatcher = Dispatcher::new(1, 3, true);
        assert_eq!(fill(&dispatcher, 1, 10), 3);
    }

    #[test]
    fn test_concurrent_claims_never_overspend() {
        use std::sync::Arc;
        use std::thread;

        let dispatcher = Arc::new(Dispatcher::new(4, 5, false));
        let handles: Vec<_> = (0..4)
            .map(|slot| {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || (0..100).filter(|_| dispatcher.try_claim(slot)).count())
            })
            .collect();

        let claimed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(claimed, 20);
    }
}
