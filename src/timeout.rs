//! Cycle-counted timers.
//!
//! There is no wall clock here.  A timer counts calls to
//! [`TimeoutPool::increment_counter()`], which its owner makes once per
//! cycle.  Timers come from a fixed pool of [`TIMEOUT_MAX_INSTANCES`] slots.
//! Handles carry a generation, so a handle to a destroyed timer is rejected
//! even after its slot has been reused.
//!
//! Expiry is single shot: the [`TimeoutPool::check_expire()`] call which
//! observes the expiry also stops the timer.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Number of timers in a pool
pub const TIMEOUT_MAX_INSTANCES: usize = 5;

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    Stopped,
    Running,
    Expired,
}

/// Handle to a timer in a [`TimeoutPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutHandle {
    index: u8,
    generation: u16,
}

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    generation: u16,
    used: bool,
    enabled: bool,
    limit: u16,
    count: u16,
}

impl Slot {
    const EMPTY: Slot = Slot {
        generation: 0,
        used: false,
        enabled: false,
        limit: 0,
        count: 0,
    };
}

/// Fixed pool of timers
#[derive(Debug, Clone)]
pub struct TimeoutPool {
    slots: [Slot; TIMEOUT_MAX_INSTANCES],
}

impl TimeoutPool {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; TIMEOUT_MAX_INSTANCES],
        }
    }

    /// Create a stopped timer which expires once it has counted more than
    /// `cycle_limit` cycles.
    ///
    /// Returns `None` if the pool is exhausted.
    pub fn create(&mut self, cycle_limit: u16) -> Option<TimeoutHandle> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.used)?;

        *slot = Slot {
            generation: slot.generation.wrapping_add(1),
            used: true,
            enabled: false,
            limit: cycle_limit,
            count: 0,
        };

        debug!("Created timeout {index} limit {cycle_limit} cycles");

        Some(TimeoutHandle {
            index: index as u8,
            generation: slot.generation,
        })
    }

    /// Release the timer's slot
    pub fn destroy(&mut self, handle: TimeoutHandle) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        let generation = slot.generation;
        *slot = Slot {
            generation,
            ..Slot::EMPTY
        };
        debug!("Destroyed timeout {}", handle.index);
        Ok(())
    }

    /// Start counting from zero
    pub fn start_timer(&mut self, handle: TimeoutHandle) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        slot.count = 0;
        slot.enabled = true;
        Ok(())
    }

    pub fn stop_timer(&mut self, handle: TimeoutHandle) -> Result<()> {
        self.slot_mut(handle)?.enabled = false;
        Ok(())
    }

    /// Count one cycle.  Does nothing while the timer is stopped.
    pub fn increment_counter(&mut self, handle: TimeoutHandle) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        if slot.enabled {
            slot.count = slot.count.saturating_add(1);
        }
        Ok(())
    }

    /// Check for expiry.  An expired timer is stopped by this call, so a
    /// second call reports [`TimeoutState::Stopped`].
    pub fn check_expire(&mut self, handle: TimeoutHandle) -> Result<TimeoutState> {
        let slot = self.slot_mut(handle)?;
        if !slot.enabled {
            Ok(TimeoutState::Stopped)
        } else if slot.count > slot.limit {
            slot.enabled = false;
            Ok(TimeoutState::Expired)
        } else {
            Ok(TimeoutState::Running)
        }
    }

    /// Whether the timer is counting.  Never reports expiry.
    pub fn is_running(&self, handle: TimeoutHandle) -> Result<TimeoutState> {
        if self.slot(handle)?.enabled {
            Ok(TimeoutState::Running)
        } else {
            Ok(TimeoutState::Stopped)
        }
    }

    /// Number of timers that can still be created
    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.used).count()
    }

    fn slot(&self, handle: TimeoutHandle) -> Result<&Slot> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.used && slot.generation == handle.generation => Ok(slot),
            _ => Err(Error::InvalidHandle),
        }
    }

    fn slot_mut(&mut self, handle: TimeoutHandle) -> Result<&mut Slot> {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.used && slot.generation == handle.generation => Ok(slot),
            _ => Err(Error::InvalidHandle),
        }
    }
}

impl Default for TimeoutPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_single_shot() {
        const LIMIT: u16 = 3;
        let mut pool = TimeoutPool::new();
        let timer = pool.create(LIMIT).unwrap();
        pool.start_timer(timer).unwrap();

        for _ in 0..LIMIT {
            pool.increment_counter(timer).unwrap();
        }
        assert_eq!(pool.check_expire(timer), Ok(TimeoutState::Running));

        pool.increment_counter(timer).unwrap();
        assert_eq!(pool.check_expire(timer), Ok(TimeoutState::Expired));
        assert_eq!(pool.check_expire(timer), Ok(TimeoutState::Stopped));
        assert_eq!(pool.is_running(timer), Ok(TimeoutState::Stopped));
    }

    #[test]
    fn stopped_timer_does_not_count() {
        let mut pool = TimeoutPool::new();
        let timer = pool.create(0).unwrap();
        assert_eq!(pool.is_running(timer), Ok(TimeoutState::Stopped));

        pool.increment_counter(timer).unwrap();
        pool.start_timer(timer).unwrap();
        assert_eq!(pool.check_expire(timer), Ok(TimeoutState::Running));
        assert_eq!(pool.is_running(timer), Ok(TimeoutState::Running));

        pool.stop_timer(timer).unwrap();
        pool.increment_counter(timer).unwrap();
        assert_eq!(pool.check_expire(timer), Ok(TimeoutState::Stopped));

        // Restart counts from zero again
        pool.start_timer(timer).unwrap();
        pool.increment_counter(timer).unwrap();
        assert_eq!(pool.check_expire(timer), Ok(TimeoutState::Expired));
    }

    #[test]
    fn pool_exhaustion() {
        let mut pool = TimeoutPool::new();
        let timers: [TimeoutHandle; TIMEOUT_MAX_INSTANCES] =
            core::array::from_fn(|i| pool.create(i as u16 + 10).unwrap());
        assert_eq!(pool.free_slots(), 0);
        assert_eq!(pool.create(1), None);

        // Existing timers are untouched
        pool.start_timer(timers[0]).unwrap();
        for _ in 0..=10 {
            pool.increment_counter(timers[0]).unwrap();
        }
        assert_eq!(pool.check_expire(timers[0]), Ok(TimeoutState::Expired));
        assert_eq!(pool.is_running(timers[4]), Ok(TimeoutState::Stopped));

        pool.destroy(timers[2]).unwrap();
        assert_eq!(pool.free_slots(), 1);
        assert!(pool.create(1).is_some());
    }

    #[test]
    fn stale_handle_rejected() {
        let mut pool = TimeoutPool::new();
        let old = pool.create(5).unwrap();
        pool.destroy(old).unwrap();
        let new = pool.create(5).unwrap();

        assert_ne!(old, new);
        assert_eq!(pool.start_timer(old), Err(Error::InvalidHandle));
        assert_eq!(pool.destroy(old), Err(Error::InvalidHandle));
        assert_eq!(pool.start_timer(new), Ok(()));
    }
}
