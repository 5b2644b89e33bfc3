//! Clock-driven callbacks for latent nodes.
//!
//! A node that has to wait arms a timer and returns without finishing. The
//! subsystem advances the clock once per tick and hands every due timer back
//! to its owning node.

use crate::{InstanceId, NodeAddress};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct TimerEntry {
    owner: NodeAddress,
    started_at: f64,
    fire_at: f64,
    interval: f64,
    looping: bool,
    /// Tick during which the timer was armed or last fired.
    armed_tick: u64,
}

#[derive(Debug, Default)]
pub struct TimerManager {
    now: f64,
    tick: u64,
    next_handle: u64,
    timers: HashMap<TimerHandle, TimerEntry>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds since the manager was created.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Arm a timer firing `seconds` from now. Looping timers re-arm with the same interval.
    pub fn set_timer(&mut self, owner: NodeAddress, seconds: f64, looping: bool) -> TimerHandle {
        self.set_timer_with_delay(owner, seconds, seconds, looping)
    }

    /// Like [`set_timer`](Self::set_timer) but the first firing happens after `first_delay`.
    pub fn set_timer_with_delay(
        &mut self,
        owner: NodeAddress,
        first_delay: f64,
        interval: f64,
        looping: bool,
    ) -> TimerHandle {
        let handle = self.next();
        self.timers.insert(
            handle,
            TimerEntry {
                owner,
                started_at: self.now,
                fire_at: self.now + first_delay.max(0.0),
                interval: interval.max(0.0),
                looping: looping && interval > 0.0,
                armed_tick: self.tick,
            },
        );
        handle
    }

    /// Arm a one-shot timer that fires on the next call to [`advance`](Self::advance).
    pub fn set_timer_for_next_tick(&mut self, owner: NodeAddress) -> TimerHandle {
        self.set_timer(owner, 0.0, false)
    }

    pub fn clear(&mut self, handle: TimerHandle) -> bool {
        self.timers.remove(&handle).is_some()
    }

    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }

    pub fn remaining(&self, handle: TimerHandle) -> Option<f64> {
        self.timers.get(&handle).map(|t| (t.fire_at - self.now).max(0.0))
    }

    /// Time since the timer was armed, or since its last firing for looping timers.
    pub fn elapsed(&self, handle: TimerHandle) -> Option<f64> {
        self.timers.get(&handle).map(|t| self.now - t.started_at)
    }

    pub fn owner(&self, handle: TimerHandle) -> Option<NodeAddress> {
        self.timers.get(&handle).map(|t| t.owner)
    }

    pub fn clear_node(&mut self, owner: NodeAddress) {
        self.timers.retain(|_, t| t.owner != owner);
    }

    pub fn clear_instance(&mut self, instance: InstanceId) {
        self.timers.retain(|_, t| t.owner.instance != instance);
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Move the clock forward and open a new tick.
    pub fn advance(&mut self, delta_seconds: f64) {
        self.now += delta_seconds.max(0.0);
        self.tick += 1;
    }

    /// Take the earliest due timer of the current tick.
    ///
    /// Timers armed during the current tick are not due until the next one, and
    /// a looping timer fires at most once per tick.
    pub fn pop_due(&mut self) -> Option<(TimerHandle, NodeAddress)> {
        let (handle, _) = self
            .timers
            .iter()
            .filter(|(_, t)| t.armed_tick < self.tick && t.fire_at <= self.now)
            .min_by(|(ha, a), (hb, b)| a.fire_at.total_cmp(&b.fire_at).then(ha.cmp(hb)))?;
        let handle = *handle;

        let entry = self.timers.get_mut(&handle)?;
        let owner = entry.owner;
        if entry.looping {
            entry.started_at = entry.fire_at;
            entry.fire_at += entry.interval;
            entry.armed_tick = self.tick;
        } else {
            self.timers.remove(&handle);
        }
        Some((handle, owner))
    }

    fn next(&mut self) -> TimerHandle {
        self.next_handle += 1;
        TimerHandle(self.next_handle)
    }
}
