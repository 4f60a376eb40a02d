//! Chipset-wide event scheduler.
//!
//! A table of at-most-one-pending-event-per-slot with tier-gated sentinel
//! wakeups, generalized from a fixed per-cycle step sequence into a genuine
//! ordered "next trigger" table so unrelated subsystems can each own a slot
//! without polling each other.

use log::trace;

/// Master cycle with no pending event.
pub const NEVER: u64 = u64::MAX;

/// Compile-time slot enumeration.
///
/// Order is load-bearing: on a trigger tie, the lower-indexed slot fires
/// first. `Reg` is numerically first so queued register writes apply before
/// same-cycle DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum Slot {
    Reg = 0,
    CiaA,
    CiaB,
    Bitplane,
    Das,
    Copper,
    Blitter,
    Vbl,
    SecSentinel,
    TerSentinel,
    Alarm,
    Inspection,
}

impl Slot {
    pub const COUNT: usize = Slot::Inspection as usize + 1;

    const ALL: [Slot; Slot::COUNT] = [
        Slot::Reg,
        Slot::CiaA,
        Slot::CiaB,
        Slot::Bitplane,
        Slot::Das,
        Slot::Copper,
        Slot::Blitter,
        Slot::Vbl,
        Slot::SecSentinel,
        Slot::TerSentinel,
        Slot::Alarm,
        Slot::Inspection,
    ];
}

/// Priority tier a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Secondary,
    Tertiary,
}

fn tier_of(slot: Slot) -> Tier {
    match slot {
        Slot::Reg | Slot::Bitplane | Slot::Das | Slot::Copper | Slot::Blitter | Slot::Vbl
        | Slot::SecSentinel | Slot::TerSentinel => Tier::Primary,
        Slot::CiaA | Slot::CiaB => Tier::Secondary,
        Slot::Alarm | Slot::Inspection => Tier::Tertiary,
    }
}

/// One pending event in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub trigger: u64,
    pub id: u32,
    pub payload: u64,
}

impl Event {
    const INACTIVE: Event = Event { trigger: NEVER, id: 0, payload: 0 };
}

/// Fired event handed to a caller-supplied handler by `dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub slot: Slot,
    pub id: u32,
    pub payload: u64,
    pub cycle: u64,
}

/// The scheduler: one table of at-most-one-pending-event-per-slot, plus the
/// running master clock.
#[derive(Debug, Clone)]
pub struct Scheduler {
    clock: u64,
    slots: [Event; Slot::COUNT],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: 0,
            slots: [Event::INACTIVE; Slot::COUNT],
        }
    }

    #[must_use]
    pub fn current_cycle(&self) -> u64 {
        self.clock
    }

    #[must_use]
    pub fn has_event(&self, slot: Slot) -> bool {
        self.slots[slot as usize].trigger != NEVER
    }

    #[must_use]
    pub fn trigger_of(&self, slot: Slot) -> u64 {
        self.slots[slot as usize].trigger
    }

    pub fn cancel(&mut self, slot: Slot) {
        self.slots[slot as usize] = Event::INACTIVE;
    }

    fn set(&mut self, slot: Slot, trigger: u64, id: u32, payload: u64) {
        self.slots[slot as usize] = Event { trigger, id, payload };
        self.maintain_sentinel(slot);
    }

    /// absolute: trigger = given master cycle.
    pub fn schedule_abs(&mut self, slot: Slot, cycle: u64, id: u32, payload: u64) {
        self.set(slot, cycle, id, payload);
    }

    /// relative: trigger = current clock + delta.
    pub fn schedule_rel(&mut self, slot: Slot, delta: u64, id: u32, payload: u64) {
        self.set(slot, self.clock + delta, id, payload);
    }

    /// incremental: trigger = current slot's trigger + delta.
    pub fn schedule_inc(&mut self, slot: Slot, delta: u64, id: u32, payload: u64) {
        let base = self.slots[slot as usize].trigger;
        let base = if base == NEVER { self.clock } else { base };
        self.set(slot, base + delta, id, payload);
    }

    /// immediate: trigger = next DMA cycle boundary >= current clock.
    pub fn schedule_imm(&mut self, slot: Slot, id: u32, payload: u64) {
        let boundary = self.clock.div_ceil(8) * 8;
        self.set(slot, boundary, id, payload);
    }

    /// positional: trigger = master cycle corresponding to a beam position.
    /// The caller computes the absolute cycle via `Beam::cycles_until` and
    /// passes it here as `cycle`; no beam logic lives in the scheduler.
    pub fn schedule_pos(&mut self, slot: Slot, cycle: u64, id: u32, payload: u64) {
        self.set(slot, cycle, id, payload);
    }

    /// Ensure `SecSentinel`/`TerSentinel` hold a wakeup <= the minimum
    /// trigger among active slots of that tier.
    fn maintain_sentinel(&mut self, just_set: Slot) {
        match tier_of(just_set) {
            Tier::Secondary => {
                let min = self.min_trigger_in_tier(Tier::Secondary);
                let cur = self.slots[Slot::SecSentinel as usize].trigger;
                if min < cur {
                    self.slots[Slot::SecSentinel as usize] =
                        Event { trigger: min, id: 0, payload: 0 };
                }
            }
            Tier::Tertiary => {
                let min = self.min_trigger_in_tier(Tier::Tertiary);
                let cur = self.slots[Slot::TerSentinel as usize].trigger;
                if min < cur {
                    self.slots[Slot::TerSentinel as usize] =
                        Event { trigger: min, id: 0, payload: 0 };
                }
            }
            Tier::Primary => {}
        }
    }

    fn min_trigger_in_tier(&self, tier: Tier) -> u64 {
        Slot::ALL
            .iter()
            .filter(|s| tier_of(**s) == tier)
            .map(|s| self.slots[*s as usize].trigger)
            .min()
            .unwrap_or(NEVER)
    }

    /// Find the lowest-indexed slot with the smallest trigger (ties broken
    /// by slot index).
    fn next_due(&self) -> Option<(Slot, u64)> {
        let mut best: Option<(Slot, u64)> = None;
        for &slot in &Slot::ALL {
            let trigger = self.slots[slot as usize].trigger;
            if trigger == NEVER {
                continue;
            }
            match best {
                None => best = Some((slot, trigger)),
                Some((_, best_trigger)) if trigger < best_trigger => best = Some((slot, trigger)),
                _ => {}
            }
        }
        best
    }

    /// Dispatch due events up to `target`, invoking `handler` for each.
    /// The handler is responsible for rescheduling its own slot if the
    /// event recurs; a handler that does not reschedule leaves the slot
    /// inactive (cancelled) after this call processes it.
    pub fn dispatch(&mut self, target: u64, mut handler: impl FnMut(&mut Scheduler, Fired)) {
        loop {
            let Some((slot, trigger)) = self.next_due() else { break };
            if trigger > target {
                break;
            }
            self.clock = trigger;
            let fired = Fired {
                slot,
                id: self.slots[slot as usize].id,
                payload: self.slots[slot as usize].payload,
                cycle: trigger,
            };
            // Clear before invoking so a handler that reschedules wins, and
            // one that doesn't leaves the slot genuinely inactive.
            self.slots[slot as usize] = Event::INACTIVE;
            trace!("scheduler: fire {slot:?} id={} at cycle {trigger}", fired.id);
            handler(self, fired);
        }
    }

    /// Advance the clock to `target` with no event dispatch, for callers
    /// (e.g. the CPU) that only need to know they may run freely until the
    /// next event trigger.
    pub fn advance_to(&mut self, target: u64) {
        if target > self.clock {
            self.clock = target;
        }
    }

    /// The next cycle at which *some* primary-tier event is due, or `NEVER`.
    /// The CPU's `run_until` yields control back to the scheduler no later
    /// than this.
    #[must_use]
    pub fn next_primary_trigger(&self) -> u64 {
        Slot::ALL
            .iter()
            .filter(|s| tier_of(**s) == Tier::Primary)
            .map(|s| self.slots[*s as usize].trigger)
            .min()
            .unwrap_or(NEVER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_fire_in_slot_index_order() {
        let mut sched = Scheduler::new();
        sched.schedule_abs(Slot::Blitter, 100, 1, 0);
        sched.schedule_abs(Slot::Reg, 100, 2, 0);
        let mut order = Vec::new();
        sched.dispatch(100, |_, fired| order.push(fired.slot));
        assert_eq!(order, vec![Slot::Reg, Slot::Blitter]);
    }

    #[test]
    fn dispatch_stops_strictly_before_target_overrun() {
        let mut sched = Scheduler::new();
        sched.schedule_abs(Slot::Vbl, 50, 7, 0);
        let mut fires = 0;
        sched.dispatch(49, |_, _| fires += 1);
        assert_eq!(fires, 0);
        assert_eq!(sched.current_cycle(), 0);
        sched.dispatch(50, |_, _| fires += 1);
        assert_eq!(fires, 1);
        assert_eq!(sched.current_cycle(), 50);
    }

    #[test]
    fn secondary_sentinel_tracks_minimum_secondary_trigger() {
        let mut sched = Scheduler::new();
        sched.schedule_abs(Slot::CiaA, 200, 1, 0);
        sched.schedule_abs(Slot::CiaB, 150, 2, 0);
        assert_eq!(sched.trigger_of(Slot::SecSentinel), 150);
    }

    #[test]
    fn cancel_clears_trigger_and_payload() {
        let mut sched = Scheduler::new();
        sched.schedule_abs(Slot::Copper, 10, 5, 99);
        assert!(sched.has_event(Slot::Copper));
        sched.cancel(Slot::Copper);
        assert!(!sched.has_event(Slot::Copper));
    }

    #[test]
    fn incremental_schedule_bases_off_current_trigger_not_clock() {
        let mut sched = Scheduler::new();
        sched.schedule_abs(Slot::Alarm, 500, 1, 0);
        sched.schedule_inc(Slot::Alarm, 20, 1, 0);
        assert_eq!(sched.trigger_of(Slot::Alarm), 520);
    }

    #[test]
    fn a_handler_that_does_not_reschedule_leaves_slot_inactive() {
        let mut sched = Scheduler::new();
        sched.schedule_abs(Slot::Vbl, 10, 1, 0);
        sched.dispatch(10, |_, _| {});
        assert!(!sched.has_event(Slot::Vbl));
    }
}
