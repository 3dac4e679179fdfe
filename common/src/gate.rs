use crate::{
    config::ActivationWindow,
    types::{GateDecision, TimeOfDay},
};

/// Whether a fetch was already dispatched in the current half-hour slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchDispatchState {
    pub dispatched_this_slot: bool,
}

impl FetchDispatchState {
    /// State after the caller has acted on `decision`. A fetch marks the slot
    /// dispatched whether it succeeded or not.
    pub fn advance(self, decision: GateDecision) -> Self {
        match decision {
            GateDecision::Fetch => Self {
                dispatched_this_slot: true,
            },
            GateDecision::ResetSlot => Self {
                dispatched_this_slot: false,
            },
            GateDecision::ForceOff | GateDecision::Idle => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationGate {
    window: ActivationWindow,
}

impl ActivationGate {
    pub fn new(window: ActivationWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> ActivationWindow {
        self.window
    }

    pub fn evaluate(&self, now: TimeOfDay, state: FetchDispatchState) -> GateDecision {
        if !self.window.contains_hour(now.hour) {
            return GateDecision::ForceOff;
        }

        match (now.is_slot_boundary(), state.dispatched_this_slot) {
            (true, false) => GateDecision::Fetch,
            (true, true) => GateDecision::Idle,
            (false, true) => GateDecision::ResetSlot,
            (false, false) => GateDecision::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ActivationGate {
        ActivationGate::new(ActivationWindow {
            start_hour: 8,
            end_hour: 20,
        })
    }

    fn at(hour: u8, minute: u8) -> TimeOfDay {
        TimeOfDay::new(hour, minute).unwrap()
    }

    const FRESH: FetchDispatchState = FetchDispatchState {
        dispatched_this_slot: false,
    };
    const DISPATCHED: FetchDispatchState = FetchDispatchState {
        dispatched_this_slot: true,
    };

    #[test]
    fn outside_window_forces_off_in_any_state() {
        for hour in (0..8).chain(20..24) {
            for minute in [0, 15, 30, 59] {
                assert_eq!(gate().evaluate(at(hour, minute), FRESH), GateDecision::ForceOff);
                assert_eq!(
                    gate().evaluate(at(hour, minute), DISPATCHED),
                    GateDecision::ForceOff
                );
            }
        }
    }

    #[test]
    fn boundary_fetches_once_then_idles() {
        assert_eq!(gate().evaluate(at(8, 0), FRESH), GateDecision::Fetch);
        assert_eq!(gate().evaluate(at(8, 0), DISPATCHED), GateDecision::Idle);
        assert_eq!(gate().evaluate(at(19, 30), FRESH), GateDecision::Fetch);
    }

    #[test]
    fn off_boundary_clears_dispatch_flag() {
        assert_eq!(gate().evaluate(at(8, 15), DISPATCHED), GateDecision::ResetSlot);
        assert_eq!(gate().evaluate(at(8, 15), FRESH), GateDecision::Idle);
    }

    #[test]
    fn repeated_boundary_ticks_fetch_once_per_slot() {
        let gate = gate();
        let mut state = FetchDispatchState::default();
        let ticks = [
            at(9, 0),
            at(9, 0),
            at(9, 0),
            at(9, 0),
            at(9, 1),
            at(9, 30),
            at(9, 30),
            at(9, 31),
            at(10, 0),
        ];

        let mut fetches = Vec::new();
        for now in ticks {
            let decision = gate.evaluate(now, state);
            if decision == GateDecision::Fetch {
                fetches.push(now);
            }
            state = state.advance(decision);
        }

        assert_eq!(fetches, vec![at(9, 0), at(9, 30), at(10, 0)]);
    }

    #[test]
    fn advance_only_moves_on_fetch_and_reset() {
        assert_eq!(FRESH.advance(GateDecision::Fetch), DISPATCHED);
        assert_eq!(DISPATCHED.advance(GateDecision::ResetSlot), FRESH);
        assert_eq!(DISPATCHED.advance(GateDecision::ForceOff), DISPATCHED);
        assert_eq!(FRESH.advance(GateDecision::Idle), FRESH);
    }
}
