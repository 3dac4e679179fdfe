use crate::{
    config::LightingConfig,
    duty::DutyMapper,
    error::CollaboratorError,
    gate::{ActivationGate, FetchDispatchState},
    telemetry::TelemetrySample,
    types::{
        CoverageSample, DisplayFrame, DutyValue, EngineCounters, GateDecision, LightingStatus,
        TimeOfDay,
    },
};

/// All control state that survives across ticks. Owned by exactly one
/// control loop; nothing here touches a collaborator.
#[derive(Debug, Clone)]
pub struct LightingEngine {
    gate: ActivationGate,
    mapper: DutyMapper,

    dispatch: FetchDispatchState,
    last_reading: Option<CoverageSample>,
    duty: DutyValue,
    commanded: DutyValue,
    last_decision: Option<GateDecision>,

    counters: EngineCounters,
}

impl LightingEngine {
    pub fn new(config: &LightingConfig) -> Self {
        Self {
            gate: ActivationGate::new(config.window),
            mapper: DutyMapper::new(config.duty),
            dispatch: FetchDispatchState::default(),
            last_reading: None,
            duty: DutyValue::OFF,
            commanded: DutyValue::OFF,
            last_decision: None,
            counters: EngineCounters::default(),
        }
    }

    pub fn dispatch_state(&self) -> FetchDispatchState {
        self.dispatch
    }

    pub fn last_reading(&self) -> Option<CoverageSample> {
        self.last_reading
    }

    /// Duty derived from the last successful fetch.
    pub fn duty(&self) -> DutyValue {
        self.duty
    }

    /// Duty most recently written to the actuator.
    pub fn commanded(&self) -> DutyValue {
        self.commanded
    }

    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    pub fn decide(&mut self, now: TimeOfDay) -> GateDecision {
        self.counters.ticks = self.counters.ticks.saturating_add(1);
        let decision = self.gate.evaluate(now, self.dispatch);
        self.last_decision = Some(decision);
        decision
    }

    /// Applies the outcome of a gated fetch. The slot counts as dispatched
    /// either way so a failing API is not retried until the next boundary.
    pub fn record_fetch(&mut self, result: &Result<CoverageSample, CollaboratorError>) {
        self.absorb_reading(result);
        self.dispatch = self.dispatch.advance(GateDecision::Fetch);
    }

    /// Applies the outcome of the power-up fetch, which sits outside slot
    /// accounting.
    pub fn record_bootstrap(&mut self, result: &Result<CoverageSample, CollaboratorError>) {
        self.absorb_reading(result);
    }

    pub fn reset_slot(&mut self) {
        self.dispatch = self.dispatch.advance(GateDecision::ResetSlot);
    }

    /// Duty to write for `decision`, or `None` when the actuator is left alone.
    pub fn duty_for(&self, decision: GateDecision) -> Option<DutyValue> {
        match decision {
            GateDecision::ForceOff => Some(DutyValue::OFF),
            GateDecision::Fetch | GateDecision::Idle => Some(self.duty),
            GateDecision::ResetSlot => None,
        }
    }

    pub fn record_commanded(&mut self, duty: DutyValue) {
        self.commanded = duty;
    }

    pub fn record_clock_failure(&mut self) {
        self.counters.clock_failures = self.counters.clock_failures.saturating_add(1);
    }

    pub fn record_publish_failure(&mut self) {
        self.counters.publish_failures = self.counters.publish_failures.saturating_add(1);
    }

    pub fn telemetry_sample(&self, device_tag: &str, network_tag: &str) -> TelemetrySample {
        TelemetrySample::new(self.commanded, self.last_reading, device_tag, network_tag)
    }

    pub fn display_frame(&self, now: TimeOfDay) -> DisplayFrame {
        DisplayFrame {
            current_time: now.display(),
            duty: self.commanded.raw(),
            coverage_percent: self.last_reading.map(CoverageSample::percentage),
        }
    }

    pub fn status(&self) -> LightingStatus {
        let window = self.gate.window();
        LightingStatus {
            window_start_hour: window.start_hour,
            window_end_hour: window.end_hour,
            dispatched_this_slot: self.dispatch.dispatched_this_slot,
            coverage_percent: self.last_reading.map(CoverageSample::percentage),
            duty_value: self.duty.raw(),
            commanded_duty: self.commanded.raw(),
            last_decision: self.last_decision.map(GateDecision::as_str),
            counters: self.counters.clone(),
        }
    }

    fn absorb_reading(&mut self, result: &Result<CoverageSample, CollaboratorError>) {
        self.counters.fetch_attempts = self.counters.fetch_attempts.saturating_add(1);
        match result {
            Ok(sample) => {
                self.last_reading = Some(*sample);
                self.duty = self.mapper.map(*sample);
            }
            Err(_) => {
                self.counters.fetch_failures = self.counters.fetch_failures.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn engine() -> LightingEngine {
        LightingEngine::new(&LightingConfig::default())
    }

    #[test]
    fn starts_off_with_no_reading() {
        let engine = engine();
        assert_eq!(engine.duty(), DutyValue::OFF);
        assert_eq!(engine.commanded(), DutyValue::OFF);
        assert_eq!(engine.last_reading(), None);
        assert!(!engine.dispatch_state().dispatched_this_slot);
    }

    #[test]
    fn failed_fetch_keeps_stale_values_but_marks_slot() {
        let mut engine = engine();
        engine.record_fetch(&Ok(CoverageSample::new(40)));
        engine.reset_slot();

        engine.record_fetch(&Err(CollaboratorError::Timeout));

        assert_eq!(engine.last_reading(), Some(CoverageSample::new(40)));
        assert_eq!(engine.duty(), DutyValue::new(132));
        assert!(engine.dispatch_state().dispatched_this_slot);
        assert_eq!(engine.counters().fetch_failures, 1);
        assert_eq!(engine.counters().fetch_attempts, 2);
    }

    #[test]
    fn bootstrap_does_not_mark_slot() {
        let mut engine = engine();
        engine.record_bootstrap(&Ok(CoverageSample::new(100)));

        assert_eq!(engine.duty(), DutyValue::new(255));
        assert!(!engine.dispatch_state().dispatched_this_slot);
    }

    #[test]
    fn force_off_leaves_duty_untouched() {
        let mut engine = engine();
        engine.record_fetch(&Ok(CoverageSample::new(40)));

        assert_eq!(engine.duty_for(GateDecision::ForceOff), Some(DutyValue::OFF));
        assert_eq!(engine.duty(), DutyValue::new(132));
        assert_eq!(engine.duty_for(GateDecision::Idle), Some(DutyValue::new(132)));
        assert_eq!(engine.duty_for(GateDecision::ResetSlot), None);
    }

    #[test]
    fn status_reflects_last_tick() {
        let mut engine = engine();
        let now = TimeOfDay::new(8, 0).unwrap();
        let decision = engine.decide(now);
        engine.record_fetch(&Ok(CoverageSample::new(40)));
        engine.record_commanded(DutyValue::new(132));

        assert_eq!(decision, GateDecision::Fetch);
        assert_eq!(
            engine.status(),
            LightingStatus {
                window_start_hour: 8,
                window_end_hour: 20,
                dispatched_this_slot: true,
                coverage_percent: Some(40),
                duty_value: 132,
                commanded_duty: 132,
                last_decision: Some("FETCH"),
                counters: EngineCounters {
                    ticks: 1,
                    clock_failures: 0,
                    fetch_attempts: 1,
                    fetch_failures: 0,
                    publish_failures: 0,
                },
            }
        );
        assert_eq!(
            engine.display_frame(now),
            DisplayFrame {
                current_time: "08:00".to_string(),
                duty: 132,
                coverage_percent: Some(40),
            }
        );
    }
}
