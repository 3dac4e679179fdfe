use std::{
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    config::{RuntimeConfig, WeatherQuery},
    engine::LightingEngine,
    error::CollaboratorError,
    ports::{Actuator, ClockSource, Display, EnvironmentFetcher, NullDisplay, TelemetrySink},
    types::{CoverageSample, DutyValue, GateDecision, TimeOfDay},
};

/// Concrete collaborators handed to a [`ControlLoop`].
pub struct Collaborators<C, F, A, T, D = NullDisplay> {
    pub clock: C,
    pub fetcher: F,
    pub actuator: A,
    pub telemetry: T,
    pub display: D,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub time: TimeOfDay,
    pub decision: GateDecision,
    pub fetch: Option<Result<CoverageSample, CollaboratorError>>,
    pub commanded: Option<DutyValue>,
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    ClockUnavailable,
    Completed(TickReport),
}

/// Longest the run loop sleeps between two calls of its idle hook.
pub const IDLE_SLICE: Duration = Duration::from_millis(500);

/// Single-threaded, tick-driven acquisition and actuation loop.
pub struct ControlLoop<C, F, A, T, D = NullDisplay> {
    engine: LightingEngine,
    query: WeatherQuery,
    device_tag: String,
    network_tag: String,

    clock: C,
    fetcher: F,
    actuator: A,
    telemetry: T,
    display: D,
}

impl<C, F, A, T, D> ControlLoop<C, F, A, T, D>
where
    C: ClockSource,
    F: EnvironmentFetcher,
    A: Actuator,
    T: TelemetrySink,
    D: Display,
{
    pub fn new(config: &RuntimeConfig, parts: Collaborators<C, F, A, T, D>) -> Self {
        Self {
            engine: LightingEngine::new(&config.lighting),
            query: config.weather.clone(),
            device_tag: config.telemetry.device_tag.clone(),
            network_tag: config.network.network_tag().to_string(),
            clock: parts.clock,
            fetcher: parts.fetcher,
            actuator: parts.actuator,
            telemetry: parts.telemetry,
            display: parts.display,
        }
    }

    pub fn engine(&self) -> &LightingEngine {
        &self.engine
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Unconditional power-up fetch so the first in-window tick has a real
    /// duty to apply instead of waiting for the next slot boundary.
    pub fn bootstrap(&mut self) -> Result<CoverageSample, CollaboratorError> {
        let result = self.fetcher.fetch(&self.query);
        self.engine.record_bootstrap(&result);
        match &result {
            Ok(sample) => info!(
                "initial cloud coverage {}% -> duty {}",
                sample.percentage(),
                self.engine.duty().raw()
            ),
            Err(err) => warn!("initial weather fetch failed: {err}"),
        }
        result
    }

    pub fn tick(&mut self) -> TickOutcome {
        let now = match self.clock.now() {
            Ok(now) => now,
            Err(err) => {
                self.engine.record_clock_failure();
                warn!("time read failed, skipping tick: {err}");
                return TickOutcome::ClockUnavailable;
            }
        };

        let decision = self.engine.decide(now);
        debug!("tick {} -> {}", now.display(), decision.as_str());

        let mut fetch = None;
        match decision {
            GateDecision::Fetch => {
                let result = self.fetcher.fetch(&self.query);
                match &result {
                    Ok(sample) => {
                        info!("cloud coverage {}% at {}", sample.percentage(), now.display())
                    }
                    Err(err) => warn!("weather fetch failed at {}: {err}", now.display()),
                }
                self.engine.record_fetch(&result);
                fetch = Some(result);
            }
            GateDecision::ResetSlot => self.engine.reset_slot(),
            GateDecision::ForceOff => debug!("outside activation window"),
            GateDecision::Idle => {}
        }

        let commanded = self.engine.duty_for(decision);
        if let Some(duty) = commanded {
            self.actuator.write(duty);
            self.engine.record_commanded(duty);
        }

        self.display.render(&self.engine.display_frame(now));

        let sample = self
            .engine
            .telemetry_sample(&self.device_tag, &self.network_tag);
        let published = match self.telemetry.publish(&sample) {
            Ok(()) => true,
            Err(err) => {
                self.engine.record_publish_failure();
                warn!("telemetry write failed: {err}");
                false
            }
        };

        TickOutcome::Completed(TickReport {
            time: now,
            decision,
            fetch,
            commanded,
            published,
        })
    }

    /// Ticks every `period` until a hook asks to stop. `keep_running` runs
    /// after each tick; `idle` runs at least every [`IDLE_SLICE`] while the
    /// loop sleeps out the rest of the period, so a stop request or a
    /// watchdog feed never waits for a whole period.
    pub fn run<K, I>(&mut self, period: Duration, mut keep_running: K, mut idle: I)
    where
        K: FnMut(&TickOutcome, &LightingEngine) -> bool,
        I: FnMut() -> bool,
    {
        loop {
            let started = Instant::now();
            let outcome = self.tick();
            if !keep_running(&outcome, &self.engine) {
                break;
            }
            if !sleep_until(started + period, &mut idle) {
                break;
            }
        }
    }
}

/// Sleeps until `deadline` in slices of at most [`IDLE_SLICE`], calling
/// `idle` before each one. Returns false as soon as `idle` does.
fn sleep_until<I: FnMut() -> bool>(deadline: Instant, idle: &mut I) -> bool {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        if !idle() {
            return false;
        }
        thread::sleep(remaining.min(IDLE_SLICE));
    }
}
