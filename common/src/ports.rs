//! Capability interfaces the control loop drives. Platform crates provide
//! the real implementations; tests provide deterministic fakes.

use crate::{
    config::WeatherQuery,
    error::CollaboratorError,
    telemetry::TelemetrySample,
    types::{CoverageSample, DisplayFrame, DutyValue, TimeOfDay},
};

pub trait ClockSource {
    fn now(&mut self) -> Result<TimeOfDay, CollaboratorError>;
}

pub trait EnvironmentFetcher {
    fn fetch(&mut self, query: &WeatherQuery) -> Result<CoverageSample, CollaboratorError>;
}

/// Best-effort, idempotent duty writer. Driver faults are the implementor's
/// to log.
pub trait Actuator {
    fn write(&mut self, duty: DutyValue);
}

pub trait TelemetrySink {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<(), CollaboratorError>;
}

pub trait Display {
    fn render(&mut self, frame: &DisplayFrame);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullDisplay;

impl Display for NullDisplay {
    fn render(&mut self, _frame: &DisplayFrame) {}
}

/// Publishes to every inner sink; fails if any of them failed.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn TelemetrySink + Send>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn TelemetrySink + Send>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TelemetrySink for FanoutSink {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<(), CollaboratorError> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(err) = sink.publish(sample) {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<T: ClockSource + ?Sized> ClockSource for Box<T> {
    fn now(&mut self) -> Result<TimeOfDay, CollaboratorError> {
        (**self).now()
    }
}

impl<T: EnvironmentFetcher + ?Sized> EnvironmentFetcher for Box<T> {
    fn fetch(&mut self, query: &WeatherQuery) -> Result<CoverageSample, CollaboratorError> {
        (**self).fetch(query)
    }
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn write(&mut self, duty: DutyValue) {
        (**self).write(duty)
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<(), CollaboratorError> {
        (**self).publish(sample)
    }
}

impl<T: Display + ?Sized> Display for Box<T> {
    fn render(&mut self, frame: &DisplayFrame) {
        (**self).render(frame)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct Recording {
        calls: Arc<Mutex<u32>>,
        fail: bool,
    }

    impl TelemetrySink for Recording {
        fn publish(&mut self, _sample: &TelemetrySample) -> Result<(), CollaboratorError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                Err(CollaboratorError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn fanout_tries_every_sink_and_reports_failure() {
        let calls = Arc::new(Mutex::new(0));
        let mut fanout = FanoutSink::new();
        fanout.push(Box::new(Recording {
            calls: calls.clone(),
            fail: true,
        }));
        fanout.push(Box::new(Recording {
            calls: calls.clone(),
            fail: false,
        }));

        let sample = TelemetrySample::new(DutyValue::OFF, None, "ESP32", "home");
        assert_eq!(fanout.publish(&sample), Err(CollaboratorError::Status(500)));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn empty_fanout_succeeds() {
        let sample = TelemetrySample::new(DutyValue::OFF, None, "ESP32", "home");
        assert_eq!(FanoutSink::new().publish(&sample), Ok(()));
    }
}
