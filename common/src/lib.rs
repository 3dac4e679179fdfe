pub mod config;
pub mod control;
pub mod duty;
pub mod engine;
pub mod error;
pub mod gate;
pub mod ports;
pub mod telemetry;
pub mod topics;
pub mod types;
pub mod weather;

pub use config::{
    ActivationWindow, ClockConfig, ClockSourceKind, DutyRange, InfluxConfig, LightingConfig,
    NetworkConfig, PwmHardwareConfig, RuntimeConfig, TelemetryConfig, WeatherQuery,
};
pub use control::{Collaborators, ControlLoop, TickOutcome, TickReport};
pub use duty::DutyMapper;
pub use engine::LightingEngine;
pub use error::{CollaboratorError, ConfigError};
pub use gate::{ActivationGate, FetchDispatchState};
pub use ports::{
    Actuator, ClockSource, Display, EnvironmentFetcher, FanoutSink, NullDisplay, TelemetrySink,
};
pub use telemetry::TelemetrySample;
pub use topics::*;
pub use types::{
    CoverageSample, DisplayFrame, DutyValue, EngineCounters, GateDecision, LightingStatus,
    TimeOfDay,
};
