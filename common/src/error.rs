use thiserror::Error;

/// Failure reported by an external collaborator (clock, weather API,
/// telemetry sink). Every variant is transient from the control loop's
/// point of view: the affected step is skipped and prior state is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("clock not synchronized")]
    ClockNotSynced,
    #[error("request timed out")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("activation hour {0} is outside 0-23")]
    HourOutOfRange(u8),
    #[error("activation window start {start} must be before end {end}")]
    InvalidWindow { start: u8, end: u8 },
    #[error("duty range low {low} must be below high {high}")]
    InvalidDutyRange { low: u32, high: u32 },
    #[error("duty high {high} exceeds {bits}-bit PWM resolution")]
    DutyExceedsResolution { high: u32, bits: u8 },
    #[error("PWM resolution {0} bits is not supported (1-14)")]
    InvalidResolution(u8),
    #[error("tick period must be greater than zero")]
    ZeroTickPeriod,
    #[error("tick period {period_ms}ms exceeds {max_ms}ms")]
    TickPeriodTooLong { period_ms: u64, max_ms: u64 },
    #[error("{name} of {ms}ms is outside 1-{max_ms}ms")]
    InvalidTimeout {
        name: &'static str,
        ms: u64,
        max_ms: u64,
    },
    #[error("unknown timezone `{0}`")]
    InvalidTimezone(String),
    #[error("coordinate {name}={value} is out of range")]
    InvalidCoordinate { name: &'static str, value: f64 },
    #[error("{0} cannot be empty")]
    Missing(&'static str),
}
