use chrono::{DateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// Wall-clock snapshot taken once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn from_timelike<T: Timelike>(time: &T) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    /// Reads the `datetime` field of a world-time API response, e.g.
    /// `{"datetime":"2026-03-14T08:30:12.123456+01:00", ...}`.
    pub fn from_world_time_json(body: &[u8]) -> Result<Self, CollaboratorError> {
        #[derive(Deserialize)]
        struct WorldTime {
            datetime: String,
        }

        let parsed: WorldTime = serde_json::from_slice(body)
            .map_err(|err| CollaboratorError::Decode(format!("world time body: {err}")))?;
        let datetime = DateTime::parse_from_rfc3339(&parsed.datetime).map_err(|err| {
            CollaboratorError::Decode(format!("world time `{}`: {err}", parsed.datetime))
        })?;

        Ok(Self::from_timelike(&datetime))
    }

    pub fn is_slot_boundary(self) -> bool {
        self.minute == 0 || self.minute == 30
    }

    pub fn display(self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

/// Cloud coverage in percent, always within 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageSample(u8);

impl CoverageSample {
    pub fn new(percentage: u32) -> Self {
        Self(percentage.min(100) as u8)
    }

    pub fn percentage(self) -> u8 {
        self.0
    }
}

/// Actuation signal commanded to the lamp. Zero is reserved for "off".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DutyValue(u32);

impl DutyValue {
    pub const OFF: Self = Self(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_off(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateDecision {
    Fetch,
    ForceOff,
    Idle,
    ResetSlot,
}

impl GateDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "FETCH",
            Self::ForceOff => "FORCE_OFF",
            Self::Idle => "IDLE",
            Self::ResetSlot => "RESET_SLOT",
        }
    }
}

/// What the human-facing display shows for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayFrame {
    #[serde(rename = "currentTime")]
    pub current_time: String,
    pub duty: u32,
    #[serde(rename = "coveragePercent")]
    pub coverage_percent: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    pub ticks: u64,
    #[serde(rename = "clockFailures")]
    pub clock_failures: u64,
    #[serde(rename = "fetchAttempts")]
    pub fetch_attempts: u64,
    #[serde(rename = "fetchFailures")]
    pub fetch_failures: u64,
    #[serde(rename = "publishFailures")]
    pub publish_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LightingStatus {
    #[serde(rename = "windowStartHour")]
    pub window_start_hour: u8,
    #[serde(rename = "windowEndHour")]
    pub window_end_hour: u8,
    #[serde(rename = "dispatchedThisSlot")]
    pub dispatched_this_slot: bool,
    #[serde(rename = "coveragePercent")]
    pub coverage_percent: Option<u8>,
    #[serde(rename = "dutyValue")]
    pub duty_value: u32,
    #[serde(rename = "commandedDuty")]
    pub commanded_duty: u32,
    #[serde(rename = "lastDecision")]
    pub last_decision: Option<&'static str>,
    pub counters: EngineCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_world_time_datetime() {
        let body = br#"{"abbreviation":"CET","datetime":"2026-01-14T08:30:12.123456+01:00","timezone":"Europe/Paris"}"#;
        let time = TimeOfDay::from_world_time_json(body).unwrap();

        assert_eq!(time, TimeOfDay { hour: 8, minute: 30 });
        assert_eq!(time.display(), "08:30");
    }

    #[test]
    fn world_time_without_datetime_is_decode_error() {
        let err = TimeOfDay::from_world_time_json(br#"{"timezone":"Europe/Paris"}"#).unwrap_err();
        assert!(matches!(err, CollaboratorError::Decode(_)));
    }

    #[test]
    fn coverage_is_clamped_to_percent() {
        assert_eq!(CoverageSample::new(250).percentage(), 100);
        assert_eq!(CoverageSample::new(40).percentage(), 40);
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        assert!(TimeOfDay::new(24, 0).is_none());
        assert!(TimeOfDay::new(23, 60).is_none());
        assert!(TimeOfDay::new(23, 59).is_some());
    }
}
