use crate::{
    config::DutyRange,
    types::{CoverageSample, DutyValue},
};

/// Maps cloud coverage onto the lamp's duty range: more cloud, brighter lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyMapper {
    range: DutyRange,
}

impl DutyMapper {
    pub fn new(range: DutyRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> DutyRange {
        self.range
    }

    pub fn map(&self, coverage: CoverageSample) -> DutyValue {
        self.map_percentage(u32::from(coverage.percentage()))
    }

    /// Linear interpolation from [0, 100] onto [low, high] with integer
    /// truncation. Inputs above 100 are clamped.
    pub fn map_percentage(&self, percentage: u32) -> DutyValue {
        let percentage = u64::from(percentage.min(100));
        let low = u64::from(self.range.low);
        let high = u64::from(self.range.high.max(self.range.low));
        let duty = low + percentage * (high - low) / 100;
        DutyValue::new(duty as u32)
    }
}
