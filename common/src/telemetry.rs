use serde::Serialize;

use crate::types::{CoverageSample, DutyValue};

/// One write-and-forget telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetrySample {
    #[serde(rename = "dutyValue")]
    pub duty_value: u32,
    #[serde(rename = "coveragePercent")]
    pub coverage_percent: Option<u8>,
    #[serde(rename = "deviceTag")]
    pub device_tag: String,
    #[serde(rename = "networkTag")]
    pub network_tag: String,
}

impl TelemetrySample {
    pub fn new(
        duty: DutyValue,
        coverage: Option<CoverageSample>,
        device_tag: &str,
        network_tag: &str,
    ) -> Self {
        Self {
            duty_value: duty.raw(),
            coverage_percent: coverage.map(CoverageSample::percentage),
            device_tag: device_tag.to_string(),
            network_tag: network_tag.to_string(),
        }
    }

    /// InfluxDB line protocol, without timestamp (the server stamps it).
    pub fn to_line_protocol(&self, measurement: &str) -> String {
        let mut line = format!(
            "{},device={},SSID={} PWM={}i",
            escape_measurement(measurement),
            escape_tag(&self.device_tag),
            escape_tag(&self.network_tag),
            self.duty_value
        );
        if let Some(coverage) = self.coverage_percent {
            line.push_str(&format!(
                ",Cloud_Coverage={coverage}i,Led_Luminosity={coverage}i"
            ));
        }
        line
    }
}

fn escape_measurement(value: &str) -> String {
    value.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_line_protocol_with_coverage() {
        let sample = TelemetrySample::new(
            DutyValue::new(132),
            Some(CoverageSample::new(40)),
            "ESP32",
            "home",
        );

        assert_eq!(
            sample.to_line_protocol("CloudCoverage"),
            "CloudCoverage,device=ESP32,SSID=home PWM=132i,Cloud_Coverage=40i,Led_Luminosity=40i"
        );
    }

    #[test]
    fn omits_coverage_until_known() {
        let sample = TelemetrySample::new(DutyValue::OFF, None, "ESP32", "home");
        assert_eq!(
            sample.to_line_protocol("CloudCoverage"),
            "CloudCoverage,device=ESP32,SSID=home PWM=0i"
        );
    }

    #[test]
    fn escapes_tag_separators() {
        let sample = TelemetrySample::new(DutyValue::new(50), None, "lamp 1", "a,b=c");
        assert_eq!(
            sample.to_line_protocol("Cloud Coverage"),
            "Cloud\\ Coverage,device=lamp\\ 1,SSID=a\\,b\\=c PWM=50i"
        );
    }
}
