use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const REDACTED: &str = "***";
/// Ticks must be closer together than a minute so every slot boundary
/// minute is observed.
pub const MAX_TICK_PERIOD_MS: u64 = 59_000;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl Default for ActivationWindow {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 20,
        }
    }
}

impl ActivationWindow {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for hour in [self.start_hour, self.end_hour] {
            if hour > 23 {
                return Err(ConfigError::HourOutOfRange(hour));
            }
        }
        if self.start_hour >= self.end_hour {
            return Err(ConfigError::InvalidWindow {
                start: self.start_hour,
                end: self.end_hour,
            });
        }
        Ok(())
    }

    pub fn contains_hour(&self, hour: u8) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyRange {
    pub low: u32,
    pub high: u32,
}

impl Default for DutyRange {
    fn default() -> Self {
        Self { low: 50, high: 255 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmHardwareConfig {
    pub pin: i32,
    pub channel: u8,
    pub frequency_hz: u32,
    pub resolution_bits: u8,
}

impl Default for PwmHardwareConfig {
    fn default() -> Self {
        Self {
            pin: 23,
            channel: 0,
            frequency_hz: 1_000,
            resolution_bits: 8,
        }
    }
}

impl PwmHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.pin < 0 {
            self.pin = 23;
        }

        if self.channel > 7 {
            self.channel = 0;
        }

        self.frequency_hz = self.frequency_hz.clamp(100, 40_000);
    }

    pub fn max_duty(&self) -> u32 {
        (1_u32 << self.resolution_bits.min(31)) - 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightingConfig {
    pub window: ActivationWindow,
    pub tick_period_ms: u64,
    pub duty: DutyRange,
    #[serde(default)]
    pub pwm: PwmHardwareConfig,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            window: ActivationWindow::default(),
            tick_period_ms: 15_000,
            duty: DutyRange::default(),
            pwm: PwmHardwareConfig::default(),
        }
    }
}

/// Fixed query sent to the weather API on every fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherQuery {
    pub base_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub api_key: String,
    pub request_timeout_ms: u64,
}

impl Default for WeatherQuery {
    fn default() -> Self {
        Self {
            base_url: "http://api.openweathermap.org".to_string(),
            latitude: 48.89622159405292,
            longitude: 2.235670027094151,
            api_key: String::new(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSourceKind {
    System,
    WorldTimeApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    pub timezone: String,
    pub source: ClockSourceKind,
    pub world_time_url: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            timezone: "Europe/Paris".to_string(),
            source: ClockSourceKind::System,
            world_time_url: "http://worldtimeapi.org/api/timezone/Europe/Paris".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            org: String::new(),
            bucket: "cloudlight".to_string(),
            token: String::new(),
        }
    }
}

impl InfluxConfig {
    pub fn write_url(&self) -> String {
        format!(
            "{}/api/v2/write?org={}&bucket={}&precision=s",
            self.url.trim_end_matches('/'),
            self.org,
            self.bucket
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub device_tag: String,
    pub measurement: String,
    #[serde(default)]
    pub influx: Option<InfluxConfig>,
    pub mqtt_state: bool,
    pub request_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            device_tag: "ESP32".to_string(),
            measurement: "CloudCoverage".to_string(),
            influx: None,
            mqtt_state: true,
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

impl NetworkConfig {
    /// Tag identifying the network the device is attached to.
    pub fn network_tag(&self) -> &str {
        if self.wifi_ssid.trim().is_empty() {
            "wired"
        } else {
            self.wifi_ssid.as_str()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub lighting: LightingConfig,
    #[serde(default)]
    pub weather: WeatherQuery,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lighting.window.validate()?;

        let duty = self.lighting.duty;
        if duty.low >= duty.high {
            return Err(ConfigError::InvalidDutyRange {
                low: duty.low,
                high: duty.high,
            });
        }

        let bits = self.lighting.pwm.resolution_bits;
        if !(1..=14).contains(&bits) {
            return Err(ConfigError::InvalidResolution(bits));
        }
        if duty.high > self.lighting.pwm.max_duty() {
            return Err(ConfigError::DutyExceedsResolution {
                high: duty.high,
                bits,
            });
        }

        if self.lighting.tick_period_ms == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.lighting.tick_period_ms > MAX_TICK_PERIOD_MS {
            return Err(ConfigError::TickPeriodTooLong {
                period_ms: self.lighting.tick_period_ms,
                max_ms: MAX_TICK_PERIOD_MS,
            });
        }
        for (name, ms) in [
            ("weather.request_timeout_ms", self.weather.request_timeout_ms),
            ("telemetry.request_timeout_ms", self.telemetry.request_timeout_ms),
        ] {
            if ms == 0 || ms > MAX_REQUEST_TIMEOUT_MS {
                return Err(ConfigError::InvalidTimeout {
                    name,
                    ms,
                    max_ms: MAX_REQUEST_TIMEOUT_MS,
                });
            }
        }

        if self.clock.timezone.parse::<Tz>().is_err() {
            return Err(ConfigError::InvalidTimezone(self.clock.timezone.clone()));
        }

        if !(-90.0..=90.0).contains(&self.weather.latitude) {
            return Err(ConfigError::InvalidCoordinate {
                name: "latitude",
                value: self.weather.latitude,
            });
        }
        if !(-180.0..=180.0).contains(&self.weather.longitude) {
            return Err(ConfigError::InvalidCoordinate {
                name: "longitude",
                value: self.weather.longitude,
            });
        }
        if self.weather.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("weather.base_url"));
        }

        if self.telemetry.device_tag.trim().is_empty() {
            return Err(ConfigError::Missing("telemetry.device_tag"));
        }
        if self.telemetry.measurement.trim().is_empty() {
            return Err(ConfigError::Missing("telemetry.measurement"));
        }

        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.clock
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.clock.timezone.clone()))
    }

    /// Upper bound on how long one tick can block on its HTTP collaborators:
    /// the world-time clock (when selected), the weather fetch and the
    /// telemetry write.
    pub fn worst_case_tick_ms(&self) -> u64 {
        let clock_ms = match self.clock.source {
            ClockSourceKind::System => 0,
            ClockSourceKind::WorldTimeApi => self.weather.request_timeout_ms,
        };
        clock_ms
            .saturating_add(self.weather.request_timeout_ms)
            .saturating_add(self.telemetry.request_timeout_ms)
    }

    /// Overlays secrets and endpoints supplied by the deployment, looked up by
    /// variable name. Unparseable numbers are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OWM_API_KEY") {
            self.weather.api_key = key;
        }
        if let Some(ssid) = lookup("WIFI_SSID") {
            self.network.wifi_ssid = ssid;
        }
        if let Some(pass) = lookup("WIFI_PASS") {
            self.network.wifi_pass = pass;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.network.mqtt_host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
            self.network.mqtt_port = port;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.network.mqtt_user = user;
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.network.mqtt_pass = pass;
        }

        if let Some(url) = lookup("INFLUX_URL") {
            let influx = self.telemetry.influx.get_or_insert_with(InfluxConfig::default);
            influx.url = url;
        }
        if let Some(influx) = self.telemetry.influx.as_mut() {
            if let Some(token) = lookup("INFLUX_TOKEN") {
                influx.token = token;
            }
            if let Some(org) = lookup("INFLUX_ORG") {
                influx.org = org;
            }
            if let Some(bucket) = lookup("INFLUX_BUCKET") {
                influx.bucket = bucket;
            }
        }
    }

    /// Copy safe to serve over the status API.
    pub fn redacted(&self) -> Self {
        fn mask(value: &mut String) {
            if !value.is_empty() {
                *value = REDACTED.to_string();
            }
        }

        let mut view = self.clone();
        mask(&mut view.weather.api_key);
        mask(&mut view.network.wifi_pass);
        mask(&mut view.network.mqtt_pass);
        if let Some(influx) = view.telemetry.influx.as_mut() {
            mask(&mut influx.token);
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(RuntimeConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_inverted_or_empty_window() {
        let mut config = RuntimeConfig::default();
        config.lighting.window = ActivationWindow {
            start_hour: 20,
            end_hour: 8,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidWindow { start: 20, end: 8 })
        );

        config.lighting.window = ActivationWindow {
            start_hour: 9,
            end_hour: 9,
        };
        assert!(config.validate().is_err());

        config.lighting.window = ActivationWindow {
            start_hour: 9,
            end_hour: 24,
        };
        assert_eq!(config.validate(), Err(ConfigError::HourOutOfRange(24)));
    }

    #[test]
    fn duty_high_must_fit_resolution() {
        let mut config = RuntimeConfig::default();
        config.lighting.duty.high = 256;
        assert_eq!(
            config.validate(),
            Err(ConfigError::DutyExceedsResolution { high: 256, bits: 8 })
        );

        config.lighting.pwm.resolution_bits = 10;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_tick_and_bad_timezone() {
        let mut config = RuntimeConfig::default();
        config.lighting.tick_period_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTickPeriod));

        let mut config = RuntimeConfig::default();
        config.clock.timezone = "Mars/Olympus".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{"lighting":{"window":{"start_hour":7,"end_hour":22},"tick_period_ms":5000,"duty":{"low":40,"high":200}}}"#,
        )
        .unwrap();

        assert_eq!(config.lighting.window.start_hour, 7);
        assert_eq!(config.lighting.pwm, PwmHardwareConfig::default());
        assert_eq!(config.clock.timezone, "Europe/Paris");
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn pwm_sanitize_restores_safe_values() {
        let mut pwm = PwmHardwareConfig {
            pin: -1,
            channel: 9,
            frequency_hz: 10,
            resolution_bits: 8,
        };
        pwm.sanitize();

        assert_eq!(pwm.pin, 23);
        assert_eq!(pwm.channel, 0);
        assert_eq!(pwm.frequency_hz, 100);
        assert_eq!(pwm.max_duty(), 255);
    }

    fn lookup<'a>(
        vars: &'a [(&'static str, &'static str)],
    ) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn overrides_fill_secrets_and_endpoints() {
        let mut config = RuntimeConfig::default();
        config.apply_overrides(lookup(&[
            ("OWM_API_KEY", "abc"),
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "not-a-port"),
            ("INFLUX_URL", "http://influx:8086"),
            ("INFLUX_TOKEN", "tok"),
            ("INFLUX_ORG", "DVIC"),
        ]));

        assert_eq!(config.weather.api_key, "abc");
        assert_eq!(config.network.mqtt_host, "broker.local");
        assert_eq!(config.network.mqtt_port, 1883);

        let influx = config.telemetry.influx.unwrap();
        assert_eq!(influx.url, "http://influx:8086");
        assert_eq!(influx.token, "tok");
        assert_eq!(influx.org, "DVIC");
        assert_eq!(influx.bucket, "cloudlight");
    }

    #[test]
    fn influx_token_without_url_is_ignored() {
        let mut config = RuntimeConfig::default();
        config.apply_overrides(lookup(&[("INFLUX_TOKEN", "tok")]));
        assert!(config.telemetry.influx.is_none());
    }

    #[test]
    fn redacted_view_masks_credentials() {
        let mut config = RuntimeConfig::default();
        config.weather.api_key = "abc".to_string();
        config.network.mqtt_pass = "pw".to_string();
        config.telemetry.influx = Some(InfluxConfig {
            url: "http://influx:8086".to_string(),
            org: "DVIC".to_string(),
            bucket: "mybucket".to_string(),
            token: "tok".to_string(),
        });

        let view = config.redacted();

        assert_eq!(view.weather.api_key, REDACTED);
        assert_eq!(view.network.mqtt_pass, REDACTED);
        assert_eq!(view.network.wifi_pass, "");
        assert_eq!(view.telemetry.influx.unwrap().token, REDACTED);
        assert_eq!(config.weather.api_key, "abc");
    }

    #[test]
    fn influx_write_url_targets_v2_endpoint() {
        let influx = InfluxConfig {
            url: "http://10.0.0.5:8086/".to_string(),
            org: "DVIC".to_string(),
            bucket: "mybucket".to_string(),
            token: String::new(),
        };
        assert_eq!(
            influx.write_url(),
            "http://10.0.0.5:8086/api/v2/write?org=DVIC&bucket=mybucket&precision=s"
        );
    }

    #[test]
    fn rejects_tick_period_that_can_skip_a_minute() {
        let mut config = RuntimeConfig::default();
        config.lighting.tick_period_ms = 60_000;
        assert_eq!(
            config.validate(),
            Err(ConfigError::TickPeriodTooLong {
                period_ms: 60_000,
                max_ms: MAX_TICK_PERIOD_MS,
            })
        );

        config.lighting.tick_period_ms = MAX_TICK_PERIOD_MS;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_unbounded_request_timeouts() {
        let mut config = RuntimeConfig::default();
        config.telemetry.request_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { name: "telemetry.request_timeout_ms", .. })
        ));

        config.telemetry.request_timeout_ms = 5_000;
        config.weather.request_timeout_ms = 120_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { name: "weather.request_timeout_ms", .. })
        ));
    }

    #[test]
    fn worst_case_tick_counts_every_http_call() {
        let mut config = RuntimeConfig::default();
        assert_eq!(config.worst_case_tick_ms(), 15_000);

        config.clock.source = ClockSourceKind::WorldTimeApi;
        assert_eq!(config.worst_case_tick_ms(), 25_000);
    }
}
