use serde::Deserialize;

use crate::{
    config::{WeatherQuery, REDACTED},
    error::CollaboratorError,
    types::CoverageSample,
};

/// Largest weather response body accepted from the API.
pub const MAX_WEATHER_BODY_BYTES: usize = 4096;

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    clouds: Clouds,
}

#[derive(Debug, Deserialize)]
struct Clouds {
    all: u32,
}

impl WeatherQuery {
    pub fn request_url(&self) -> String {
        format!(
            "{}/data/2.5/weather?lat={}&lon={}&appid={}",
            self.base_url.trim_end_matches('/'),
            self.latitude,
            self.longitude,
            self.api_key
        )
    }

    /// Same as [`Self::request_url`] with the credential masked, for logs.
    pub fn redacted_url(&self) -> String {
        let masked = if self.api_key.is_empty() { "" } else { REDACTED };
        format!(
            "{}/data/2.5/weather?lat={}&lon={}&appid={masked}",
            self.base_url.trim_end_matches('/'),
            self.latitude,
            self.longitude,
        )
    }
}

/// Extracts `clouds.all` from a current-weather response.
pub fn parse_coverage(body: &[u8]) -> Result<CoverageSample, CollaboratorError> {
    if body.len() > MAX_WEATHER_BODY_BYTES {
        return Err(CollaboratorError::Decode(format!(
            "weather body too large ({} bytes)",
            body.len()
        )));
    }

    let weather: CurrentWeather = serde_json::from_slice(body)
        .map_err(|err| CollaboratorError::Decode(format!("weather body: {err}")))?;
    Ok(CoverageSample::new(weather.clouds.all))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_query_url_with_coordinates() {
        let query = WeatherQuery {
            base_url: "http://api.example.org/".to_string(),
            latitude: 48.5,
            longitude: 2.25,
            api_key: "secret".to_string(),
            request_timeout_ms: 1_000,
        };

        assert_eq!(
            query.request_url(),
            "http://api.example.org/data/2.5/weather?lat=48.5&lon=2.25&appid=secret"
        );
        assert!(!query.redacted_url().contains("secret"));
    }

    #[test]
    fn reads_cloud_coverage() {
        let body = br#"{"coord":{"lon":2.23,"lat":48.89},"clouds":{"all":75},"name":"Puteaux"}"#;
        assert_eq!(parse_coverage(body).unwrap().percentage(), 75);
    }

    #[test]
    fn missing_clouds_is_decode_error() {
        let err = parse_coverage(br#"{"cod":401,"message":"Invalid API key"}"#).unwrap_err();
        assert!(matches!(err, CollaboratorError::Decode(_)));
    }

    #[test]
    fn oversized_body_is_rejected() {
        let body = vec![b' '; MAX_WEATHER_BODY_BYTES + 1];
        assert!(parse_coverage(&body).is_err());
    }
}
