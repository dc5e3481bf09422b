//! Meteomatics historical time-series client.
//!
//! API Documentation: https://www.meteomatics.com/en/api/request/

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{Credentials, PipelineConfig};
use crate::error::FetchError;
use crate::series::{Frequency, TimeSeries};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ============================================================================
// Response structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse {
    data: Vec<ParameterData>,
}

#[derive(Debug, Deserialize)]
struct ParameterData {
    coordinates: Vec<CoordinateData>,
}

#[derive(Debug, Deserialize)]
struct CoordinateData {
    dates: Vec<DateValue>,
}

#[derive(Debug, Deserialize)]
struct DateValue {
    date: String,
    value: Option<f64>,
}

/// One point, one parameter, one time range
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalRequest {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub frequency: Frequency,
    pub parameter: String,
}

impl HistoricalRequest {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).unwrap_or_default();
        HistoricalRequest {
            start: midnight(config.fetch_start),
            end: midnight(config.fetch_end),
            latitude: config.latitude,
            longitude: config.longitude,
            frequency: config.frequency,
            parameter: config.parameter.clone(),
        }
    }

    /// `{base}/{start}--{end}:{interval}/{parameter}/{lat},{lon}/json`
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}--{}:{}/{}/{},{}/json",
            base_url.trim_end_matches('/'),
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT),
            self.frequency.iso_interval(),
            self.parameter,
            self.latitude,
            self.longitude
        )
    }
}

/// Blocking client with basic auth and a fixed request timeout. No retries.
pub struct MeteomaticsClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl MeteomaticsClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            credentials,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, FetchError> {
        let credentials = config.credentials.clone().ok_or(FetchError::MissingCredentials)?;
        Self::new(config.api_base_url.clone(), credentials, config.request_timeout())
    }

    /// Downloads the series and resamples it to the request frequency
    pub fn fetch_historical(&self, request: &HistoricalRequest) -> Result<TimeSeries, FetchError> {
        let url = request.url(&self.base_url);
        info!(%url, "requesting Meteomatics history");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header("Accept", "application/json")
            .send()?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text()?;
        let series = parse_response(&body, request.frequency)?;
        info!(points = series.len(), "received Meteomatics history");
        Ok(series)
    }
}

/// Extracts `data[0].coordinates[0].dates` and resamples by bucket mean.
/// Null values are dropped.
pub fn parse_response(body: &str, frequency: Frequency) -> Result<TimeSeries, FetchError> {
    let response: ApiResponse =
        serde_json::from_str(body).map_err(|e| FetchError::UnexpectedFormat(e.to_string()))?;

    let dates = response
        .data
        .into_iter()
        .next()
        .and_then(|p| p.coordinates.into_iter().next())
        .map(|c| c.dates)
        .ok_or_else(|| FetchError::UnexpectedFormat("missing data[0].coordinates[0]".to_string()))?;

    let mut readings = Vec::with_capacity(dates.len());
    for entry in dates {
        let ts = DateTime::parse_from_rfc3339(&entry.date)
            .map_err(|e| FetchError::UnexpectedFormat(format!("bad date `{}`: {}", entry.date, e)))?
            .naive_utc();
        if let Some(value) = entry.value {
            readings.push((ts, value));
        }
    }
    debug!(raw_points = readings.len(), "parsed Meteomatics response");

    Ok(TimeSeries::resample_mean("temperature_met_historical", readings, frequency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> HistoricalRequest {
        HistoricalRequest::from_config(&PipelineConfig::default())
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    /// Runs the blocking client against the mock server off the async runtime
    async fn fetch(server: &MockServer) -> Result<TimeSeries, FetchError> {
        let base = server.uri();
        tokio::task::spawn_blocking(move || {
            MeteomaticsClient::new(base, credentials(), Duration::from_secs(5))?.fetch_historical(&request())
        })
        .await
        .unwrap()
    }

    const BODY: &str = r#"{"version":"3.0","status":"OK","data":[{"parameter":"t_2m:C","coordinates":[{"lat":-12.04318,"lon":-77.02824,"dates":[
        {"date":"2024-01-01T00:00:00Z","value":20.0},
        {"date":"2024-01-01T12:00:00Z","value":24.0},
        {"date":"2024-01-02T00:00:00Z","value":null},
        {"date":"2024-01-03T00:00:00Z","value":19.5}
    ]}]}]}"#;

    #[test]
    fn test_url_layout() {
        let url = request().url("https://api.meteomatics.com/");
        assert_eq!(
            url,
            "https://api.meteomatics.com/2019-01-01T00:00:00Z--2025-10-01T00:00:00Z:P1D/t_2m:C/-12.04318,-77.02824/json"
        );

        let hourly = HistoricalRequest { frequency: Frequency::Hourly, ..request() };
        assert!(hourly.url("http://x").contains(":PT1H/"));
    }

    #[test]
    fn test_parse_resamples_and_drops_nulls() {
        let series = parse_response(BODY, Frequency::Daily).unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.get(&day(1)), Some(22.0));
        assert_eq!(series.get(&day(2)), None);
        assert_eq!(series.get(&day(3)), Some(19.5));
    }

    #[test]
    fn test_parse_rejects_unexpected_shapes() {
        for body in [
            "not json",
            r#"{"data":[]}"#,
            r#"{"data":[{"coordinates":[]}]}"#,
            r#"{"data":[{"coordinates":[{"dates":[{"date":"yesterday","value":1.0}]}]}]}"#,
            r#"{"status":"OK"}"#,
        ] {
            assert!(
                matches!(parse_response(body, Frequency::Daily), Err(FetchError::UnexpectedFormat(_))),
                "accepted {}",
                body
            );
        }
    }

    #[tokio::test]
    async fn test_non_200_is_fatal_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        match fetch(&server).await {
            Err(FetchError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "Unauthorized");
            }
            other => panic!("expected status error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/2019-01-01T00:00:00Z--2025-10-01T00:00:00Z:P1D/t_2m:C/.+/json$"))
            // base64("user:pass")
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(BODY, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let series = fetch(&server).await.unwrap();
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_missing_credentials() {
        let config = PipelineConfig::default();
        assert!(matches!(
            MeteomaticsClient::from_config(&config),
            Err(FetchError::MissingCredentials)
        ));
    }
}
