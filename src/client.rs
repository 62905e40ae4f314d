//! HTTP client module for the WAQI air-quality API.
//!
//! This module defines the `AqiSource` seam the sampler depends on and
//! `WaqiClient`, its reqwest-backed implementation. The client owns every
//! wire-format detail: URL shapes, the status/data envelope and the nested
//! PM2.5 field.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::geo::{BoundingBox, Coordinate};
use crate::retry::{RetryError, RetryPolicy};

/// Status value the API reports for successful queries.
const STATUS_OK: &str = "ok";

/// Source of station locations and PM2.5 readings.
///
/// Implementations absorb their own failures: discovery degrades to an
/// empty list and a reading degrades to `None`.
#[async_trait]
pub trait AqiSource: Send + Sync {
    /// Find the stations inside `bbox`. Called once per run, not retried.
    async fn discover_stations(&self, bbox: &BoundingBox) -> Vec<Coordinate>;

    /// Current PM2.5 value reported by the station at `station`.
    async fn fetch_pm25(&self, station: Coordinate) -> Option<f64>;
}

#[async_trait]
impl<T: AqiSource + ?Sized> AqiSource for Arc<T> {
    async fn discover_stations(&self, bbox: &BoundingBox) -> Vec<Coordinate> {
        (**self).discover_stations(bbox).await
    }

    async fn fetch_pm25(&self, station: Coordinate) -> Option<f64> {
        (**self).fetch_pm25(station).await
    }
}

/// Response of the bounds query (`/map/bounds/`).
#[derive(Debug, Clone, Deserialize)]
pub struct BoundsResponse {
    pub status: String,

    /// Station list on success, an error message otherwise
    #[serde(default)]
    pub data: Option<BoundsData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BoundsData {
    Stations(Vec<StationRecord>),
    Message(String),
}

/// A station entry as listed by the bounds query.
#[derive(Debug, Clone, Deserialize)]
pub struct StationRecord {
    pub lat: f64,
    pub lon: f64,

    #[serde(default)]
    pub uid: Option<i64>,
}

impl StationRecord {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

/// Response of the station feed query (`/feed/geo:lat;lon/`).
#[derive(Debug, Clone, Deserialize)]
pub struct FeedResponse {
    pub status: String,

    #[serde(default)]
    pub data: Option<FeedData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeedData {
    Station(StationFeed),
    Message(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationFeed {
    #[serde(default)]
    pub iaqi: Option<IndividualAqi>,
}

/// Per-pollutant index values.
#[derive(Debug, Clone, Deserialize)]
pub struct IndividualAqi {
    #[serde(default)]
    pub pm25: Option<IndexValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexValue {
    pub v: f64,
}

impl FeedResponse {
    /// The nested `data.iaqi.pm25.v` value, if present.
    pub fn pm25(&self) -> Option<f64> {
        match &self.data {
            Some(FeedData::Station(feed)) => feed
                .iaqi
                .as_ref()
                .and_then(|iaqi| iaqi.pm25.as_ref())
                .map(|pm25| pm25.v),
            _ => None,
        }
    }
}

/// Errors that can occur during WAQI client operations.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Server returned an error status code
    Status {
        code: StatusCode,
        message: String,
    },

    /// Failed to parse response body
    Parse(String),

    /// API answered with a non-ok status
    ApiStatus(String),

    /// Feed response did not carry a PM2.5 value
    MissingPm25,

    /// All retry attempts exhausted
    RetriesExhausted {
        attempts: u32,
        last_error: String,
    },

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Server error ({}): {}", code, message)
            }
            ClientError::Parse(e) => write!(f, "Failed to parse response: {}", e),
            ClientError::ApiStatus(status) => write!(f, "API reported status '{}'", status),
            ClientError::MissingPm25 => write!(f, "PM2.5 data not found in response"),
            ClientError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "All {} retry attempts exhausted. Last error: {}",
                    attempts, last_error
                )
            }
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL: it carries the API token.
        let err = err.without_url();
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

impl From<RetryError<ClientError>> for ClientError {
    fn from(err: RetryError<ClientError>) -> Self {
        ClientError::RetriesExhausted {
            attempts: err.attempts,
            last_error: err.last_error.to_string(),
        }
    }
}

/// HTTP client for the WAQI API.
///
/// The client reuses one reqwest connection pool for every query, enforces
/// a per-request timeout and retries station feed queries according to its
/// `RetryPolicy`.
///
/// # Example
///
/// ```no_run
/// use aqi_sampler::client::{AqiSource, WaqiClient};
/// use aqi_sampler::config::{Config, SamplerConfig};
/// use aqi_sampler::geo::BoundingBox;
///
/// #[tokio::main]
/// async fn main() {
///     let bbox = BoundingBox::new(37.78, -122.45, 37.70, -122.35);
///     let sampler = SamplerConfig::new(bbox, 1, 1, "token").expect("valid config");
///     let client = WaqiClient::new(&Config::new(sampler)).expect("Failed to create client");
///
///     for station in client.discover_stations(&bbox).await {
///         println!("{}: {:?}", station, client.fetch_pm25(station).await);
///     }
/// }
/// ```
pub struct WaqiClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Base URL of the API, without trailing slash
    api_url: String,

    /// API token sent with every query
    token: String,

    /// Request timeout duration
    timeout: Duration,

    /// Retry policy for station feed queries
    retry: RetryPolicy,
}

impl WaqiClient {
    /// Create a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(
            config.api_url.clone(),
            config.sampler.api_token(),
            config.request_timeout,
            RetryPolicy::fixed(config.max_attempts, config.retry_delay),
        )
    }

    /// Create a new client with custom settings.
    ///
    /// This is useful for testing or when you need more control over the client.
    pub fn with_settings(
        api_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ClientError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ClientError::Config("API token must be provided".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
            retry,
        })
    }

    /// Run one bounds query and return the stations it lists.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, HTTP error statuses, unparsable bodies and
    /// non-ok API statuses. A missing or non-list `data` field is not an
    /// error and yields an empty list.
    pub async fn query_bounds(&self, bbox: &BoundingBox) -> Result<Vec<Coordinate>, ClientError> {
        let url = format!("{}/map/bounds/", self.api_url);
        let latlng = bbox.to_latlng();

        let response: BoundsResponse = self.get_json(&url, &[("latlng", latlng.as_str())]).await?;

        if response.status != STATUS_OK {
            return Err(ClientError::ApiStatus(response.status));
        }

        match response.data {
            Some(BoundsData::Stations(stations)) => {
                Ok(stations.iter().map(StationRecord::coordinate).collect())
            }
            Some(BoundsData::Message(message)) => {
                debug!(message = %message, "Bounds query returned no station list");
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Run one station feed query, without retry.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, HTTP error statuses and unparsable
    /// bodies, and with `ClientError::MissingPm25` when the envelope lacks
    /// the PM2.5 value.
    pub async fn query_feed(&self, station: Coordinate) -> Result<f64, ClientError> {
        let url = format!(
            "{}/feed/geo:{};{}/",
            self.api_url, station.latitude, station.longitude
        );

        let response: FeedResponse = self.get_json(&url, &[]).await?;
        response.pm25().ok_or(ClientError::MissingPm25)
    }

    /// Query a station feed under the retry policy.
    pub async fn query_feed_with_retry(&self, station: Coordinate) -> Result<f64, ClientError> {
        let value = self
            .retry
            .run("station_feed", move |attempt| async move {
                debug!(station = %station, attempt = attempt, "Fetching station feed");
                self.query_feed(station).await
            })
            .await?;
        Ok(value)
    }

    /// Send a GET request with the token attached and decode a JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .query(&[("token", self.token.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(ClientError::Status {
                code: status,
                message,
            })
        }
    }

    /// Get the configured API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the retry policy for station feeds.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[async_trait]
impl AqiSource for WaqiClient {
    async fn discover_stations(&self, bbox: &BoundingBox) -> Vec<Coordinate> {
        info!(bbox = %bbox, "Fetching available AQI monitoring stations");

        match self.query_bounds(bbox).await {
            Ok(stations) if stations.is_empty() => {
                warn!("No monitoring stations found within the specified area");
                stations
            }
            Ok(stations) => {
                info!(stations = stations.len(), "Found stations in the area");
                stations
            }
            Err(ClientError::ApiStatus(status)) => {
                warn!(status = %status, "No valid station data found");
                Vec::new()
            }
            Err(e) => {
                error!(error = %e, "Error fetching AQI stations");
                Vec::new()
            }
        }
    }

    async fn fetch_pm25(&self, station: Coordinate) -> Option<f64> {
        match self.query_feed_with_retry(station).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(station = %station, error = %e, "Giving up on station reading");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TOKEN: &str = "your_fake_api_token";

    const STATIONS_BODY: &str = r#"{
        "status": "ok",
        "data": [
            {"lat": 37.75, "lon": -122.42, "uid": 1},
            {"lat": 37.76, "lon": -122.41, "uid": 2},
            {"lat": 37.74, "lon": -122.43, "uid": 3}
        ]
    }"#;

    const PM25_BODY: &str = r#"{
        "status": "ok",
        "data": {"aqi": 55, "iaqi": {"pm25": {"v": 12.4}}}
    }"#;

    /// Canned HTTP responder: path -> (status line, body). Records every request target.
    struct StubServer {
        url: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl StubServer {
        async fn start(routes: Vec<(&'static str, &'static str, &'static str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let routes: Arc<HashMap<&str, (&str, &str)>> = Arc::new(
                routes
                    .into_iter()
                    .map(|(path, status, body)| (path, (status, body)))
                    .collect(),
            );

            let recorded = requests.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        break;
                    };
                    let routes = routes.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                        }

                        let head = String::from_utf8_lossy(&buf);
                        let target = head.split_whitespace().nth(1).unwrap_or("").to_string();
                        let path = target.split('?').next().unwrap_or("").to_string();
                        recorded.lock().unwrap().push(target);

                        let (status, body) = routes
                            .get(path.as_str())
                            .copied()
                            .unwrap_or(("404 Not Found", ""));
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });

            Self { url, requests }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn client(&self) -> WaqiClient {
            WaqiClient::with_settings(
                self.url.clone(),
                TOKEN,
                Duration::from_secs(5),
                RetryPolicy::fixed(3, Duration::from_millis(10)),
            )
            .unwrap()
        }
    }

    fn bbox() -> BoundingBox {
        BoundingBox::new(37.78, -122.45, 37.70, -122.35)
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            message: "boom".to_string(),
        };
        assert!(format!("{}", err).contains("500"));
        assert!(format!("{}", err).contains("boom"));

        let err = ClientError::RetriesExhausted {
            attempts: 3,
            last_error: "Connection refused".to_string(),
        };
        assert!(format!("{}", err).contains("3"));
        assert!(format!("{}", err).contains("Connection refused"));

        assert_eq!(
            ClientError::ApiStatus("error".to_string()).to_string(),
            "API reported status 'error'"
        );
    }

    #[test]
    fn test_client_creation() {
        let bbox = bbox();
        let sampler = crate::config::SamplerConfig::new(bbox, 1, 1, TOKEN).unwrap();
        let client = WaqiClient::new(&Config::new(sampler)).unwrap();

        assert_eq!(client.api_url(), "https://api.waqi.info");
        assert_eq!(client.timeout(), Duration::from_secs(5));
        assert_eq!(client.retry_policy().max_attempts(), 3);
        assert_eq!(client.retry_policy().delay_for(1), Duration::from_secs(2));
    }

    #[test]
    fn test_client_rejects_empty_token() {
        let result = WaqiClient::with_settings(
            "http://example.com/",
            "",
            Duration::from_secs(5),
            RetryPolicy::default(),
        );
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_bounds_response_deserialization() {
        let response: BoundsResponse = serde_json::from_str(STATIONS_BODY).unwrap();
        assert_eq!(response.status, "ok");
        match response.data {
            Some(BoundsData::Stations(stations)) => {
                assert_eq!(stations.len(), 3);
                assert_eq!(stations[0].coordinate(), Coordinate::new(37.75, -122.42));
                assert_eq!(stations[2].uid, Some(3));
            }
            other => panic!("unexpected data: {:?}", other),
        }
    }

    #[test]
    fn test_bounds_error_envelope_deserialization() {
        let response: BoundsResponse =
            serde_json::from_str(r#"{"status": "error", "data": "Invalid key"}"#).unwrap();
        assert_eq!(response.status, "error");
        assert!(matches!(response.data, Some(BoundsData::Message(_))));
    }

    #[test]
    fn test_feed_response_pm25() {
        let response: FeedResponse = serde_json::from_str(PM25_BODY).unwrap();
        assert_eq!(response.pm25(), Some(12.4));

        let response: FeedResponse =
            serde_json::from_str(r#"{"status": "ok", "data": {"iaqi": {"o3": {"v": 3}}}}"#)
                .unwrap();
        assert_eq!(response.pm25(), None);

        let response: FeedResponse =
            serde_json::from_str(r#"{"status": "error", "data": "Unknown station"}"#).unwrap();
        assert_eq!(response.pm25(), None);

        let response: FeedResponse = serde_json::from_str(r#"{"status": "ok"}"#).unwrap();
        assert_eq!(response.pm25(), None);
    }

    #[tokio::test]
    async fn test_discover_stations() {
        let server =
            StubServer::start(vec![("/map/bounds/", "200 OK", STATIONS_BODY)]).await;
        let client = server.client();

        let stations = client.discover_stations(&bbox()).await;
        assert_eq!(
            stations,
            vec![
                Coordinate::new(37.75, -122.42),
                Coordinate::new(37.76, -122.41),
                Coordinate::new(37.74, -122.43),
            ]
        );

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("token=your_fake_api_token"));
        assert!(requests[0].contains("latlng="));
    }

    #[tokio::test]
    async fn test_discover_stations_http_error() {
        let server =
            StubServer::start(vec![("/map/bounds/", "500 Internal Server Error", "")]).await;
        let client = server.client();

        assert!(client.discover_stations(&bbox()).await.is_empty());
        // Discovery is never retried
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_discover_stations_non_ok_status() {
        let server = StubServer::start(vec![(
            "/map/bounds/",
            "200 OK",
            r#"{"status": "error", "data": "Invalid key"}"#,
        )])
        .await;
        let client = server.client();

        assert!(matches!(
            client.query_bounds(&bbox()).await,
            Err(ClientError::ApiStatus(_))
        ));
        assert!(client.discover_stations(&bbox()).await.is_empty());
    }

    #[tokio::test]
    async fn test_discover_stations_malformed_body() {
        let server =
            StubServer::start(vec![("/map/bounds/", "200 OK", "not json")]).await;
        let client = server.client();

        assert!(matches!(
            client.query_bounds(&bbox()).await,
            Err(ClientError::Parse(_))
        ));
        assert!(client.discover_stations(&bbox()).await.is_empty());
    }

    #[tokio::test]
    async fn test_discover_stations_missing_data() {
        let server =
            StubServer::start(vec![("/map/bounds/", "200 OK", r#"{"status": "ok"}"#)]).await;
        let client = server.client();

        assert!(client.discover_stations(&bbox()).await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_pm25() {
        let server = StubServer::start(vec![(
            "/feed/geo:37.75;-122.42/",
            "200 OK",
            PM25_BODY,
        )])
        .await;
        let client = server.client();

        let pm25 = client.fetch_pm25(Coordinate::new(37.75, -122.42)).await;
        assert_eq!(pm25, Some(12.4));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_pm25_retries_http_errors() {
        let server = StubServer::start(vec![(
            "/feed/geo:37.75;-122.42/",
            "500 Internal Server Error",
            "",
        )])
        .await;
        let client = server.client();

        let pm25 = client.fetch_pm25(Coordinate::new(37.75, -122.42)).await;
        assert_eq!(pm25, None);
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_pm25_retries_missing_field() {
        let server = StubServer::start(vec![(
            "/feed/geo:37.75;-122.42/",
            "200 OK",
            r#"{"status": "ok", "data": {"aqi": 20, "iaqi": {}}}"#,
        )])
        .await;
        let client = server.client();

        let result = client
            .query_feed_with_retry(Coordinate::new(37.75, -122.42))
            .await;
        match result {
            Err(ClientError::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("PM2.5"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_sampling_run_over_http() {
        use crate::config::SamplerConfig;
        use crate::sampler::{RunStatus, Sampler};

        let server = StubServer::start(vec![
            ("/map/bounds/", "200 OK", STATIONS_BODY),
            ("/feed/geo:37.75;-122.42/", "200 OK", PM25_BODY),
            ("/feed/geo:37.76;-122.41/", "200 OK", PM25_BODY),
            ("/feed/geo:37.74;-122.43/", "200 OK", PM25_BODY),
        ])
        .await;
        let config = SamplerConfig::new(bbox(), 1, 1, TOKEN).unwrap();
        let mut sampler = Sampler::new(config, server.client());

        sampler.start_sampling().await;

        assert_eq!(sampler.status(), RunStatus::Done);
        assert_eq!(sampler.avg_pm25(), Some(12.4));
        // One bounds query plus one feed query per station
        assert_eq!(server.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_sampling_run_fails_when_bounds_query_errors() {
        use crate::config::SamplerConfig;
        use crate::sampler::{RunStatus, Sampler};

        let server =
            StubServer::start(vec![("/map/bounds/", "500 Internal Server Error", "")]).await;
        let config = SamplerConfig::new(bbox(), 3, 2, TOKEN).unwrap();
        let mut sampler = Sampler::new(config, server.client());

        sampler.start_sampling().await;

        assert_eq!(sampler.status(), RunStatus::Failed);
        assert!(sampler.samples().unwrap().is_empty());
        assert_eq!(sampler.avg_pm25(), None);
        // No feed query was attempted
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_pm25_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = WaqiClient::with_settings(
            url,
            TOKEN,
            Duration::from_secs(1),
            RetryPolicy::fixed(2, Duration::from_millis(10)),
        )
        .unwrap();

        assert_eq!(client.fetch_pm25(Coordinate::new(1.0, 2.0)).await, None);
        assert!(client.discover_stations(&bbox()).await.is_empty());
    }
}
