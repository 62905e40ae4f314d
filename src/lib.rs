//! AQI Sampler Library
//!
//! This library samples PM2.5 readings from WAQI monitoring stations inside
//! a bounding box and averages them over a sampling period:
//!
//! - **config**: Run parameters and environment-based configuration
//! - **geo**: Coordinates and bounding boxes
//! - **client**: `AqiSource` seam and the WAQI HTTP client
//! - **retry**: Retry policy used by the client
//! - **observer**: Run events and the tracing observer
//! - **sampler**: The sampling run and its status state machine
//!
//! # Example
//!
//! ```no_run
//! use aqi_sampler::config::Config;
//! use aqi_sampler::client::WaqiClient;
//! use aqi_sampler::sampler::Sampler;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Create HTTP client
//!     let client = WaqiClient::new(&config).expect("Failed to create client");
//!
//!     // Run one sampling run
//!     let mut sampler = Sampler::new(config.sampler.clone(), client);
//!     sampler.start_sampling().await;
//!
//!     match sampler.avg_pm25() {
//!         Some(avg) => println!("Final average PM2.5: {avg}"),
//!         None => println!("No PM2.5 data available ({})", sampler.status()),
//!     }
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod geo;
pub mod observer;
pub mod retry;
pub mod sampler;

// Re-export commonly used types at crate root for convenience
pub use client::{AqiSource, ClientError, WaqiClient};
pub use config::{Config, ConfigError, SamplerConfig};
pub use geo::{BoundingBox, Coordinate, ParseBoundsError};
pub use observer::{RunEvent, SamplerObserver, TracingObserver};
pub use retry::{Backoff, RetryError, RetryPolicy};
pub use sampler::{RunStatus, Sample, SampleSet, Sampler, SamplingReport, StopHandle};
