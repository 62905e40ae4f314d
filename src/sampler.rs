//! The sampling run: station discovery, timed loop and run status.
//!
//! A `Sampler` drives one run at a time. The run status is the only state
//! shared with other tasks; it lives behind an `Arc` so a `StopHandle` can
//! request a stop while `start_sampling` is in progress. Stops are observed
//! at interval boundaries: a round of station fetches that has started
//! always completes.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::client::AqiSource;
use crate::config::SamplerConfig;
use crate::geo::Coordinate;
use crate::observer::{RunEvent, SamplerObserver, TracingObserver};

/// Lifecycle of a sampling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RunStatus {
    Idle = 0,
    Running = 1,
    Stopped = 2,
    Done = 3,
    Failed = 4,
}

impl RunStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunStatus::Running,
            2 => RunStatus::Stopped,
            3 => RunStatus::Done,
            4 => RunStatus::Failed,
            _ => RunStatus::Idle,
        }
    }

    /// DONE, FAILED and STOPPED end a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Stopped | RunStatus::Done | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "IDLE",
            RunStatus::Running => "RUNNING",
            RunStatus::Stopped => "STOPPED",
            RunStatus::Done => "DONE",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status cell shared between the run and its stop handles.
#[derive(Debug)]
struct SharedStatus {
    status: AtomicU8,
    // Wakes the interval sleep when a stop is requested.
    wake: Notify,
}

impl SharedStatus {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(RunStatus::Idle as u8),
            wake: Notify::new(),
        }
    }

    fn load(&self) -> RunStatus {
        RunStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn store(&self, status: RunStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; false if the status was not `from`.
    fn transition(&self, from: RunStatus, to: RunStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cloneable handle for stopping a run from another task or thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<SharedStatus>,
}

impl StopHandle {
    /// Request a stop. Only a RUNNING run is affected; returns whether the
    /// status changed.
    pub fn stop(&self) -> bool {
        let stopped = self.shared.transition(RunStatus::Running, RunStatus::Stopped);
        if stopped {
            self.shared.wake.notify_one();
        }
        stopped
    }

    pub fn status(&self) -> RunStatus {
        self.shared.load()
    }
}

/// Average PM2.5 of one sampling interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the interval's fetches completed
    pub timestamp: DateTime<Utc>,

    /// Arithmetic mean of the readings
    pub pm25: f64,

    /// Number of stations that returned a reading
    pub stations_reporting: usize,
}

impl Sample {
    /// Average `readings`; `None` if there are none.
    pub fn from_readings(readings: &[f64]) -> Option<Self> {
        Some(Self {
            timestamp: Utc::now(),
            pm25: mean(readings)?,
            stations_reporting: readings.len(),
        })
    }
}

/// Ordered samples of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.pm25).collect()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Mean of all sample values, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        mean(&self.values())
    }
}

impl<'a> IntoIterator for &'a SampleSet {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Serializable summary of the last run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingReport {
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub stations: usize,
    pub samples: Option<SampleSet>,
    pub avg_pm25: Option<f64>,
}

/// Samples PM2.5 over a bounding box from an `AqiSource`.
///
/// # Example
///
/// ```no_run
/// use aqi_sampler::client::WaqiClient;
/// use aqi_sampler::config::{Config, SamplerConfig};
/// use aqi_sampler::geo::BoundingBox;
/// use aqi_sampler::sampler::Sampler;
///
/// #[tokio::main]
/// async fn main() {
///     let bbox = BoundingBox::new(45.69, -73.54, 45.37, -73.74);
///     let config = Config::new(SamplerConfig::new(bbox, 2, 1, "token").unwrap());
///     let client = WaqiClient::new(&config).unwrap();
///
///     let mut sampler = Sampler::new(config.sampler.clone(), client);
///     sampler.start_sampling().await;
///     println!("{}: {:?}", sampler.status(), sampler.avg_pm25());
/// }
/// ```
pub struct Sampler<S> {
    config: SamplerConfig,
    source: S,
    observer: Arc<dyn SamplerObserver>,
    shared: Arc<SharedStatus>,
    stations: Vec<Coordinate>,
    // None until a run has been attempted.
    samples: Option<SampleSet>,
    run_id: Option<Uuid>,
}

impl<S: AqiSource> Sampler<S> {
    /// Create an idle sampler reporting to the tracing observer.
    pub fn new(config: SamplerConfig, source: S) -> Self {
        Self {
            config,
            source,
            observer: Arc::new(TracingObserver),
            shared: Arc::new(SharedStatus::new()),
            stations: Vec::new(),
            samples: None,
            run_id: None,
        }
    }

    /// Replace the observer that receives run events.
    pub fn with_observer(mut self, observer: Arc<dyn SamplerObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Handle for stopping runs of this sampler from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.shared.clone(),
        }
    }

    /// Query the source once for the stations in the configured area.
    pub async fn discover_stations(&self) -> Vec<Coordinate> {
        self.source.discover_stations(self.config.bbox()).await
    }

    /// Current PM2.5 reading of one station, `None` if it could not be obtained.
    pub async fn fetch_station_pm25(&self, station: Coordinate) -> Option<f64> {
        self.source.fetch_pm25(station).await
    }

    /// Run a full sampling run.
    ///
    /// Returns once the run has reached DONE, FAILED or STOPPED. The
    /// outcome is reported through `status()` only.
    pub async fn start_sampling(&mut self) {
        let run_id = Uuid::new_v4();
        let span = info_span!("sampling_run", run_id = %run_id);
        self.run(run_id).instrument(span).await;
    }

    async fn run(&mut self, run_id: Uuid) {
        self.run_id = Some(run_id);
        self.samples = Some(SampleSet::new());
        self.stations.clear();
        self.shared.store(RunStatus::Running);

        let total_samples = self.config.total_samples();
        let interval = self.config.interval();
        self.emit(
            run_id,
            RunEvent::Started {
                total_samples,
                interval,
            },
        );

        let stations = self.discover_stations().await;
        if stations.is_empty() {
            self.emit(run_id, RunEvent::DiscoveryFailed);
            self.finish(run_id, RunStatus::Failed, 0);
            return;
        }
        self.emit(
            run_id,
            RunEvent::StationsDiscovered {
                count: stations.len(),
            },
        );
        self.stations = stations;

        for index in 0..total_samples {
            if self.shared.load() == RunStatus::Stopped {
                self.emit(
                    run_id,
                    RunEvent::Stopped {
                        completed_intervals: index,
                    },
                );
                return;
            }

            let interval_number = index + 1;
            let readings = self.collect_readings().await;
            match Sample::from_readings(&readings) {
                Some(sample) => {
                    self.emit(
                        run_id,
                        RunEvent::SampleCollected {
                            interval: interval_number,
                            sample: sample.clone(),
                        },
                    );
                    self.samples.get_or_insert_with(SampleSet::new).push(sample);
                }
                None => self.emit(
                    run_id,
                    RunEvent::IntervalEmpty {
                        interval: interval_number,
                    },
                ),
            }

            if interval_number < total_samples {
                self.wait_for_next_interval(interval).await;
            }
        }

        let outcome = if self.samples.as_ref().is_some_and(|s| !s.is_empty()) {
            RunStatus::Done
        } else {
            RunStatus::Failed
        };
        self.finish(run_id, outcome, total_samples);
    }

    /// Leave RUNNING for `outcome` unless a stop got there first.
    fn finish(&self, run_id: Uuid, outcome: RunStatus, completed_intervals: u64) {
        if self.shared.transition(RunStatus::Running, outcome) {
            let samples = self.samples.as_ref().map_or(0, SampleSet::len);
            self.emit(
                run_id,
                RunEvent::Finished {
                    status: outcome,
                    samples,
                },
            );
        } else {
            self.emit(
                run_id,
                RunEvent::Stopped {
                    completed_intervals,
                },
            );
        }
    }

    /// Fetch every station once and keep the readings that arrived.
    async fn collect_readings(&self) -> Vec<f64> {
        let mut readings = Vec::with_capacity(self.stations.len());
        for station in &self.stations {
            if let Some(value) = self.fetch_station_pm25(*station).await {
                readings.push(value);
            }
        }
        readings
    }

    /// Sleep for `interval`, returning early if the run is stopped meanwhile.
    async fn wait_for_next_interval(&self, interval: Duration) {
        let deadline = Instant::now() + interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                _ = self.shared.wake.notified() => {
                    if self.shared.load() != RunStatus::Running {
                        return;
                    }
                }
            }
        }
    }

    fn emit(&self, run_id: Uuid, event: RunEvent) {
        self.observer.on_event(run_id, &event);
    }

    /// Stop the current run if it is RUNNING; no-op otherwise.
    pub fn stop_sampling(&self) -> bool {
        self.stop_handle().stop()
    }

    pub fn status(&self) -> RunStatus {
        self.shared.load()
    }

    /// Average over the run's samples, available only once the run is DONE.
    pub fn avg_pm25(&self) -> Option<f64> {
        if self.status() != RunStatus::Done {
            return None;
        }
        self.samples.as_ref().and_then(SampleSet::mean)
    }

    /// Samples of the last run; `None` if no run was attempted.
    pub fn samples(&self) -> Option<&SampleSet> {
        self.samples.as_ref()
    }

    /// Stations discovered by the last run.
    pub fn stations(&self) -> &[Coordinate] {
        &self.stations
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    pub fn report(&self) -> SamplingReport {
        SamplingReport {
            run_id: self.run_id,
            status: self.status(),
            stations: self.stations.len(),
            samples: self.samples.clone(),
            avg_pm25: self.avg_pm25(),
        }
    }
}
