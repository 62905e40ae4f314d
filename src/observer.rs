//! Run observers.
//!
//! The sampler reports its progress as `RunEvent`s to an injected
//! `SamplerObserver` instead of writing to a global logger. The default
//! observer forwards every event to `tracing`.

use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::sampler::{RunStatus, Sample};

/// Something that happened during a sampling run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// The run entered RUNNING
    Started {
        total_samples: u64,
        interval: Duration,
    },

    /// Station discovery returned at least one station
    StationsDiscovered { count: usize },

    /// Station discovery returned nothing; the run fails
    DiscoveryFailed,

    /// An interval produced an average
    SampleCollected { interval: u64, sample: Sample },

    /// No station reported during an interval
    IntervalEmpty { interval: u64 },

    /// A stop request ended the run
    Stopped { completed_intervals: u64 },

    /// The loop ran to completion
    Finished { status: RunStatus, samples: usize },
}

/// Receives the events of every run of a sampler.
pub trait SamplerObserver: Send + Sync {
    fn on_event(&self, run_id: Uuid, event: &RunEvent);
}

/// Observer that emits each event as a `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SamplerObserver for TracingObserver {
    fn on_event(&self, run_id: Uuid, event: &RunEvent) {
        match event {
            RunEvent::Started {
                total_samples,
                interval,
            } => info!(
                run_id = %run_id,
                total_samples = total_samples,
                interval_secs = interval.as_secs_f64(),
                "Starting sampling"
            ),
            RunEvent::StationsDiscovered { count } => {
                info!(run_id = %run_id, stations = count, "Sampling stations")
            }
            RunEvent::DiscoveryFailed => {
                error!(run_id = %run_id, "No stations found within the specified area")
            }
            RunEvent::SampleCollected { interval, sample } => info!(
                run_id = %run_id,
                interval = interval,
                pm25 = sample.pm25,
                stations_reporting = sample.stations_reporting,
                "Collected PM2.5 data"
            ),
            RunEvent::IntervalEmpty { interval } => warn!(
                run_id = %run_id,
                interval = interval,
                "No PM2.5 data collected in this interval"
            ),
            RunEvent::Stopped {
                completed_intervals,
            } => info!(
                run_id = %run_id,
                completed_intervals = completed_intervals,
                "Sampling was manually stopped"
            ),
            RunEvent::Finished { status, samples } => match status {
                RunStatus::Done => info!(
                    run_id = %run_id,
                    samples = samples,
                    "Sampling completed successfully"
                ),
                _ => error!(
                    run_id = %run_id,
                    status = %status,
                    "Sampling failed. No data collected"
                ),
            },
        }
    }
}
