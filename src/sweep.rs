// SHARDBENCH LATENCY SWEEP
// WALKS A THREAD SCHEDULE IN ORDER AND STOPS ONCE THROUGHPUT HAS NOT
// IMPROVED FOR `plateau_window` CONSECUTIVE STEPS, OR THE SCHEDULE ENDS.
//
// INDEX 0 ALWAYS COUNTS AS THE LAST IMPROVEMENT WHEN NOTHING BEATS ZERO,
// SO EVEN A FLAT CURVE TAKES plateau_window + 1 MEASUREMENTS.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bench::{measure_and_record, Bench};
use crate::error::{BenchError, Result};
use crate::schedule::{Schedule, ThreadSchedule};
use crate::store::RecordSink;

pub const DEFAULT_PLATEAU_WINDOW: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub plateau_window: usize,
    pub schedule: ThreadSchedule,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            plateau_window: DEFAULT_PLATEAU_WINDOW,
            schedule: ThreadSchedule::default(),
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.plateau_window == 0 {
            return Err(BenchError::Config("sweep.plateau_window must be at least 1".to_string()));
        }
        if self.schedule.start == 0 {
            return Err(BenchError::Config("sweep.schedule.start must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Plateau,
    ScheduleExhausted,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SweepOutcome {
    // (threads, throughput) IN SCHEDULE ORDER
    pub samples: Vec<(u32, f64)>,
    pub peak: f64,
    pub peak_threads: Option<u32>,
    pub last_improving: usize,
    pub stopped: StopReason,
}

pub struct LatencySweep<S> {
    schedule: S,
    window: usize,
}

impl<S: Schedule> LatencySweep<S> {
    pub fn new(schedule: S, window: usize) -> Self {
        Self {
            schedule,
            window: window.max(1),
        }
    }

    pub fn run<B, K>(&self, bench: &mut B, sink: &mut K) -> Result<SweepOutcome>
    where
        B: Bench + ?Sized,
        K: RecordSink + ?Sized,
    {
        let mut samples = Vec::new();
        let mut peak = 0.0;
        let mut peak_threads = None;
        let mut last_improving = 0usize;
        let mut index = 0usize;

        let stopped = loop {
            if index > last_improving + self.window {
                break StopReason::Plateau;
            }
            let Some(threads) = self.schedule.threads_at(index) else {
                break StopReason::ScheduleExhausted;
            };
            let throughput = measure_and_record(bench, sink, threads)?;
            samples.push((threads, throughput));
            if throughput > peak {
                peak = throughput;
                peak_threads = Some(threads);
                last_improving = index;
            }
            index += 1;
        };

        info!(
            "SWEEP DONE: {} STEPS, PEAK {:.1} OPS/S AT {:?} THREADS ({:?})",
            samples.len(),
            peak,
            peak_threads,
            stopped
        );
        Ok(SweepOutcome {
            samples,
            peak,
            peak_threads,
            last_improving,
            stopped,
        })
    }
}

impl LatencySweep<ThreadSchedule> {
    pub fn from_config(cfg: &SweepConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::new(cfg.schedule.clone(), cfg.plateau_window))
    }
}
