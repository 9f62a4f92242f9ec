// SHARDBENCH MEASUREMENT RECORDS
// ONE BenchmarkRecord PER LOAD RUN. JSON KEYS MATCH THE FILES THE PLOTTING
// SCRIPTS ALREADY READ (service / num_threads / ratelimit / lts).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::report::{self, OpStats};

pub const UNLIMITED_RATE: i64 = -1;

// OUTCOME OF ONE LOAD RUN. NoReport MEANS THE FINAL REPORT NEVER APPEARED
// (STREAM CLOSED, SPAWN FAILED): NO DATA, AS OPPOSED TO OBSERVED ZERO.
#[derive(Clone, Debug, PartialEq)]
pub enum Measurement {
    Sample(BTreeMap<String, OpStats>),
    NoReport,
}

impl Measurement {
    pub fn from_report(text: &str) -> Self {
        Self::Sample(report::parse(text))
    }

    pub fn throughput(&self) -> f64 {
        match self {
            Self::Sample(stats) => report::aggregate_throughput(stats),
            Self::NoReport => 0.0,
        }
    }

    pub fn is_report(&self) -> bool {
        matches!(self, Self::Sample(_))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub service: String,
    pub num_threads: u32,
    #[serde(rename = "ratelimit")]
    pub rate_limit: i64,
    #[serde(rename = "lts")]
    pub stats: BTreeMap<String, OpStats>,
}

impl BenchmarkRecord {
    pub fn new(service: &str, num_threads: u32, rate_limit: i64, measurement: &Measurement) -> Self {
        let stats = match measurement {
            Measurement::Sample(stats) => stats.clone(),
            Measurement::NoReport => BTreeMap::new(),
        };
        Self {
            service: service.to_string(),
            num_threads,
            rate_limit,
            stats,
        }
    }

    pub fn throughput(&self) -> f64 {
        report::aggregate_throughput(&self.stats)
    }
}

// ONE LINE PER PROFILE IN <service>_peaks.jsons
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakSummary {
    pub name: String,
    #[serde(rename = "thruput")]
    pub throughput: f64,
    #[serde(rename = "clntthreads")]
    pub client_threads: u32,
}
