// SHARDBENCH -- BENCHMARK ORCHESTRATION FOR SHARDED KEY-VALUE CLUSTERS
// LIBRARY SURFACE SHARED BY THE BINARY AND THE INTEGRATION TESTS.
//
// PURE (NO PROCESSES, TESTABLE OFFLINE):
//   report, record, schedule, search, sweep, series, topology, cores, config
// PROCESS PLUMBING:
//   supervisor, cluster, loadgen, migration, store

pub mod bench;
pub mod cluster;
pub mod config;
pub mod cores;
pub mod error;
pub mod loadgen;
pub mod logging;
pub mod migration;
pub mod record;
pub mod report;
pub mod schedule;
pub mod search;
pub mod series;
pub mod store;
pub mod supervisor;
pub mod sweep;
pub mod topology;

pub use error::{BenchError, Result};
