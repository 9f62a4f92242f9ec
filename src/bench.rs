// SHARDBENCH MEASUREMENT SEAM
// THE SEARCH AND SWEEP ENGINES SEE A BENCHMARK AS "THREADS IN, MEASUREMENT
// OUT". THE REAL IMPLEMENTATION DRIVES go-ycsb (loadgen::YcsbBench); TESTS
// PLUG IN PURE THROUGHPUT CURVES.

use tracing::{info, warn};

use crate::error::Result;
use crate::record::{BenchmarkRecord, Measurement, UNLIMITED_RATE};
use crate::store::RecordSink;

pub trait Bench {
    fn service(&self) -> &str;

    fn rate_limit(&self) -> i64 {
        UNLIMITED_RATE
    }

    fn measure(&mut self, threads: u32) -> Result<Measurement>;
}

// ANY f(threads) -> throughput IS A BENCH. THE SAMPLE CARRIES ONE TOTAL LINE.
pub struct CurveBench<F> {
    service: String,
    curve: F,
}

impl<F: FnMut(u32) -> f64> CurveBench<F> {
    pub fn new(service: &str, curve: F) -> Self {
        Self {
            service: service.to_string(),
            curve,
        }
    }
}

impl<F: FnMut(u32) -> f64> Bench for CurveBench<F> {
    fn service(&self) -> &str {
        &self.service
    }

    fn measure(&mut self, threads: u32) -> Result<Measurement> {
        let ops = (self.curve)(threads);
        let line = format!(
            "TOTAL  - Takes(s): 1.0, Count: {}, OPS: {:.6}, Avg(us): 0, Min(us): 0, Max(us): 0",
            ops.max(0.0) as u64,
            ops
        );
        Ok(Measurement::from_report(&line))
    }
}

// ONE STEP OF EITHER ENGINE: MEASURE, PERSIST, THEN HAND BACK THE SCALAR.
// THE RECORD IS WRITTEN BEFORE THE CALLER ACTS ON THE RESULT.
pub(crate) fn measure_and_record<B: Bench + ?Sized, S: RecordSink + ?Sized>(
    bench: &mut B,
    sink: &mut S,
    threads: u32,
) -> Result<f64> {
    let measurement = bench.measure(threads)?;
    let record = BenchmarkRecord::new(bench.service(), threads, bench.rate_limit(), &measurement);
    sink.append(&record)?;
    let throughput = measurement.throughput();
    if measurement.is_report() {
        info!("THREADS {:>6} -> {:>12.1} OPS/S", threads, throughput);
    } else {
        warn!("THREADS {:>6} -> NO REPORT (COUNTED AS 0)", threads);
    }
    Ok(throughput)
}
