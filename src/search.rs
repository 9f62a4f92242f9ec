// SHARDBENCH PEAK SEARCH
// FINDS THE CLIENT THREAD COUNT THAT MAXIMIZES THROUGHPUT.
//
// PHASE 1 (DOUBLING): low = 1, TRIAL 2*low UNTIL THROUGHPUT STOPS IMPROVING.
//                     THE FIRST NON-IMPROVING TRIAL BECOMES high.
// PHASE 2 (BISECT):   TRIAL (low + high) / 2 UNTIL high - low < width.
//                     IMPROVING TRIALS MOVE low UP, OTHERS PULL high DOWN.
//
// A TRIAL ONLY COUNTS AS IMPROVING WHEN IT IS STRICTLY ABOVE THE BEST SEEN,
// SO TIES RESOLVE TOWARD FEWER THREADS. THE STARTING POINT low = 1 IS NEVER
// MEASURED: IT IS SEEDED AT ZERO THROUGHPUT.
//
// Refine::Upper IS THE CLASSIC SEARCH ABOVE. IT ONLY EVER TRIALS ABOVE low,
// SO IF THE TRUE PEAK SITS BETWEEN THE PREVIOUS DOUBLING POINT AND low IT
// STOPS AT low, POSSIBLY MANY THREADS OFF. Refine::Bracket (DEFAULT) ALSO
// TRACKS floor (THE LAST POINT KNOWN TO BE BELOW THE PEAK) AND BISECTS
// WHICHEVER SIDE OF low IS WIDER. FOR A UNIMODAL CURVE THE PEAK STAYS IN
// [floor, high], SO THE RESULT LANDS WITHIN width OF IT.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bench::{measure_and_record, Bench};
use crate::error::{BenchError, Result};
use crate::store::RecordSink;

// --- DEFAULTS ---

pub const DEFAULT_WIDTH: u32       = 4;
pub const DEFAULT_MAX_THREADS: u32 = 65_536;

// --- CONFIG ---

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Refine {
    Upper,
    #[default]
    Bracket,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub width: u32,
    pub max_threads: u32,
    pub refine: Refine,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            max_threads: DEFAULT_MAX_THREADS,
            refine: Refine::Bracket,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width < 2 {
            return Err(BenchError::Config(format!(
                "search.width must be at least 2, got {}",
                self.width
            )));
        }
        if self.max_threads < 1 {
            return Err(BenchError::Config("search.max_threads must be at least 1".to_string()));
        }
        Ok(())
    }
}

// --- STATE ---

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchState {
    pub low: u32,
    pub high: Option<u32>,
    pub floor: u32,
    pub peak: f64,
}

impl SearchState {
    pub fn new() -> Self {
        Self {
            low: 1,
            high: None,
            floor: 0,
            peak: 0.0,
        }
    }

    // FOLD ONE MEASUREMENT IN. RETURNS WHETHER low MOVED.
    pub fn observe(&mut self, threads: u32, throughput: f64) -> bool {
        if threads > self.low {
            if throughput > self.peak {
                self.floor = self.low;
                self.low = threads;
                self.peak = throughput;
                true
            } else {
                self.high = Some(threads);
                false
            }
        } else if throughput >= self.peak {
            // BELOW low: AN EQUAL RESULT WITH FEWER THREADS WINS
            self.high = Some(self.low);
            self.low = threads;
            self.peak = throughput;
            true
        } else {
            self.floor = threads;
            false
        }
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trial {
    Measure(u32),
    // DOUBLING WOULD PASS max_threads: CLOSE THE BRACKET WITHOUT MEASURING
    Cap(u32),
    Done,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PeakResult {
    pub threads: u32,
    pub peak: f64,
    pub measurements: usize,
    pub state: SearchState,
}

// --- ENGINE ---

pub struct PeakSearch {
    cfg: SearchConfig,
}

impl PeakSearch {
    pub fn new(cfg: SearchConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.cfg
    }

    pub fn next_trial(&self, st: &SearchState) -> Trial {
        let Some(high) = st.high else {
            let next = st.low.saturating_mul(2);
            return if next > self.cfg.max_threads {
                Trial::Cap(self.cfg.max_threads.saturating_add(1))
            } else {
                Trial::Measure(next)
            };
        };

        let width = self.cfg.width;
        let right = high.saturating_sub(st.low);
        let left = st.low.saturating_sub(st.floor);
        match self.cfg.refine {
            Refine::Upper if right < width => Trial::Done,
            Refine::Upper => Trial::Measure(st.low + right / 2),
            Refine::Bracket if right < width && left < width => Trial::Done,
            Refine::Bracket if right >= left => Trial::Measure(st.low + right / 2),
            Refine::Bracket => Trial::Measure(st.floor + left / 2),
        }
    }

    // EVERY MEASUREMENT IS APPENDED TO sink BEFORE IT STEERS THE SEARCH
    pub fn run<B, S>(&self, bench: &mut B, sink: &mut S) -> Result<PeakResult>
    where
        B: Bench + ?Sized,
        S: RecordSink + ?Sized,
    {
        let mut st = SearchState::new();
        let mut measurements = 0usize;
        loop {
            let threads = match self.next_trial(&st) {
                Trial::Done => break,
                Trial::Cap(cap) => {
                    debug!("PEAK SEARCH: CAPPED AT {} THREADS", cap - 1);
                    st.high = Some(cap);
                    continue;
                }
                Trial::Measure(t) => t,
            };
            let throughput = measure_and_record(bench, sink, threads)?;
            measurements += 1;
            let moved = st.observe(threads, throughput);
            debug!(
                "PEAK SEARCH: t={} thruput={:.1} {} floor={} low={} high={:?}",
                threads,
                throughput,
                if moved { "MOVED" } else { "HELD" },
                st.floor,
                st.low,
                st.high,
            );
        }
        info!(
            "PEAK {:.1} OPS/S AT {} THREADS ({} RUNS)",
            st.peak, st.low, measurements
        );
        Ok(PeakResult {
            threads: st.low,
            peak: st.peak,
            measurements,
            state: st,
        })
    }
}
