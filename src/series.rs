// SHARDBENCH THROUGHPUT SERIES
// TURNS go-ycsb's CUMULATIVE PER-INTERVAL COUNTERS INTO A TIME SERIES OF
// INSTANTANEOUS THROUGHPUT: ONE (elapsed, delta ops/s) POINT PER INTERVAL.
//
// go-ycsb PRINTS CUMULATIVE Count VALUES. THE DELTA BETWEEN TWO INTERVALS
// DIVIDED BY THE ELAPSED DIFFERENCE IS THE THROUGHPUT OF THAT SLICE.
// WHEN THE ELAPSED CLOCK GOES BACKWARDS (WARMUP ENDS, COUNTERS RESET) A NEW
// EPOCH STARTS, OFFSET BY THE LAST EMITTED TIME SO elapsed NEVER REGRESSES.
//
// PRE-ALLOCATED RING BUFFER FOR THE IN-MEMORY COPY. THE FULL SERIES IS
// STREAMED TO DISK BY SeriesWriter AS POINTS ARRIVE.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{BenchError, Result};
use crate::report::{parse_lines, OpLine, TOTAL_OP};

const MAX_POINTS: usize = 8192;
const SAME_INTERVAL_EPS: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeriesPoint {
    pub elapsed_secs: f64,
    pub throughput:   f64,
}

// --- INTERVAL TRACKER ---

struct Interval {
    takes: f64,
    counts: BTreeMap<String, u64>,
}

impl Interval {
    // THE TOTAL ROLLUP IF PRESENT, OTHERWISE THE SUM OVER OPERATIONS
    fn count(&self) -> u64 {
        match self.counts.get(TOTAL_OP) {
            Some(&total) => total,
            None => self.counts.values().sum(),
        }
    }
}

pub struct IntervalTracker {
    pending:      Option<Interval>,
    base_takes:   f64,
    base_count:   u64,
    offset:       f64,
    last_elapsed: f64,
    latest_takes: f64,
}

impl IntervalTracker {
    pub fn new() -> Self {
        Self {
            pending: None,
            base_takes: 0.0,
            base_count: 0,
            offset: 0.0,
            last_elapsed: 0.0,
            latest_takes: 0.0,
        }
    }

    // ELAPSED TIME OF THE MOST RECENT LINE SEEN, IN THE LOAD GENERATOR'S CLOCK
    pub fn latest_takes(&self) -> f64 {
        self.latest_takes
    }

    // FEED ONE OR MORE RAW OUTPUT LINES. POINTS ARE EMITTED WHEN AN INTERVAL
    // IS KNOWN TO BE COMPLETE, I.E. WHEN THE NEXT ONE STARTS.
    pub fn feed(&mut self, text: &str) -> Vec<SeriesPoint> {
        let mut out = Vec::new();
        for line in parse_lines(text) {
            if let Some(p) = self.feed_line(line) {
                out.push(p);
            }
        }
        out
    }

    pub fn finish(&mut self) -> Option<SeriesPoint> {
        let interval = self.pending.take()?;
        self.close(interval)
    }

    fn feed_line(&mut self, line: OpLine) -> Option<SeriesPoint> {
        self.latest_takes = line.takes_secs;
        if let Some(cur) = self.pending.as_mut() {
            if (cur.takes - line.takes_secs).abs() < SAME_INTERVAL_EPS {
                cur.counts.insert(line.op, line.count);
                return None;
            }
        }
        let mut counts = BTreeMap::new();
        counts.insert(line.op, line.count);
        let finished = self.pending.replace(Interval {
            takes: line.takes_secs,
            counts,
        });
        finished.and_then(|interval| self.close(interval))
    }

    fn close(&mut self, interval: Interval) -> Option<SeriesPoint> {
        let count = interval.count();
        if interval.takes < self.base_takes - SAME_INTERVAL_EPS {
            // CLOCK RESTART
            self.offset = self.last_elapsed;
            self.base_takes = 0.0;
            self.base_count = 0;
            if interval.takes <= SAME_INTERVAL_EPS {
                // NEW CLOCK STARTS AT ZERO: THIS INTERVAL IS ONLY THE BASE
                self.base_count = count;
                return None;
            }
        } else if (interval.takes - self.base_takes).abs() < SAME_INTERVAL_EPS {
            // REPEATED INTERVAL: KEEP THE NEWER COUNT, EMIT NOTHING
            self.base_count = count;
            return None;
        }
        if count < self.base_count {
            self.base_count = 0;
        }

        let dt = interval.takes - self.base_takes;
        let delta = (count - self.base_count) as f64 / dt;
        let elapsed = self.offset + interval.takes;
        self.base_takes = interval.takes;
        self.base_count = count;
        self.last_elapsed = elapsed;
        Some(SeriesPoint {
            elapsed_secs: elapsed,
            throughput: delta,
        })
    }
}

impl Default for IntervalTracker {
    fn default() -> Self {
        Self::new()
    }
}

// --- IN-MEMORY SERIES ---

pub struct ThroughputSeries {
    points: Vec<SeriesPoint>,
    head:   usize,
    len:    usize,
}

impl ThroughputSeries {
    pub fn new() -> Self {
        Self {
            points: vec![SeriesPoint { elapsed_secs: 0.0, throughput: 0.0 }; MAX_POINTS],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, point: SeriesPoint) {
        self.points[self.head] = point;
        self.head = (self.head + 1) % MAX_POINTS;
        if self.len < MAX_POINTS {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // CHRONOLOGICAL ORDER
    pub fn iter(&self) -> impl Iterator<Item = &SeriesPoint> {
        let start = if self.len < MAX_POINTS { 0 } else { self.head };
        (0..self.len).map(move |i| &self.points[(start + i) % MAX_POINTS])
    }

    pub fn dump(&self) {
        if self.len == 0 {
            return;
        }
        println!("\n{:<12} {:<14}", "TIME_S", "OPS/S");
        println!("{}", "-".repeat(28));
        for p in self.iter() {
            println!("{:<12.1} {:<14.1}", p.elapsed_secs, p.throughput);
        }
        if self.len == MAX_POINTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} POINTS)", MAX_POINTS);
        }
        println!("TOTAL POINTS: {}", self.len);
    }

    pub fn summary(&self, marks: &[(f64, String)]) {
        if self.len < 2 {
            return;
        }
        let pts: Vec<&SeriesPoint> = self.iter().collect();
        let peak = pts.iter().map(|p| p.throughput).fold(0.0, f64::max);
        let avg = pts.iter().map(|p| p.throughput).sum::<f64>() / pts.len() as f64;
        let first = pts.first().map(|p| p.elapsed_secs).unwrap_or(0.0);
        let last = pts.last().map(|p| p.elapsed_secs).unwrap_or(0.0);

        println!("\n{}", "=".repeat(50));
        println!("MIGRATION SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  PEAK OPS/S:        {:.1}", peak);
        println!("  AVG OPS/S:         {:.1}", avg);
        for (at, label) in marks {
            let before = mean_between(&pts, at - 5.0, *at);
            let after = mean_between(&pts, *at, at + 5.0);
            println!(
                "  @{:<7.1} {:<24} {:>10.1} -> {:<10.1}",
                at, label, before, after
            );
        }
        println!("  ELAPSED:           {:.1}s", last - first);
        println!("  SAMPLES:           {}", self.len);
    }
}

impl Default for ThroughputSeries {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_between(pts: &[&SeriesPoint], from: f64, to: f64) -> f64 {
    let window: Vec<f64> = pts
        .iter()
        .filter(|p| p.elapsed_secs > from && p.elapsed_secs <= to)
        .map(|p| p.throughput)
        .collect();
    if window.is_empty() {
        0.0
    } else {
        window.iter().sum::<f64>() / window.len() as f64
    }
}

// --- CSV OUTPUT ---

// ONE "elapsed,delta" LINE PER POINT, FLUSHED AS IT IS WRITTEN
pub struct SeriesWriter {
    path: PathBuf,
    file: File,
}

impl SeriesWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| BenchError::io("creating output directory", dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BenchError::io("opening", &path, e))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, point: &SeriesPoint) -> Result<()> {
        writeln!(self.file, "{:.3},{:.3}", point.elapsed_secs, point.throughput)
            .and_then(|_| self.file.flush())
            .map_err(|e| BenchError::io("appending to", &self.path, e))
    }
}
