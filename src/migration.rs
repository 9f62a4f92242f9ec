// SHARDBENCH MIGRATION EXPERIMENT
// MEASURES THROUGHPUT OVER TIME WHILE SHARDS JOIN A LIVE CLUSTER.
//
// TWO THREADS, NO SHARED STATE:
//   FOREGROUND: READS LOAD GENERATOR OUTPUT, TURNS IT INTO SERIES POINTS,
//               APPENDS EACH POINT AS IT ARRIVES. ENDS AT THE RUN DURATION
//               OR WHEN THE STREAM CLOSES.
//   BACKGROUND: WAITS FOR EACH EVENT OFFSET AND ADDS ONE SHARD. THE WAIT IS
//               A recv_timeout ON A STOP CHANNEL SO CANCELLATION IS
//               IMMEDIATE. THE ADDER (AND THE PROCESSES IT OWNS) IS HANDED
//               BACK ON JOIN.
//
// THE BACKGROUND TASK IS ALWAYS CANCELLED AND JOINED BEFORE THE DRIVER
// RETURNS, WHETHER THE FOREGROUND FINISHED CLEANLY OR NOT.

use std::sync::mpsc::{self, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::ClusterController;
use crate::error::{BenchError, Result};
use crate::series::{IntervalTracker, SeriesPoint, ThroughputSeries};
use crate::topology::ShardSpec;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MigrationEvent {
    #[serde(with = "secs")]
    pub offset: Duration,
    pub shard: ShardSpec,
}

// TOML CARRIES OFFSETS AS FRACTIONAL SECONDS
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let v = f64::deserialize(d)?;
        Duration::try_from_secs_f64(v).map_err(serde::de::Error::custom)
    }
}

pub fn validate_events(events: &[MigrationEvent]) -> Result<()> {
    for pair in events.windows(2) {
        if pair[1].offset <= pair[0].offset {
            return Err(BenchError::Config(format!(
                "migration event offsets must strictly increase ({:?} then {:?})",
                pair[0].offset, pair[1].offset
            )));
        }
    }
    if let Some(e) = events.iter().find(|e| e.shard.is_initializer) {
        return Err(BenchError::Config(format!(
            "migration shard {} cannot be an initializer",
            e.shard.addr()
        )));
    }
    Ok(())
}

pub trait ShardAdder: Send + 'static {
    fn add_shard(&mut self, shard: &ShardSpec) -> Result<()>;
}

impl ShardAdder for ClusterController {
    fn add_shard(&mut self, shard: &ShardSpec) -> Result<()> {
        ClusterController::add_shard(self, shard.clone())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppliedEvent {
    pub offset: Duration,
    // WHEN THE ADD ACTUALLY STARTED, RELATIVE TO TASK START
    pub started: Duration,
    pub shard: ShardSpec,
    pub ok: bool,
}

// --- BACKGROUND TASK ---

pub struct Reconfigurator<A> {
    stop: Sender<()>,
    handle: JoinHandle<(A, Vec<AppliedEvent>)>,
}

impl<A: ShardAdder> Reconfigurator<A> {
    pub fn spawn(mut adder: A, events: Vec<MigrationEvent>) -> Result<Self> {
        validate_events(&events)?;
        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("reconfig".to_string())
            .spawn(move || {
                let start = Instant::now();
                let mut applied = Vec::with_capacity(events.len());
                for event in events {
                    let now = start.elapsed();
                    let cancelled = if event.offset > now {
                        !matches!(
                            stop_rx.recv_timeout(event.offset - now),
                            Err(RecvTimeoutError::Timeout)
                        )
                    } else {
                        !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty))
                    };
                    if cancelled {
                        break;
                    }
                    let started = start.elapsed();
                    let ok = match adder.add_shard(&event.shard) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("ADD SHARD {} FAILED: {}", event.shard.addr(), e);
                            false
                        }
                    };
                    applied.push(AppliedEvent {
                        offset: event.offset,
                        started,
                        shard: event.shard,
                        ok,
                    });
                }
                (adder, applied)
            })
            .map_err(|e| BenchError::Spawn {
                program: "reconfig thread".to_string(),
                source: e,
            })?;
        Ok(Self { stop, handle })
    }

    // STOPS WAITING FOR FURTHER EVENTS. AN add_shard ALREADY IN FLIGHT RUNS
    // TO COMPLETION FIRST.
    pub fn cancel_and_join(self) -> Result<(A, Vec<AppliedEvent>)> {
        let _ = self.stop.send(());
        self.handle
            .join()
            .map_err(|_| BenchError::TaskPanicked("reconfig"))
    }
}

// --- DRIVER ---

pub struct MigrationOutcome {
    pub series: ThroughputSeries,
    pub applied: Vec<AppliedEvent>,
}

// next_line YIELDS RAW LOAD GENERATOR OUTPUT; None ENDS THE STREAM.
// run_secs IS MEASURED ON THE LOAD GENERATOR'S OWN CLOCK.
pub fn run_migration<A, L, W>(
    adder: A,
    events: Vec<MigrationEvent>,
    mut next_line: L,
    run_secs: f64,
    mut on_point: W,
) -> Result<(A, MigrationOutcome)>
where
    A: ShardAdder,
    L: FnMut() -> Option<String>,
    W: FnMut(&SeriesPoint) -> Result<()>,
{
    let task = Reconfigurator::spawn(adder, events)?;
    info!("MIGRATION RUN STARTED ({:.0}s)", run_secs);

    let mut tracker = IntervalTracker::new();
    let mut series = ThroughputSeries::new();
    let mut foreground = || -> Result<()> {
        while let Some(line) = next_line() {
            for p in tracker.feed(&line) {
                on_point(&p)?;
                series.push(p);
            }
            if tracker.latest_takes() >= run_secs {
                break;
            }
        }
        if let Some(p) = tracker.finish() {
            on_point(&p)?;
            series.push(p);
        }
        Ok(())
    };
    let result = foreground();

    let (adder, applied) = task.cancel_and_join()?;
    result?;
    info!(
        "MIGRATION RUN DONE: {} POINTS, {} SHARD ADD(S)",
        series.len(),
        applied.len()
    );
    Ok((adder, MigrationOutcome { series, applied }))
}
