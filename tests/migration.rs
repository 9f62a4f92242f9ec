// SHARDBENCH MIGRATION TESTS
// BACKGROUND RECONFIGURATION AGAINST A SCRIPTED LOAD GENERATOR STREAM.
// OFFSETS ARE MILLISECONDS SO THE WHOLE FILE RUNS IN WELL UNDER A SECOND.

use std::time::{Duration, Instant};

use shardbench::cores::CoreSet;
use shardbench::migration::{run_migration, validate_events, MigrationEvent, ShardAdder};
use shardbench::topology::ShardSpec;
use shardbench::{BenchError, Result};

// ---------------------------------------------------------------------------
// HELPERS
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    ports: Vec<u16>,
    fail_port: Option<u16>,
}

impl ShardAdder for Recorder {
    fn add_shard(&mut self, shard: &ShardSpec) -> Result<()> {
        if Some(shard.port) == self.fail_port {
            return Err(BenchError::Topology(format!("refused {}", shard.addr())));
        }
        self.ports.push(shard.port);
        Ok(())
    }
}

fn event(ms: u64, port: u16, core: usize) -> MigrationEvent {
    MigrationEvent {
        offset: Duration::from_millis(ms),
        shard: ShardSpec::new(port, CoreSet::new([core]).unwrap()),
    }
}

fn three_events() -> Vec<MigrationEvent> {
    vec![event(30, 12301, 1), event(60, 12302, 2), event(90, 12303, 3)]
}

// ONE TOTAL LINE PER SECOND OF GENERATOR CLOCK, 1000 OPS PER SECOND,
// HANDED OUT EVERY 10ms OF WALL CLOCK
fn paced_stream(lines: u32) -> impl FnMut() -> Option<String> {
    let mut i = 0;
    move || {
        if i >= lines {
            return None;
        }
        i += 1;
        std::thread::sleep(Duration::from_millis(10));
        Some(format!(
            "TOTAL - Takes(s): {}.0, Count: {}, OPS: 1000.0, Avg(us): 900, Min(us): 100, Max(us): 5000, 99th(us): 2000, 99.9th(us): 3000, 99.99th(us): 4000",
            i,
            i * 1000
        ))
    }
}

// ---------------------------------------------------------------------------
// RUNS
// ---------------------------------------------------------------------------

#[test]
fn shards_join_in_order_while_series_streams() {
    let mut written = Vec::new();
    let (adder, outcome) = run_migration(
        Recorder::default(),
        three_events(),
        paced_stream(40),
        20.0,
        |p| {
            written.push(*p);
            Ok(())
        },
    )
    .unwrap();

    assert_eq!(adder.ports, vec![12301, 12302, 12303]);
    assert_eq!(outcome.applied.len(), 3);
    assert!(outcome.applied.iter().all(|a| a.ok));
    for a in &outcome.applied {
        assert!(a.started >= a.offset);
    }

    // STOPS AT Takes(s) 20 EVEN THOUGH THE STREAM HAS MORE
    assert_eq!(written.len(), 20);
    assert_eq!(outcome.series.len(), 20);
    for pair in written.windows(2) {
        assert!(pair[1].elapsed_secs > pair[0].elapsed_secs);
    }
    assert!(written.iter().all(|p| (p.throughput - 1000.0).abs() < 1e-6));
    assert_eq!(written.last().map(|p| p.elapsed_secs), Some(20.0));
}

#[test]
fn failed_add_is_recorded_and_run_continues() {
    let adder = Recorder {
        fail_port: Some(12302),
        ..Recorder::default()
    };
    let (adder, outcome) =
        run_migration(adder, three_events(), paced_stream(20), 20.0, |_| Ok(())).unwrap();

    assert_eq!(adder.ports, vec![12301, 12303]);
    let oks: Vec<bool> = outcome.applied.iter().map(|a| a.ok).collect();
    assert_eq!(oks, vec![true, false, true]);
}

#[test]
fn stream_end_cancels_pending_events() {
    let start = Instant::now();
    let (adder, outcome) = run_migration(
        Recorder::default(),
        vec![event(10_000, 12301, 1)],
        || None,
        120.0,
        |_| Ok(()),
    )
    .unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(adder.ports.is_empty());
    assert!(outcome.applied.is_empty());
    assert!(outcome.series.is_empty());
}

#[test]
fn writer_error_still_joins_background_task() {
    let start = Instant::now();
    let res = run_migration(
        Recorder::default(),
        vec![event(10_000, 12301, 1)],
        paced_stream(5),
        120.0,
        |_| Err(BenchError::Config("disk full".to_string())),
    );

    assert!(matches!(res, Err(BenchError::Config(_))));
    assert!(start.elapsed() < Duration::from_secs(2));
}

// ---------------------------------------------------------------------------
// VALIDATION
// ---------------------------------------------------------------------------

#[test]
fn offsets_must_strictly_increase() {
    let events = vec![event(60, 12301, 1), event(60, 12302, 2)];
    assert!(matches!(validate_events(&events), Err(BenchError::Config(_))));

    let events = vec![event(60, 12301, 1), event(30, 12302, 2)];
    assert!(validate_events(&events).is_err());

    assert!(validate_events(&three_events()).is_ok());
    assert!(validate_events(&[]).is_ok());
}

#[test]
fn late_shard_cannot_initialize() {
    let events = vec![MigrationEvent {
        offset: Duration::from_millis(30),
        shard: ShardSpec::initializer(12301, CoreSet::new([1]).unwrap()),
    }];
    assert!(validate_events(&events).is_err());

    // REJECTED BEFORE ANY THREAD STARTS
    let res = run_migration(Recorder::default(), events, || None, 1.0, |_| Ok(()));
    assert!(res.is_err());
}
