// SHARDBENCH ENGINE TESTS
// PEAK SEARCH AND LATENCY SWEEP AGAINST SYNTHETIC THROUGHPUT CURVES
//
// ALL TESTS USE CurveBench: NO PROCESSES, NO CLUSTER. RUN OFFLINE.

use std::cell::RefCell;

use shardbench::bench::{Bench, CurveBench};
use shardbench::record::{BenchmarkRecord, Measurement};
use shardbench::search::{PeakSearch, Refine, SearchConfig};
use shardbench::sweep::{LatencySweep, StopReason};
use shardbench::Result;

fn search(refine: Refine, width: u32) -> PeakSearch {
    PeakSearch::new(SearchConfig {
        width,
        refine,
        ..SearchConfig::default()
    })
    .unwrap()
}

// STRICTLY UNIMODAL, POSITIVE EVERYWHERE IN RANGE, PEAK AT t_star
fn hill(t_star: u32) -> impl FnMut(u32) -> f64 {
    move |t| 1e7 - (t as f64 - t_star as f64).powi(2)
}

fn trials(sink: &[BenchmarkRecord]) -> Vec<u32> {
    sink.iter().map(|r| r.num_threads).collect()
}

// === PEAK SEARCH: DEGENERATE CURVES ===

#[test]
fn flat_zero_stays_at_one() {
    for refine in [Refine::Upper, Refine::Bracket] {
        let mut bench = CurveBench::new("memkv", |_| 0.0);
        let mut sink = Vec::new();
        let res = search(refine, 4).run(&mut bench, &mut sink).unwrap();
        assert_eq!(res.threads, 1);
        assert_eq!(res.peak, 0.0);
        assert_eq!(trials(&sink), vec![2]);
    }
}

#[test]
fn constant_curve_settles_at_two() {
    let mut bench = CurveBench::new("memkv", |_| 500.0);
    let mut sink = Vec::new();
    let res = search(Refine::Upper, 4).run(&mut bench, &mut sink).unwrap();
    // 2 BEATS THE UNMEASURED SEED, 4 TIES AND DOES NOT COUNT
    assert_eq!(res.threads, 2);
    assert_eq!(res.peak, 500.0);
    assert_eq!(trials(&sink), vec![2, 4]);
}

#[test]
fn no_report_counts_as_zero() {
    struct Silent;
    impl Bench for Silent {
        fn service(&self) -> &str {
            "memkv"
        }
        fn measure(&mut self, _threads: u32) -> Result<Measurement> {
            Ok(Measurement::NoReport)
        }
    }
    let mut sink = Vec::new();
    let res = search(Refine::Upper, 4).run(&mut Silent, &mut sink).unwrap();
    assert_eq!(res.threads, 1);
    assert_eq!(sink.len(), 1);
    assert!(sink[0].stats.is_empty());
}

// === PEAK SEARCH: TRIAL SEQUENCE ===

#[test]
fn upper_trial_sequence() {
    // PEAK AT 40: DOUBLING 2 4 8 16 32 64, THEN BISECT (32, 64)
    let mut bench = CurveBench::new("memkv", hill(40));
    let mut sink = Vec::new();
    let res = search(Refine::Upper, 4).run(&mut bench, &mut sink).unwrap();
    // 48 TIES 32 (BOTH 8 AWAY): high=48 | 40 WINS: low=40 | 44, 42 LOSE -> DONE
    assert_eq!(trials(&sink), vec![2, 4, 8, 16, 32, 64, 48, 40, 44, 42]);
    assert_eq!(res.threads, 40);
    assert_eq!(res.measurements, 10);
    assert_eq!(res.state.high, Some(42));
}

#[test]
fn upper_search_only_trials_above_low() {
    // THE CLASSIC SEARCH NEVER REVISITS THE GAP BELOW ITS CURRENT BEST
    let mut bench = CurveBench::new("memkv", hill(70));
    let mut sink = Vec::new();
    search(Refine::Upper, 4).run(&mut bench, &mut sink).unwrap();
    let seq = trials(&sink);
    // DOUBLING ENDS AT 128; EVERY LATER TRIAL LIES IN (64, 128)
    let after = seq.iter().skip_while(|&&t| t != 128).skip(1);
    assert!(after.clone().count() > 0);
    assert!(after.into_iter().all(|&t| t > 64 && t < 128));
}

#[test]
fn bracket_search_always_within_width() {
    for width in [2u32, 4, 10] {
        for t_star in 1..=300u32 {
            let mut bench = CurveBench::new("memkv", hill(t_star));
            let mut sink = Vec::new();
            let res = search(Refine::Bracket, width).run(&mut bench, &mut sink).unwrap();
            assert!(
                res.threads.abs_diff(t_star) < width,
                "width={} t*={} got {} trials {:?}",
                width,
                t_star,
                res.threads,
                trials(&sink)
            );
        }
    }
}

#[test]
fn bracket_finds_knee_of_plateau() {
    let mut bench = CurveBench::new("memkv", |t| (t.min(100)) as f64);
    let mut sink = Vec::new();
    let res = search(Refine::Bracket, 4).run(&mut bench, &mut sink).unwrap();
    assert!(res.threads.abs_diff(100) < 4, "got {}", res.threads);
    assert_eq!(res.peak, 100.0);
}

#[test]
fn peak_never_decreases_across_trials() {
    let seen = RefCell::new(Vec::new());
    let mut bench = CurveBench::new("memkv", |t| {
        let v = hill(77)(t);
        seen.borrow_mut().push(v);
        v
    });
    let mut sink = Vec::new();
    let res = search(Refine::Upper, 4).run(&mut bench, &mut sink).unwrap();
    let best = seen.borrow().iter().cloned().fold(0.0, f64::max);
    assert_eq!(res.peak, best);
    assert_eq!(sink.len(), res.measurements);
}

#[test]
fn max_threads_caps_doubling() {
    let cfg = SearchConfig {
        max_threads: 100,
        ..SearchConfig::default()
    };
    let mut bench = CurveBench::new("memkv", |t| t as f64);
    let mut sink = Vec::new();
    let res = PeakSearch::new(cfg).unwrap().run(&mut bench, &mut sink).unwrap();
    assert!(trials(&sink).iter().all(|&t| t <= 100));
    assert!(res.threads > 96);
}

// === LATENCY SWEEP ===

#[test]
fn sweep_runs_at_least_window_plus_one() {
    let mut bench = CurveBench::new("memkv", |_| 100.0);
    let mut sink = Vec::new();
    let out = LatencySweep::new(|i: usize| Some(i as u32 + 1), 5)
        .run(&mut bench, &mut sink)
        .unwrap();
    assert_eq!(out.samples.len(), 6);
    assert_eq!(out.last_improving, 0);
    assert_eq!(out.stopped, StopReason::Plateau);
}

#[test]
fn sweep_stops_window_after_last_improvement() {
    let mut bench = CurveBench::new("memkv", |t| (t.min(8)) as f64);
    let mut sink = Vec::new();
    let out = LatencySweep::new(|i: usize| Some(i as u32 + 1), 5)
        .run(&mut bench, &mut sink)
        .unwrap();
    // LAST IMPROVEMENT AT INDEX 7 (8 THREADS), THEN INDICES 8..=12
    assert_eq!(out.last_improving, 7);
    assert_eq!(out.samples.len(), 13);
    assert_eq!(out.peak_threads, Some(8));
    assert_eq!(trials(&sink), (1..=13).collect::<Vec<u32>>());
}

#[test]
fn sweep_ends_with_schedule() {
    let mut bench = CurveBench::new("memkv", |t| t as f64);
    let mut sink = Vec::new();
    let out = LatencySweep::new(|i: usize| if i < 5 { Some(i as u32 + 1) } else { None }, 5)
        .run(&mut bench, &mut sink)
        .unwrap();
    assert_eq!(out.samples.len(), 5);
    assert_eq!(out.stopped, StopReason::ScheduleExhausted);
}
