// SHARDBENCH RESULT STORE TESTS
// RECORDS BUILT FROM REAL go-ycsb REPORT TEXT, WRITTEN AND READ BACK THROUGH
// THE JSON LINES FILES THE EXPERIMENTS PRODUCE.

use shardbench::record::{BenchmarkRecord, Measurement, PeakSummary, UNLIMITED_RATE};
use shardbench::store::{JsonLines, RecordSink, ResultStore};

const REPORT: &str = "\
READ   - Takes(s): 10.0, Count: 950000, OPS: 95000.0, Avg(us): 410, Min(us): 30, Max(us): 9000, 99th(us): 1200, 99.9th(us): 3000, 99.99th(us): 7000
UPDATE - Takes(s): 10.0, Count: 50000, OPS: 5000.0, Avg(us): 520, Min(us): 40, Max(us): 9100, 99th(us): 1500, 99.9th(us): 3100, 99.99th(us): 7100
TOTAL  - Takes(s): 10.0, Count: 1000000, OPS: 100000.0, Avg(us): 415, Min(us): 30, Max(us): 9100, 99th(us): 1250, 99.9th(us): 3050, 99.99th(us): 7050";

#[test]
fn records_survive_reopen_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memkv_peak_raw.jsons");

    {
        let mut store = ResultStore::create(&path).unwrap();
        for threads in [2, 4, 8] {
            let m = Measurement::from_report(REPORT);
            store
                .append(&BenchmarkRecord::new("memkv", threads, UNLIMITED_RATE, &m))
                .unwrap();
        }
    }
    // REOPENING APPENDS, IT NEVER TRUNCATES
    let mut store = ResultStore::create(&path).unwrap();
    store
        .append(&BenchmarkRecord::new("memkv", 16, UNLIMITED_RATE, &Measurement::NoReport))
        .unwrap();

    let back = store.read_all().unwrap();
    let threads: Vec<u32> = back.iter().map(|r| r.num_threads).collect();
    assert_eq!(threads, vec![2, 4, 8, 16]);

    // READ + UPDATE, NOT THE TOTAL ROLLUP
    assert_eq!(back[0].throughput(), 100000.0);
    assert_eq!(back[0].stats["UPDATE"].average_latency_us, 520.0);
    assert!(back[3].stats.is_empty());
    assert_eq!(back[3].throughput(), 0.0);
}

#[test]
fn record_json_uses_plot_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.jsons");
    let store = ResultStore::create(&path).unwrap();
    let m = Measurement::from_report(REPORT);
    store.write(&BenchmarkRecord::new("memkv", 32, 250000, &m)).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 1);
    let v: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(v["service"], "memkv");
    assert_eq!(v["num_threads"], 32);
    assert_eq!(v["ratelimit"], 250000);
    assert_eq!(v["lts"]["READ"]["thruput"], 95000.0);
    assert_eq!(v["lts"]["READ"]["avg_latency"], 410.0);
    assert!(v["lts"]["TOTAL"]["raw"].as_str().unwrap().contains("UPDATE - Takes(s)"));
}

#[test]
fn peak_summaries_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memkv_peaks.jsons");
    let peaks: JsonLines<PeakSummary> = JsonLines::create(&path).unwrap();
    for (name, thruput, threads) in [("1s1c", 81234.5, 48), ("1s2c", 150000.0, 96)] {
        peaks
            .write(&PeakSummary {
                name: name.to_string(),
                throughput: thruput,
                client_threads: threads,
            })
            .unwrap();
    }

    let back = peaks.read_all().unwrap();
    assert_eq!(back.len(), 2);
    assert_eq!(back[1].name, "1s2c");
    assert_eq!(back[1].client_threads, 96);

    let first = std::fs::read_to_string(&path).unwrap();
    let first = first.lines().next().unwrap();
    assert_eq!(first, r#"{"name":"1s1c","thruput":81234.5,"clntthreads":48}"#);
}
