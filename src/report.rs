// SHARDBENCH REPORT PARSER
// go-ycsb PRINTS ONE LINE PER OPERATION PER REPORTING INTERVAL:
//
//   UPDATE - Takes(s): 12.6, Count: 999999, OPS: 79654.6, Avg(us): 12434, Min(us): 28, Max(us): 54145, 99th(us): 29000, 99.9th(us): 41000, 99.99th(us): 49000
//
// PURE FUNCTIONS. A BLOB WITH NO MATCHING LINES IS AN EMPTY MAP, NOT AN ERROR.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const REPORT_PATTERN: &str = r"(?m)^(?P<op>[^\n]*?) - Takes\(s\): (?P<takes>[^,\n]*), Count: (?P<count>[^,\n]*), OPS: (?P<ops>[^,\n]*), Avg\(us\): (?P<avg>[^,\n]*), Min\(us\):[^\n]*$";

// OPERATION NAME go-ycsb USES FOR THE ALL-OPERATIONS ROLLUP
pub const TOTAL_OP: &str = "TOTAL";

fn report_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REPORT_PATTERN).expect("report pattern compiles"))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpStats {
    #[serde(rename = "thruput")]
    pub throughput: f64,
    #[serde(rename = "avg_latency")]
    pub average_latency_us: f64,
    pub raw: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OpLine {
    pub op: String,
    pub takes_secs: f64,
    pub count: u64,
    pub ops: f64,
    pub avg_us: f64,
}

pub fn parse_lines(text: &str) -> Vec<OpLine> {
    report_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            Some(OpLine {
                op: caps["op"].trim().to_string(),
                takes_secs: caps["takes"].trim().parse().ok()?,
                count: caps["count"].trim().parse().ok()?,
                ops: caps["ops"].trim().parse().ok()?,
                avg_us: caps["avg"].trim().parse().ok()?,
            })
        })
        .filter(|line| !line.op.is_empty())
        .collect()
}

// LATER LINES FOR THE SAME OPERATION WIN
pub fn parse(text: &str) -> BTreeMap<String, OpStats> {
    parse_lines(text)
        .into_iter()
        .map(|line| {
            (
                line.op,
                OpStats {
                    throughput: line.ops,
                    average_latency_us: line.avg_us,
                    raw: text.to_string(),
                },
            )
        })
        .collect()
}

// SUM OVER OPERATIONS. THE TOTAL ROLLUP WOULD DOUBLE COUNT, SO IT IS USED
// ONLY WHEN IT IS THE SOLE ENTRY.
pub fn aggregate_throughput(stats: &BTreeMap<String, OpStats>) -> f64 {
    let per_op: f64 = stats
        .iter()
        .filter(|(op, _)| op.as_str() != TOTAL_OP)
        .map(|(_, s)| s.throughput)
        .sum();
    if per_op == 0.0 {
        stats.get(TOTAL_OP).map(|s| s.throughput).unwrap_or(0.0)
    } else {
        per_op
    }
}
