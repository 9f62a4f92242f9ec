use std::path::Path;

use anyhow::{Context, Result};

use shardbench::report;

// PARSE A SAVED go-ycsb LOG AND PRINT THE FINAL STATS AS JSON
pub fn run_parse(path: &Path, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let stats = report::parse(&text);

    if json {
        let slim: serde_json::Map<String, serde_json::Value> = stats
            .iter()
            .map(|(op, s)| {
                (
                    op.clone(),
                    serde_json::json!({ "thruput": s.throughput, "avg_latency": s.average_latency_us }),
                )
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&slim)?);
        return Ok(());
    }

    if stats.is_empty() {
        println!("NO REPORT LINES IN {}", path.display());
        return Ok(());
    }
    println!("{:<12} {:>14} {:>14}", "OP", "OPS/S", "AVG_US");
    println!("{}", "-".repeat(42));
    for (op, s) in &stats {
        println!("{:<12} {:>14.1} {:>14.1}", op, s.throughput, s.average_latency_us);
    }
    println!("{}", "-".repeat(42));
    println!("{:<12} {:>14.1}", "AGGREGATE", report::aggregate_throughput(&stats));
    Ok(())
}
