// LATENCY SWEEP: STEP CLIENT THREADS ALONG THE CONFIGURED SCHEDULE ON ONE
// CLUSTER UNTIL THROUGHPUT PLATEAUS.
// RAW RUNS -> <outdir>/<service>_sweep_raw.jsons

use anyhow::{Context as _, Result};
use tracing::warn;

use shardbench::cluster::ClusterController;
use shardbench::loadgen::YcsbBench;
use shardbench::store::ResultStore;
use shardbench::sweep::LatencySweep;
use shardbench::BenchError;

use super::Context;

pub fn run_sweep(ctx: &Context) -> Result<()> {
    let cfg = &ctx.cfg;
    let sweep = LatencySweep::from_config(&cfg.sweep)?;
    let topology = cfg.cluster.topology()?;

    ctx.ensure_outdir()?;
    let mut raw = ResultStore::create(cfg.raw_path("sweep_raw"))?;

    let mut cluster = ClusterController::new(cfg.cluster.commands.clone(), ctx.group());
    cluster.start(topology.clone()).context("starting cluster")?;

    let mut clients = ctx.group();
    let mut bench = YcsbBench::new(
        &mut clients,
        ctx.loadgen(topology.coordinator()),
        &cfg.service,
        cfg.load.template(),
        cfg.load.run_secs,
    );
    let outcome = sweep.run(&mut bench, &mut raw);
    drop(bench);
    clients.terminate_all();
    cluster.teardown();

    let outcome = match outcome {
        Ok(o) => o,
        Err(BenchError::Interrupted) => {
            warn!("SWEEP INTERRUPTED");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("\n{:<10} {:<14}", "THREADS", "OPS/S");
    println!("{}", "-".repeat(26));
    for (threads, thruput) in &outcome.samples {
        let mark = if Some(*threads) == outcome.peak_threads { " *" } else { "" };
        println!("{:<10} {:<14.1}{}", threads, thruput, mark);
    }
    println!("\nSTOPPED: {:?} AFTER {} STEPS", outcome.stopped, outcome.samples.len());
    println!("RAW:     {}", raw.path().display());
    Ok(())
}
