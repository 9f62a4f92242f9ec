// MIGRATION RUN: FIXED CLIENT LOAD, SHARDS JOIN AT CONFIGURED OFFSETS.
// SERIES -> <outdir>/<service>_migration.csv  (elapsed,ops/s)

use anyhow::{Context as _, Result};
use tracing::warn;

use shardbench::cluster::ClusterController;
use shardbench::loadgen::LoadSpec;
use shardbench::migration::run_migration;
use shardbench::series::SeriesWriter;

use super::Context;

pub fn run_migrate(ctx: &Context) -> Result<()> {
    let cfg = &ctx.cfg;
    let topology = cfg.cluster.topology()?;
    let events = cfg.migration_events();

    ctx.ensure_outdir()?;
    let csv_path = cfg.outdir.join(format!("{}_migration.csv", cfg.service));
    let mut writer = SeriesWriter::create(&csv_path)?;

    let mut cluster = ClusterController::new(cfg.cluster.commands.clone(), ctx.group());
    cluster.start(topology.clone()).context("starting cluster")?;
    // LATE SHARDS ARE STARTED FROM THE BACKGROUND THREAD AND OWNED HERE
    let late = cluster.detached();

    let mut clients = ctx.group();
    let loadgen = ctx.loadgen(topology.coordinator());
    let spec = LoadSpec {
        threads: cfg.migration.threads,
        ..cfg.load.template()
    };
    let id = loadgen.run(&mut clients, &spec).context("starting load generator")?;

    let outcome = run_migration(
        late,
        events,
        || clients.read_line(id),
        cfg.migration.run_secs as f64,
        |p| writer.write(p),
    );
    clients.stop(id);

    let (mut late, outcome) = match outcome {
        Ok(v) => v,
        Err(e) => {
            cluster.teardown();
            return Err(e.into());
        }
    };
    late.teardown();
    cluster.teardown();
    if ctx.interrupted() {
        warn!("MIGRATION INTERRUPTED, SERIES IS PARTIAL");
    }

    // EVENT TIMES ARE WALL CLOCK SINCE THE LOAD STARTED
    let marks: Vec<(f64, String)> = outcome
        .applied
        .iter()
        .map(|a| {
            let status = if a.ok { "ADD" } else { "ADD FAILED" };
            (a.started.as_secs_f64(), format!("{} {}", status, a.shard.addr()))
        })
        .collect();
    if !ctx.dry_run {
        outcome.series.summary(&marks);
    }
    for e in &outcome.applied {
        println!(
            "  EVENT @{:>6.1}s (PLANNED {:>6.1}s)  {} [cores {}]  {}",
            e.started.as_secs_f64(),
            e.offset.as_secs_f64(),
            e.shard.addr(),
            e.shard.cores,
            if e.ok { "OK" } else { "FAILED" }
        );
    }
    println!("SERIES:  {}", writer.path().display());
    Ok(())
}
