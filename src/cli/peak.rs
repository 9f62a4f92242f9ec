// PEAK CAMPAIGN: ONE PEAK SEARCH PER PROFILE, FRESH CLUSTER EACH TIME.
// RAW RUNS -> <outdir>/<service>_peak_raw.jsons
// SUMMARY  -> <outdir>/<service>_peaks.jsons

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use tracing::{error, info, warn};

use shardbench::cluster::ClusterController;
use shardbench::config::Profile;
use shardbench::loadgen::YcsbBench;
use shardbench::record::PeakSummary;
use shardbench::search::PeakSearch;
use shardbench::store::{JsonLines, ResultStore};
use shardbench::topology::ClusterTopology;
use shardbench::BenchError;

use super::Context;

// LET PORTS AND SOCKETS DRAIN BETWEEN PROFILES
const BETWEEN_PROFILES: Duration = Duration::from_millis(500);

pub fn run_peak(ctx: &Context, only: &[String]) -> Result<()> {
    let cfg = &ctx.cfg;
    let profiles: Vec<&Profile> = cfg
        .profiles
        .iter()
        .filter(|p| only.is_empty() || only.contains(&p.name))
        .collect();
    if profiles.is_empty() {
        bail!("no profile matches {:?}", only);
    }
    for name in only {
        if !cfg.profiles.iter().any(|p| &p.name == name) {
            warn!("UNKNOWN PROFILE {} (SKIPPED)", name);
        }
    }

    ctx.ensure_outdir()?;
    let mut raw = ResultStore::create(cfg.raw_path("peak_raw"))?;
    let summaries: JsonLines<PeakSummary> = JsonLines::create(cfg.raw_path("peaks"))?;
    let search = PeakSearch::new(cfg.search.clone())?;

    let mut results: Vec<PeakSummary> = Vec::new();
    for profile in profiles {
        if ctx.interrupted() {
            break;
        }
        info!("PROFILE {} ({} SHARD(S))", profile.name, profile.shards.len());
        let topology = ClusterTopology::local(cfg.cluster.coordinator.clone(), &profile.shards)?;

        let mut cluster = ClusterController::new(cfg.cluster.commands.clone(), ctx.group());
        if let Err(e) = cluster.start(topology.clone()) {
            error!("PROFILE {}: CLUSTER DID NOT START: {}", profile.name, e);
            cluster.teardown();
            continue;
        }

        let mut clients = ctx.group();
        let mut template = cfg.load.template();
        if let Some(cores) = &profile.client_cores {
            template.cores = cores.clone();
        }
        let mut bench = YcsbBench::new(
            &mut clients,
            ctx.loadgen(topology.coordinator()),
            &cfg.service,
            template,
            cfg.load.run_secs,
        );

        let outcome = search.run(&mut bench, &mut raw);
        drop(bench);
        clients.terminate_all();
        cluster.teardown();

        match outcome {
            Ok(res) => {
                let summary = PeakSummary {
                    name: profile.name.clone(),
                    throughput: res.peak,
                    client_threads: res.threads,
                };
                summaries.write(&summary)?;
                println!(
                    "  {:<12} PEAK {:>12.1} OPS/S @ {:>5} THREADS ({} RUNS)",
                    profile.name, res.peak, res.threads, res.measurements
                );
                results.push(summary);
            }
            Err(BenchError::Interrupted) => {
                warn!("PROFILE {} INTERRUPTED", profile.name);
                break;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("profile {}", profile.name));
            }
        }
        if !ctx.dry_run {
            std::thread::sleep(BETWEEN_PROFILES);
        }
    }

    if !results.is_empty() {
        println!("\n{}", "=".repeat(50));
        println!("PEAK SUMMARY ({})", cfg.service);
        println!("{}", "=".repeat(50));
        for s in &results {
            println!("  {:<12} {:>12.1} OPS/S  {:>5} THREADS", s.name, s.throughput, s.client_threads);
        }
        println!("  RAW:      {}", raw.path().display());
        println!("  SUMMARY:  {}", summaries.path().display());
    }
    Ok(())
}
