// SHARDBENCH -- BENCHMARK ORCHESTRATOR FOR SHARDED KEY-VALUE CLUSTERS
// BRINGS UP COORDINATOR + SHARDS, DRIVES go-ycsb AGAINST THEM, RECORDS
// EVERY RUN AS A JSON LINE.
//
// EXPERIMENTS:
//   peak     PEAK THROUGHPUT PER PROFILE (DOUBLING + BISECTION)
//   sweep    THREAD SWEEP UNTIL THROUGHPUT PLATEAUS
//   migrate  THROUGHPUT OVER TIME WHILE SHARDS JOIN
// UTILITIES:
//   check    TOOLS, DIRECTORIES, CPU PINNING
//   parse    FINAL STATS FROM A SAVED go-ycsb LOG

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use shardbench::config::Config;
use shardbench::logging;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "shardbench")]
#[command(about = "SHARDBENCH -- SHARDED KV BENCHMARK ORCHESTRATOR")]
struct Cli {
    // TOML EXPERIMENT CONFIG (DEFAULTS TO THE STOCK memkv SETUP)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    // OVERRIDE THE CONFIGURED OUTPUT DIRECTORY
    #[arg(long, global = true)]
    outdir: Option<PathBuf>,

    // PRINT COMMANDS INSTEAD OF RUNNING THEM
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    // DEBUG LOGGING FOR SHARDBENCH ITSELF
    #[arg(short, long, global = true)]
    verbose: bool,

    // PASS CHILD STDERR THROUGH TO THE TERMINAL
    #[arg(short, long, global = true)]
    errors: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // CHECK TOOLS, WORKING DIRECTORIES AND CPU PINNING
    Check,
    // PEAK THROUGHPUT SEARCH FOR EACH PROFILE
    Peak {
        // RUN ONLY THESE PROFILES (REPEATABLE)
        #[arg(short, long = "profile")]
        profiles: Vec<String>,
    },
    // THREAD SWEEP ON THE [cluster] TOPOLOGY
    Sweep,
    // SHARD MIGRATION UNDER LOAD
    Migrate,
    // PARSE A SAVED go-ycsb LOG
    Parse {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    // PRINT THE EFFECTIVE CONFIG AS TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let cfg = Config::load(cli.config.as_deref())?.with_outdir(cli.outdir.clone());
    debug!("CONFIG: {:?}", cfg);

    match &cli.command {
        Command::Parse { file, json } => return cli::parse::run_parse(file, *json),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&cfg)?);
            return Ok(());
        }
        Command::Check => return cli::check::run_check(&cfg),
        _ => {}
    }

    cli::raise_fd_limit(cfg.nofile_limit);
    if cli.dry_run {
        info!("DRY RUN: NO PROCESSES WILL BE STARTED");
    }
    let ctx = cli::Context::new(cfg, cli.dry_run, cli.errors, &SHUTDOWN);

    match &cli.command {
        Command::Peak { profiles } => cli::peak::run_peak(&ctx, profiles)?,
        Command::Sweep => cli::sweep::run_sweep(&ctx)?,
        Command::Migrate => cli::migrate::run_migrate(&ctx)?,
        Command::Check | Command::Parse { .. } | Command::Config => {}
    }

    if SHUTDOWN.load(Ordering::Relaxed) {
        println!("SHARDBENCH INTERRUPTED.");
    } else {
        println!("SHARDBENCH DONE.");
    }
    Ok(())
}
