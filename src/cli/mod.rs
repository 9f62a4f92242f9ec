// SHARDBENCH SUBCOMMANDS
// EACH EXPERIMENT LIVES IN ITS OWN FILE AND TAKES A SHARED Context.

pub mod check;
pub mod migrate;
pub mod parse;
pub mod peak;
pub mod sweep;

use std::sync::atomic::AtomicBool;

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use shardbench::config::Config;
use shardbench::loadgen::LoadGenerator;
use shardbench::supervisor::ProcessGroup;
use shardbench::topology::CoordinatorSpec;

pub struct Context {
    pub cfg: Config,
    pub dry_run: bool,
    pub shutdown: &'static AtomicBool,
}

impl Context {
    pub fn new(mut cfg: Config, dry_run: bool, show_stderr: bool, shutdown: &'static AtomicBool) -> Self {
        if show_stderr {
            cfg.cluster.commands.show_stderr = true;
            cfg.load.generator.show_stderr = true;
        }
        Self { cfg, dry_run, shutdown }
    }

    pub fn group(&self) -> ProcessGroup {
        ProcessGroup::new()
            .dry_run(self.dry_run)
            .shutdown_flag(self.shutdown)
    }

    pub fn loadgen(&self, coord: &CoordinatorSpec) -> LoadGenerator {
        LoadGenerator::new(self.cfg.load.generator.clone(), coord.addr())
    }

    pub fn interrupted(&self) -> bool {
        self.shutdown.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn ensure_outdir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.cfg.outdir)
            .with_context(|| format!("creating {}", self.cfg.outdir.display()))
    }
}

// THE LOAD GENERATOR HOLDS ONE CONNECTION PER CLIENT THREAD
pub fn raise_fd_limit(target: u64) {
    let mut lim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    unsafe {
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) != 0 {
            warn!("getrlimit(RLIMIT_NOFILE) FAILED");
            return;
        }
    }
    let want = target as libc::rlim_t;
    if lim.rlim_cur >= want {
        return;
    }
    let raised = libc::rlimit {
        rlim_cur: want,
        rlim_max: lim.rlim_max.max(want),
    };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &raised) };
    if rc == 0 {
        info!("RLIMIT_NOFILE RAISED TO {}", want);
        return;
    }
    // UNPRIVILEGED: GO AS HIGH AS THE HARD LIMIT ALLOWS
    let capped = libc::rlimit {
        rlim_cur: lim.rlim_max.min(want),
        rlim_max: lim.rlim_max,
    };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &capped) };
    if rc == 0 {
        warn!("RLIMIT_NOFILE CAPPED AT HARD LIMIT {}", capped.rlim_cur);
    } else {
        warn!("COULD NOT RAISE RLIMIT_NOFILE (STAYING AT {})", lim.rlim_cur);
    }
}
