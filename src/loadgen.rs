// SHARDBENCH LOAD GENERATOR ADAPTER
// LAUNCHES go-ycsb AGAINST THE CLUSTER AND PULLS ITS FINAL REPORT.
//
// go-ycsb PRINTS ONE BLOCK OF OPERATION LINES PER INTERVAL, EACH TAGGED
// "Takes(s): <elapsed>". THE BLOCK WHOSE ELAPSED EQUALS THE REQUESTED
// RUNTIME IS THE REPORT; EVERYTHING BEFORE IT IS WARMUP OR PROGRESS.
// operationcount IS EFFECTIVELY INFINITE SO THE PROCESS NEVER ENDS ON ITS
// OWN: THE ADAPTER STOPS IT ONCE THE REPORT IS IN.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bench::Bench;
use crate::cluster::render;
use crate::cores::CoreSet;
use crate::error::{BenchError, Result};
use crate::record::{Measurement, UNLIMITED_RATE};
use crate::supervisor::{LaunchSpec, Output, ProcessGroup, ProcessId, Role};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadGenConfig {
    pub cwd: Option<PathBuf>,
    // {db} EXPANDS TO `db`
    pub command: Vec<String>,
    pub db: String,
    pub workload_file: String,
    pub coord_property: String,
    pub interval_secs: u64,
    pub operation_count: u64,
    pub distribution: String,
    pub warmup_secs: u64,
    pub extra_properties: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub show_stderr: bool,
}

impl Default for LoadGenConfig {
    fn default() -> Self {
        Self {
            cwd: None,
            command: ["go", "run", "./cmd/go-ycsb", "run", "{db}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            db: "memkv".to_string(),
            workload_file: "../gokv/bench/memkv_workload".to_string(),
            coord_property: "memkv.coord".to_string(),
            interval_secs: 1,
            operation_count: u32::MAX as u64,
            distribution: "uniform".to_string(),
            warmup_secs: 20,
            extra_properties: BTreeMap::new(),
            env: BTreeMap::new(),
            show_stderr: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkloadMix {
    pub read: f64,
    pub update: f64,
}

impl Default for WorkloadMix {
    fn default() -> Self {
        Self { read: 0.95, update: 0.05 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoadSpec {
    pub threads: u32,
    pub mix: WorkloadMix,
    pub value_size: u32,
    pub cores: CoreSet,
    // NEGATIVE MEANS UNLIMITED
    pub target_rate: i64,
}

impl Default for LoadSpec {
    fn default() -> Self {
        Self {
            threads: 1,
            mix: WorkloadMix::default(),
            value_size: 128,
            cores: CoreSet::default(),
            target_rate: UNLIMITED_RATE,
        }
    }
}

pub struct LoadGenerator {
    cfg: LoadGenConfig,
    coord_addr: String,
}

impl LoadGenerator {
    pub fn new(cfg: LoadGenConfig, coord_addr: impl Into<String>) -> Self {
        Self {
            cfg,
            coord_addr: coord_addr.into(),
        }
    }

    pub fn argv(&self, spec: &LoadSpec) -> Vec<String> {
        let mut argv = render(&self.cfg.command, &[("db", self.cfg.db.as_str())]);
        let mut flag = |k: &str, v: String| {
            argv.push(k.to_string());
            argv.push(v);
        };
        flag("-P", self.cfg.workload_file.clone());
        flag("--threads", spec.threads.to_string());
        flag("--target", spec.target_rate.max(-1).to_string());
        flag("--interval", self.cfg.interval_secs.to_string());

        let mut props: BTreeMap<String, String> = BTreeMap::new();
        props.insert("operationcount".into(), self.cfg.operation_count.to_string());
        props.insert("fieldlength".into(), spec.value_size.to_string());
        props.insert("requestdistribution".into(), self.cfg.distribution.clone());
        props.insert("readproportion".into(), spec.mix.read.to_string());
        props.insert("updateproportion".into(), spec.mix.update.to_string());
        props.insert(self.cfg.coord_property.clone(), self.coord_addr.clone());
        props.insert("warmup".into(), self.cfg.warmup_secs.to_string());
        for (k, v) in &self.cfg.extra_properties {
            props.insert(k.clone(), v.clone());
        }
        for (k, v) in props {
            argv.push("-p".to_string());
            argv.push(format!("{}={}", k, v));
        }
        argv
    }

    pub fn launch_spec(&self, spec: &LoadSpec) -> LaunchSpec {
        let mut launch = LaunchSpec::new(Role::LoadGenerator, self.argv(spec));
        launch.cwd = self.cfg.cwd.clone();
        launch.env = self.cfg.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        launch.cores = spec.cores.clone();
        launch.stdout = Output::Capture;
        launch.show_stderr = self.cfg.show_stderr;
        launch
    }

    pub fn run(&self, group: &mut ProcessGroup, spec: &LoadSpec) -> Result<ProcessId> {
        group.spawn(&self.launch_spec(spec))
    }

    // BLOCKS UNTIL THE FINAL REPORT APPEARS OR THE STREAM ENDS. THE PROCESS IS
    // STOPPED EITHER WAY. THE REPORT IS EVERY CONSECUTIVE LINE CARRYING THE
    // FINAL "Takes(s): <run_secs>." MARKER.
    pub fn run_until_report(
        &self,
        group: &mut ProcessGroup,
        id: ProcessId,
        run_secs: u64,
    ) -> Option<String> {
        let marker = final_marker(run_secs);
        let report = collect_report(&marker, || group.read_line(id));
        group.stop(id);
        report
    }
}

pub fn final_marker(run_secs: u64) -> String {
    format!("Takes(s): {}.", run_secs)
}

pub fn collect_report<F: FnMut() -> Option<String>>(marker: &str, mut next_line: F) -> Option<String> {
    let mut report: Option<String> = None;
    while let Some(line) = next_line() {
        if !line.contains(marker) {
            if report.is_some() {
                break;
            }
            continue;
        }
        if let Some(r) = report.as_mut() {
            r.push('\n');
            r.push_str(&line);
        } else {
            report = Some(line);
        }
    }
    report
}

// --- Bench OVER go-ycsb ---

pub struct YcsbBench<'g> {
    group: &'g mut ProcessGroup,
    loadgen: LoadGenerator,
    service: String,
    template: LoadSpec,
    run_secs: u64,
}

impl<'g> YcsbBench<'g> {
    pub fn new(
        group: &'g mut ProcessGroup,
        loadgen: LoadGenerator,
        service: &str,
        template: LoadSpec,
        run_secs: u64,
    ) -> Self {
        Self {
            group,
            loadgen,
            service: service.to_string(),
            template,
            run_secs,
        }
    }
}

impl Bench for YcsbBench<'_> {
    fn service(&self) -> &str {
        &self.service
    }

    fn rate_limit(&self) -> i64 {
        self.template.target_rate
    }

    fn measure(&mut self, threads: u32) -> Result<Measurement> {
        if self.group.interrupted() {
            return Err(BenchError::Interrupted);
        }
        let spec = LoadSpec {
            threads,
            ..self.template.clone()
        };
        let id = match self.loadgen.run(self.group, &spec) {
            Ok(id) => id,
            Err(e @ BenchError::Spawn { .. }) => {
                warn!("LOAD GENERATOR DID NOT START: {}", e);
                return Ok(Measurement::NoReport);
            }
            Err(e) => return Err(e),
        };
        if self.group.is_dry_run() {
            self.group.stop(id);
            return Ok(Measurement::NoReport);
        }
        let report = self.loadgen.run_until_report(self.group, id, self.run_secs);
        if self.group.interrupted() {
            return Err(BenchError::Interrupted);
        }
        match report {
            Some(text) => {
                debug!("REPORT ({} threads):\n{}", threads, text);
                Ok(Measurement::from_report(&text))
            }
            None => Ok(Measurement::NoReport),
        }
    }
}
