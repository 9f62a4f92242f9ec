// SHARDBENCH EXPERIMENT CONFIG
// ONE TOML FILE DESCRIBES THE WHOLE CAMPAIGN. EVERY SECTION AND FIELD HAS A
// DEFAULT MATCHING THE STOCK memkv SETUP, SO AN EMPTY FILE (OR NO FILE) IS
// A VALID CONFIG.
//
//   service = "memkv"
//   outdir  = "results"
//
//   [cluster]            -> ClusterCommands + shard core sets
//   [load]               -> LoadGenConfig + workload shape
//   [search]             -> PeakSearch
//   [sweep]              -> LatencySweep
//   [migration]          -> event schedule
//   [[profiles]]         -> one peak search per entry

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterCommands;
use crate::cores::CoreSet;
use crate::error::{BenchError, Result};
use crate::loadgen::{LoadGenConfig, LoadSpec, WorkloadMix};
use crate::migration::{validate_events, MigrationEvent};
use crate::record::UNLIMITED_RATE;
use crate::search::SearchConfig;
use crate::sweep::SweepConfig;
use crate::topology::{ClusterTopology, CoordinatorSpec, ShardSpec, FIRST_SHARD_PORT};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub coordinator: CoordinatorSpec,
    // ONE CORE SET PER SHARD. THE FIRST IS THE INITIALIZER.
    pub shards: Vec<CoreSet>,
    #[serde(flatten)]
    pub commands: ClusterCommands,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorSpec::default(),
            shards: vec![CoreSet::range(0, 1).unwrap_or_default()],
            commands: ClusterCommands {
                cwd: Some(PathBuf::from("../gokv")),
                ..ClusterCommands::default()
            },
        }
    }
}

impl ClusterConfig {
    pub fn topology(&self) -> Result<ClusterTopology> {
        ClusterTopology::local(self.coordinator.clone(), &self.shards)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub client_cores: CoreSet,
    pub mix: WorkloadMix,
    pub value_size: u32,
    pub target_rate: i64,
    // LENGTH OF ONE MEASURED RUN, ON THE LOAD GENERATOR'S CLOCK
    pub run_secs: u64,
    #[serde(flatten)]
    pub generator: LoadGenConfig,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            client_cores: CoreSet::range(40, 80).unwrap_or_default(),
            mix: WorkloadMix::default(),
            value_size: 128,
            target_rate: UNLIMITED_RATE,
            run_secs: 10,
            generator: LoadGenConfig {
                cwd: Some(PathBuf::from("../go-ycsb")),
                ..LoadGenConfig::default()
            },
        }
    }
}

impl LoadConfig {
    pub fn template(&self) -> LoadSpec {
        LoadSpec {
            threads: 1,
            mix: self.mix,
            value_size: self.value_size,
            cores: self.client_cores.clone(),
            target_rate: self.target_rate,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    pub threads: u32,
    pub run_secs: u64,
    pub events: Vec<MigrationEvent>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        let events = (1..=3u16)
            .map(|i| MigrationEvent {
                offset: std::time::Duration::from_secs(30 * i as u64),
                shard: ShardSpec::new(FIRST_SHARD_PORT + i, CoreSet::range(i as usize, i as usize + 1).unwrap_or_default()),
            })
            .collect();
        Self {
            threads: 64,
            run_secs: 120,
            events,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub client_cores: Option<CoreSet>,
    pub shards: Vec<CoreSet>,
}

// 1sNc: ONE SHARD ON N CORES, CLIENTS ON 40-79
fn default_profiles() -> Vec<Profile> {
    (1..=6)
        .map(|n| Profile {
            name: format!("1s{}c", n),
            client_cores: None,
            shards: vec![CoreSet::range(0, n).unwrap_or_default()],
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub service: String,
    pub outdir: PathBuf,
    // RAISED AT STARTUP; THE LOAD GENERATOR OPENS ONE SOCKET PER THREAD
    pub nofile_limit: u64,
    pub cluster: ClusterConfig,
    pub load: LoadConfig,
    pub search: SearchConfig,
    pub sweep: SweepConfig,
    pub migration: MigrationConfig,
    pub profiles: Vec<Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: "memkv".to_string(),
            outdir: PathBuf::from("results"),
            nofile_limit: 100_000,
            cluster: ClusterConfig::default(),
            load: LoadConfig::default(),
            search: SearchConfig::default(),
            sweep: SweepConfig::default(),
            migration: MigrationConfig::default(),
            profiles: default_profiles(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            None => Self::default(),
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| BenchError::io("reading config", p, e))?;
                Self::from_toml(&raw)?
            }
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| BenchError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.is_empty() {
            return Err(BenchError::Config("service must not be empty".to_string()));
        }
        self.search.validate()?;
        self.sweep.validate()?;
        self.cluster.topology()?;
        validate_events(&self.migration.events)?;

        let mix = self.load.mix;
        if !(0.0..=1.0).contains(&mix.read) || !(0.0..=1.0).contains(&mix.update) {
            return Err(BenchError::Config(format!(
                "load.mix proportions must be within [0, 1], got read={} update={}",
                mix.read, mix.update
            )));
        }
        if self.load.run_secs == 0 || self.migration.run_secs == 0 {
            return Err(BenchError::Config("run_secs must be positive".to_string()));
        }

        let mut names = std::collections::HashSet::new();
        for p in &self.profiles {
            if !names.insert(p.name.as_str()) {
                return Err(BenchError::Config(format!("profile `{}` defined twice", p.name)));
            }
            ClusterTopology::local(self.cluster.coordinator.clone(), &p.shards)
                .map_err(|e| BenchError::Config(format!("profile `{}`: {}", p.name, e)))?;
        }
        Ok(())
    }

    // LOG DIRECTORY FOR SERVER OUTPUT UNLESS THE CONFIG SETS ONE
    pub fn with_outdir(mut self, outdir: Option<PathBuf>) -> Self {
        if let Some(dir) = outdir {
            self.outdir = dir;
        }
        if self.cluster.commands.log_dir.is_none() {
            self.cluster.commands.log_dir = Some(self.outdir.join("logs"));
        }
        self
    }

    pub fn raw_path(&self, experiment: &str) -> PathBuf {
        self.outdir.join(format!("{}_{}.jsons", self.service, experiment))
    }

    pub fn migration_events(&self) -> Vec<MigrationEvent> {
        self.migration.events.clone()
    }
}
