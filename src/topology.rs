// SHARDBENCH CLUSTER TOPOLOGY
// ONE COORDINATOR, AN ORDERED LIST OF SHARDS. THE FIRST SHARD IS THE
// INITIALIZER: THE COORDINATOR IS BOOTSTRAPPED WITH ITS ADDRESS AND EVERY
// OTHER SHARD IS REGISTERED THROUGH THE CONTROL TOOL AFTER IT.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::cores::CoreSet;
use crate::error::{BenchError, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const COORD_PORT: u16 = 12200;
pub const FIRST_SHARD_PORT: u16 = 12300;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSpec {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_coord_port")]
    pub port: u16,
    #[serde(default)]
    pub cores: CoreSet,
}

impl CoordinatorSpec {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for CoordinatorSpec {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: COORD_PORT,
            cores: CoreSet::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSpec {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cores: CoreSet,
    #[serde(default)]
    pub is_initializer: bool,
}

impl ShardSpec {
    pub fn new(port: u16, cores: CoreSet) -> Self {
        Self {
            host: default_host(),
            port,
            cores,
            is_initializer: false,
        }
    }

    pub fn initializer(port: u16, cores: CoreSet) -> Self {
        Self {
            is_initializer: true,
            ..Self::new(port, cores)
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterTopology {
    coordinator: CoordinatorSpec,
    shards: Vec<ShardSpec>,
}

impl ClusterTopology {
    pub fn new(coordinator: CoordinatorSpec, shards: Vec<ShardSpec>) -> Result<Self> {
        let Some(first) = shards.first() else {
            return Err(BenchError::Topology("no shards".to_string()));
        };
        if !first.is_initializer {
            return Err(BenchError::Topology(format!(
                "first shard {} must be the initializer",
                first.addr()
            )));
        }
        if let Some(extra) = shards.iter().skip(1).find(|s| s.is_initializer) {
            return Err(BenchError::Topology(format!(
                "second initializer shard {}",
                extra.addr()
            )));
        }

        // EVERY PROCESS IS SPAWNED LOCALLY: PORTS MUST BE UNIQUE WHATEVER THE HOST
        let mut seen = HashSet::new();
        seen.insert(coordinator.port);
        for shard in &shards {
            if !seen.insert(shard.port) {
                return Err(BenchError::Topology(format!("port {} used twice", shard.addr())));
            }
        }
        Ok(Self { coordinator, shards })
    }

    // SHARDS ON CONSECUTIVE PORTS FROM FIRST_SHARD_PORT, ONE CORE SET EACH.
    // THE FIRST ENTRY BECOMES THE INITIALIZER.
    pub fn local(coordinator: CoordinatorSpec, shard_cores: &[CoreSet]) -> Result<Self> {
        let shards = shard_cores
            .iter()
            .enumerate()
            .map(|(i, cores)| {
                let port = FIRST_SHARD_PORT + i as u16;
                if i == 0 {
                    ShardSpec::initializer(port, cores.clone())
                } else {
                    ShardSpec::new(port, cores.clone())
                }
            })
            .collect();
        Self::new(coordinator, shards)
    }

    pub fn coordinator(&self) -> &CoordinatorSpec {
        &self.coordinator
    }

    pub fn shards(&self) -> &[ShardSpec] {
        &self.shards
    }

    pub fn initializer(&self) -> &ShardSpec {
        &self.shards[0]
    }

    pub fn all_cores(&self) -> CoreSet {
        CoreSet::union(
            std::iter::once(&self.coordinator.cores).chain(self.shards.iter().map(|s| &s.cores)),
        )
    }

    pub fn uses_port(&self, port: u16) -> bool {
        self.coordinator.port == port || self.shards.iter().any(|s| s.port == port)
    }

    // MEMBERSHIP GROWS AS add_shard SUCCEEDS
    pub(crate) fn push(&mut self, shard: ShardSpec) -> Result<()> {
        if shard.is_initializer {
            return Err(BenchError::Topology(format!(
                "{} cannot join as an initializer",
                shard.addr()
            )));
        }
        if self.uses_port(shard.port) {
            return Err(BenchError::Topology(format!("port {} used twice", shard.addr())));
        }
        self.shards.push(shard);
        Ok(())
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_coord_port() -> u16 {
    COORD_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cores(s: &str) -> CoreSet {
        s.parse().unwrap()
    }

    #[test]
    fn local_topology_numbers_ports() {
        let topo = ClusterTopology::local(CoordinatorSpec::default(), &[cores("0"), cores("1-2")]).unwrap();
        assert_eq!(topo.shards().len(), 2);
        assert_eq!(topo.initializer().port, 12300);
        assert!(topo.initializer().is_initializer);
        assert_eq!(topo.shards()[1].port, 12301);
        assert!(!topo.shards()[1].is_initializer);
        assert_eq!(topo.all_cores().cores(), &[0, 1, 2]);
    }

    #[test]
    fn rejects_duplicate_ports() {
        let shards = vec![
            ShardSpec::initializer(12300, cores("0")),
            ShardSpec::new(12300, cores("1")),
        ];
        assert!(matches!(
            ClusterTopology::new(CoordinatorSpec::default(), shards),
            Err(BenchError::Topology(_))
        ));
    }

    #[test]
    fn rejects_shard_on_coordinator_port() {
        let shards = vec![ShardSpec::initializer(COORD_PORT, cores("0"))];
        assert!(ClusterTopology::new(CoordinatorSpec::default(), shards).is_err());
    }

    #[test]
    fn same_port_on_different_hosts_is_rejected() {
        let mut remote = ShardSpec::new(12300, cores("1"));
        remote.host = "10.0.0.7".to_string();
        let shards = vec![ShardSpec::initializer(12300, cores("0")), remote];
        assert!(matches!(
            ClusterTopology::new(CoordinatorSpec::default(), shards),
            Err(BenchError::Topology(_))
        ));

        let mut topo = ClusterTopology::local(CoordinatorSpec::default(), &[cores("0")]).unwrap();
        assert!(topo.uses_port(COORD_PORT));
        assert!(topo.uses_port(12300));
        let mut remote = ShardSpec::new(12300, cores("1"));
        remote.host = "10.0.0.7".to_string();
        assert!(topo.push(remote).is_err());
    }

    #[test]
    fn initializer_must_be_first_and_unique() {
        let late = vec![ShardSpec::new(12300, cores("0")), ShardSpec::initializer(12301, cores("1"))];
        assert!(ClusterTopology::new(CoordinatorSpec::default(), late).is_err());
        let two = vec![ShardSpec::initializer(12300, cores("0")), ShardSpec::initializer(12301, cores("1"))];
        assert!(ClusterTopology::new(CoordinatorSpec::default(), two).is_err());
        assert!(ClusterTopology::new(CoordinatorSpec::default(), vec![]).is_err());
    }

    #[test]
    fn push_enforces_unique_ports() {
        let mut topo = ClusterTopology::local(CoordinatorSpec::default(), &[cores("0")]).unwrap();
        topo.push(ShardSpec::new(12301, cores("1"))).unwrap();
        assert!(topo.push(ShardSpec::new(12301, cores("2"))).is_err());
        assert!(topo.push(ShardSpec::initializer(12302, cores("2"))).is_err());
        assert_eq!(topo.shards().len(), 2);
    }
}
