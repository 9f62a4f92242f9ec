// SHARDBENCH CLUSTER CONTROLLER
// BRINGS UP A COORDINATOR AND ITS SHARDS, REGISTERS LATE SHARDS WITH THE
// CONTROL TOOL, AND TEARS EVERYTHING DOWN THROUGH ITS OWN ProcessGroup.
//
// BRING-UP ORDER:
//   1. COORDINATOR, BOOTSTRAPPED WITH THE INITIALIZER SHARD'S ADDRESS
//   2. EACH SHARD IN ORDER (THE INITIALIZER GETS init_args)
//   3. SETTLE DELAY
//   4. ONE CONTROL INVOCATION PER NON-INITIALIZER SHARD
//
// COMMANDS ARE argv TEMPLATES. PLACEHOLDERS: {host} {port} {addr} OF THE
// PROCESS BEING STARTED, {coord} FOR THE COORDINATOR ADDRESS AND
// {init_addr} FOR THE INITIALIZER SHARD ADDRESS.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BenchError, Result};
use crate::supervisor::{run_to_completion, LaunchSpec, Output, ProcessGroup, Role};
use crate::topology::{ClusterTopology, CoordinatorSpec, ShardSpec};

// --- TEMPLATES ---

pub fn render(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}

fn argv(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterCommands {
    pub cwd: Option<PathBuf>,
    pub coordinator: Vec<String>,
    pub shard: Vec<String>,
    pub init_args: Vec<String>,
    pub control: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub settle_ms: u64,
    pub abort_on_control_error: bool,
    // SERVER STDOUT GOES TO <log_dir>/<role>-<port>.log. None DISCARDS IT.
    pub log_dir: Option<PathBuf>,
    pub show_stderr: bool,
}

impl Default for ClusterCommands {
    fn default() -> Self {
        Self {
            cwd: None,
            coordinator: argv(&["go", "run", "./cmd/memkvcoord", "-init", "{init_addr}", "-port", "{port}"]),
            shard: argv(&["go", "run", "./cmd/memkvshard", "-port", "{port}"]),
            init_args: argv(&["-init"]),
            control: argv(&["go", "run", "./cmd/memkvctl", "-coord", "{coord}", "add", "{addr}"]),
            env: BTreeMap::new(),
            settle_ms: 1000,
            abort_on_control_error: false,
            log_dir: None,
            show_stderr: false,
        }
    }
}

impl ClusterCommands {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    fn output(&self, role: &str, port: u16) -> Output {
        match &self.log_dir {
            Some(dir) => Output::Append(dir.join(format!("{}-{}.log", role, port))),
            None => Output::Discard,
        }
    }

    fn launch(&self, role: Role, argv: Vec<String>) -> LaunchSpec {
        let mut spec = LaunchSpec::new(role, argv);
        spec.cwd = self.cwd.clone();
        spec.env = self.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        spec.show_stderr = self.show_stderr;
        spec
    }

    pub fn coordinator_spec(&self, coord: &CoordinatorSpec, init: &ShardSpec) -> LaunchSpec {
        let port = coord.port.to_string();
        let addr = coord.addr();
        let init_addr = init.addr();
        let args = render(
            &self.coordinator,
            &[
                ("host", coord.host.as_str()),
                ("port", port.as_str()),
                ("addr", addr.as_str()),
                ("coord", addr.as_str()),
                ("init_addr", init_addr.as_str()),
            ],
        );
        let mut spec = self.launch(Role::Coordinator, args);
        spec.cores = coord.cores.clone();
        spec.stdout = self.output("coord", coord.port);
        spec
    }

    pub fn shard_spec(&self, shard: &ShardSpec, coord: &CoordinatorSpec) -> LaunchSpec {
        let port = shard.port.to_string();
        let addr = shard.addr();
        let coord_addr = coord.addr();
        let vars = [
            ("host", shard.host.as_str()),
            ("port", port.as_str()),
            ("addr", addr.as_str()),
            ("coord", coord_addr.as_str()),
        ];
        let mut args = render(&self.shard, &vars);
        if shard.is_initializer {
            args.extend(render(&self.init_args, &vars));
        }
        let mut spec = self.launch(Role::Shard, args);
        spec.cores = shard.cores.clone();
        spec.stdout = self.output("shard", shard.port);
        spec
    }

    pub fn control_spec(&self, shard: &ShardSpec, coord: &CoordinatorSpec) -> LaunchSpec {
        let port = shard.port.to_string();
        let addr = shard.addr();
        let coord_addr = coord.addr();
        let args = render(
            &self.control,
            &[
                ("host", shard.host.as_str()),
                ("port", port.as_str()),
                ("addr", addr.as_str()),
                ("coord", coord_addr.as_str()),
            ],
        );
        self.launch(Role::Control, args)
    }
}

// --- CONTROLLER ---

pub struct ClusterController {
    commands: ClusterCommands,
    group: ProcessGroup,
    topology: Option<ClusterTopology>,
    die_with_parent: bool,
}

impl ClusterController {
    pub fn new(commands: ClusterCommands, group: ProcessGroup) -> Self {
        Self {
            commands,
            group,
            topology: None,
            die_with_parent: true,
        }
    }

    // A CONTROLLER FOR THE SAME RUNNING CLUSTER WITH AN EMPTY PROCESS GROUP,
    // SAFE TO MOVE TO ANOTHER THREAD. SHARDS IT STARTS SURVIVE THAT THREAD.
    pub fn detached(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            group: self.group.sibling(),
            topology: self.topology.clone(),
            die_with_parent: false,
        }
    }

    pub fn topology(&self) -> Option<&ClusterTopology> {
        self.topology.as_ref()
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    pub fn start(&mut self, topology: ClusterTopology) -> Result<()> {
        if self.topology.is_some() {
            return Err(BenchError::Topology("cluster already started".to_string()));
        }
        let coord = topology.coordinator().clone();
        info!(
            "STARTING CLUSTER: COORD {} + {} SHARD(S)",
            coord.addr(),
            topology.shards().len()
        );

        let spec = self.commands.coordinator_spec(&coord, topology.initializer());
        self.spawn(spec)?;
        for shard in topology.shards() {
            let spec = self.commands.shard_spec(shard, &coord);
            self.spawn(spec)?;
        }
        self.settle();
        for shard in topology.shards().iter().filter(|s| !s.is_initializer) {
            self.register(shard, &coord)?;
        }
        self.topology = Some(topology);
        Ok(())
    }

    // LAUNCH ONE MORE SHARD AGAINST THE RUNNING COORDINATOR AND REGISTER IT
    pub fn add_shard(&mut self, shard: ShardSpec) -> Result<()> {
        let Some(topology) = self.topology.as_ref() else {
            return Err(BenchError::Topology("cluster not started".to_string()));
        };
        if shard.is_initializer || topology.uses_port(shard.port) {
            return Err(BenchError::Topology(format!("cannot add shard {}", shard.addr())));
        }
        let coord = topology.coordinator().clone();
        info!("ADDING SHARD {} [cores {}]", shard.addr(), shard.cores);

        let spec = self.commands.shard_spec(&shard, &coord);
        self.spawn(spec)?;
        self.settle();
        self.register(&shard, &coord)?;
        if let Some(topology) = self.topology.as_mut() {
            topology.push(shard)?;
        }
        Ok(())
    }

    pub fn teardown(&mut self) -> usize {
        self.topology = None;
        let n = self.group.terminate_all();
        if n > 0 {
            info!("CLUSTER DOWN ({} PROCESS GROUP(S))", n);
        }
        n
    }

    fn spawn(&mut self, mut spec: LaunchSpec) -> Result<()> {
        spec.die_with_parent = self.die_with_parent;
        self.group.spawn(&spec)?;
        Ok(())
    }

    fn settle(&self) {
        if !self.group.is_dry_run() {
            std::thread::sleep(self.commands.settle());
        }
    }

    // NON-ZERO EXIT OR A MISSING CONTROL TOOL: FATAL ONLY WITH
    // abort_on_control_error, OTHERWISE LOGGED AND THE RUN GOES ON
    fn register(&self, shard: &ShardSpec, coord: &CoordinatorSpec) -> Result<()> {
        let spec = self.commands.control_spec(shard, coord);
        let failure = match run_to_completion(&spec, self.group.is_dry_run()) {
            Ok(outcome) if outcome.success => return Ok(()),
            Ok(outcome) => BenchError::ControlCommand {
                command: spec.command_line(),
                status: outcome.status,
                stderr: outcome.stderr,
            },
            Err(e) => e,
        };
        if self.commands.abort_on_control_error {
            Err(failure)
        } else {
            warn!("REGISTERING {} FAILED, CONTINUING: {}", shard.addr(), failure);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cores::CoreSet;

    fn cores(s: &str) -> CoreSet {
        s.parse().unwrap()
    }

    fn topo() -> ClusterTopology {
        ClusterTopology::local(CoordinatorSpec::default(), &[cores("0"), cores("1")]).unwrap()
    }

    fn quick() -> ClusterCommands {
        ClusterCommands {
            settle_ms: 0,
            ..ClusterCommands::default()
        }
    }

    #[test]
    fn render_substitutes_every_placeholder() {
        let out = render(
            &argv(&["-coord", "{coord}", "{addr}/{port}", "{missing}"]),
            &[("coord", "h:1"), ("addr", "h:2"), ("port", "2")],
        );
        assert_eq!(out, argv(&["-coord", "h:1", "h:2/2", "{missing}"]));
    }

    #[test]
    fn default_commands_match_memkv_tools() {
        let cmds = ClusterCommands::default();
        let t = topo();
        let coord = cmds.coordinator_spec(t.coordinator(), t.initializer());
        assert_eq!(
            coord.argv(),
            argv(&["go", "run", "./cmd/memkvcoord", "-init", "127.0.0.1:12300", "-port", "12200"])
        );
        let init = cmds.shard_spec(&t.shards()[0], t.coordinator());
        assert_eq!(init.argv(), argv(&["go", "run", "./cmd/memkvshard", "-port", "12300", "-init"]));
        assert_eq!(init.cores, cores("0"));
        let plain = cmds.shard_spec(&t.shards()[1], t.coordinator());
        assert!(!plain.argv().contains(&"-init".to_string()));
        let ctl = cmds.control_spec(&t.shards()[1], t.coordinator());
        assert_eq!(
            ctl.argv(),
            argv(&["go", "run", "./cmd/memkvctl", "-coord", "127.0.0.1:12200", "add", "127.0.0.1:12301"])
        );
    }

    #[test]
    fn log_dir_routes_server_output() {
        let cmds = ClusterCommands {
            log_dir: Some(PathBuf::from("/tmp/sb")),
            ..ClusterCommands::default()
        };
        let t = topo();
        let spec = cmds.shard_spec(&t.shards()[1], t.coordinator());
        assert_eq!(spec.stdout, Output::Append(PathBuf::from("/tmp/sb/shard-12301.log")));
    }

    #[test]
    fn dry_run_start_and_add() {
        let mut ctl = ClusterController::new(quick(), ProcessGroup::new().dry_run(true));
        ctl.start(topo()).unwrap();
        assert_eq!(ctl.group().len(), 3);
        ctl.add_shard(ShardSpec::new(12302, cores("2"))).unwrap();
        assert_eq!(ctl.topology().unwrap().shards().len(), 3);
        assert!(ctl.add_shard(ShardSpec::new(12302, cores("3"))).is_err());
        assert_eq!(ctl.teardown(), 4);
        assert!(ctl.topology().is_none());
    }

    #[test]
    fn add_rejects_used_port_on_another_host() {
        let mut ctl = ClusterController::new(quick(), ProcessGroup::new().dry_run(true));
        ctl.start(topo()).unwrap();
        let mut remote = ShardSpec::new(12301, cores("5"));
        remote.host = "10.0.0.7".to_string();
        assert!(matches!(ctl.add_shard(remote), Err(BenchError::Topology(_))));
        // NOTHING WAS SPAWNED FOR THE REJECTED SHARD
        assert_eq!(ctl.group().len(), 3);
        ctl.teardown();
    }

    #[test]
    fn add_before_start_fails() {
        let mut ctl = ClusterController::new(quick(), ProcessGroup::new().dry_run(true));
        assert!(matches!(
            ctl.add_shard(ShardSpec::new(12301, cores("1"))),
            Err(BenchError::Topology(_))
        ));
    }

    #[test]
    fn control_failure_policy() {
        let failing = ClusterCommands {
            settle_ms: 0,
            coordinator: argv(&["/bin/sh", "-c", "sleep 30"]),
            shard: argv(&["/bin/sh", "-c", "sleep 30"]),
            init_args: vec![],
            control: argv(&["/bin/sh", "-c", "exit 2"]),
            ..ClusterCommands::default()
        };
        let mut lenient = ClusterController::new(failing.clone(), ProcessGroup::new());
        lenient.start(topo()).unwrap();
        lenient.teardown();

        let strict = ClusterCommands {
            abort_on_control_error: true,
            ..failing
        };
        let mut ctl = ClusterController::new(strict, ProcessGroup::new());
        assert!(matches!(ctl.start(topo()), Err(BenchError::ControlCommand { .. })));
        ctl.teardown();
    }
}
