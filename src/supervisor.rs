// SHARDBENCH PROCESS SUPERVISOR
// OWNS EVERY EXTERNAL PROCESS AN EXPERIMENT STARTS: COORDINATOR, SHARDS,
// LOAD GENERATOR. EACH CHILD RUNS IN ITS OWN PROCESS GROUP SO `go run` AND
// WHATEVER IT EXECS DIE TOGETHER ON killpg().
//
// TEARDOWN IS RAII: DROPPING A ProcessGroup SIGKILLS AND REAPS EVERYTHING IT
// STILL TRACKS. DRIVERS ALSO CALL terminate_all() EXPLICITLY ON THE HAPPY PATH.
// THERE IS NO GLOBAL PROCESS LIST.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cores::CoreSet;
use crate::error::{BenchError, Result};

// BLOCKING READS WAKE THIS OFTEN TO CHECK THE SHUTDOWN FLAG
const READ_POLL: Duration = Duration::from_millis(100);
const DEFAULT_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Coordinator,
    Shard,
    LoadGenerator,
    Control,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::Coordinator => "COORD",
            Self::Shard => "SHARD",
            Self::LoadGenerator => "CLIENT",
            Self::Control => "CTL",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Capture,
    Discard,
    Append(PathBuf),
}

#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub role: Role,
    pub program: String,
    pub args: Vec<String>,
    pub cores: CoreSet,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdout: Output,
    pub show_stderr: bool,
    // PR_SET_PDEATHSIG FIRES WHEN THE SPAWNING *THREAD* EXITS, NOT THE PROCESS.
    // ONLY SET IT FOR CHILDREN SPAWNED FROM A THREAD THAT OUTLIVES THEM.
    pub die_with_parent: bool,
}

impl LaunchSpec {
    pub fn new(role: Role, argv: Vec<String>) -> Self {
        let mut argv = argv.into_iter();
        let program = argv.next().unwrap_or_default();
        Self {
            role,
            program,
            args: argv.collect(),
            cores: CoreSet::default(),
            cwd: None,
            env: Vec::new(),
            stdout: Output::Discard,
            show_stderr: false,
            die_with_parent: true,
        }
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn command_line(&self) -> String {
        let base = self.argv().join(" ");
        if self.cores.is_empty() {
            base
        } else {
            format!("[cores {}] {}", self.cores, base)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u64);

#[derive(Clone, Debug)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub pgid: i32,
    pub role: Role,
    pub argv: Vec<String>,
    pub cores: CoreSet,
}

struct Tracked {
    info: ProcessInfo,
    // None IN DRY-RUN MODE
    child: Option<Child>,
    lines: Option<Receiver<String>>,
}

pub struct ProcessGroup {
    procs: Vec<Tracked>,
    next_id: u64,
    dry_run: bool,
    grace: Duration,
    shutdown: Option<&'static AtomicBool>,
}

impl ProcessGroup {
    pub fn new() -> Self {
        Self {
            procs: Vec::new(),
            next_id: 0,
            dry_run: false,
            grace: DEFAULT_GRACE,
            shutdown: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn shutdown_flag(mut self, flag: &'static AtomicBool) -> Self {
        self.shutdown = Some(flag);
        self
    }

    // A FRESH, EMPTY GROUP WITH THE SAME SETTINGS
    pub fn sibling(&self) -> Self {
        Self {
            procs: Vec::new(),
            next_id: 0,
            dry_run: self.dry_run,
            grace: self.grace,
            shutdown: self.shutdown,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn interrupted(&self) -> bool {
        self.shutdown.map(|f| f.load(Ordering::Relaxed)).unwrap_or(false)
    }

    pub fn spawn(&mut self, spec: &LaunchSpec) -> Result<ProcessId> {
        let id = ProcessId(self.next_id);
        self.next_id += 1;

        if self.dry_run {
            info!("[DRY-RUN] STARTING {}: {}", spec.role.label(), spec.command_line());
            self.procs.push(Tracked {
                info: ProcessInfo {
                    id,
                    pgid: 0,
                    role: spec.role,
                    argv: spec.argv(),
                    cores: spec.cores.clone(),
                },
                child: None,
                lines: None,
            });
            return Ok(id);
        }

        let spawn_err = |source: std::io::Error| BenchError::Spawn {
            program: spec.program.clone(),
            source,
        };

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .process_group(0)
            .stdin(Stdio::null())
            .stderr(if spec.show_stderr { Stdio::inherit() } else { Stdio::null() });
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        match &spec.stdout {
            Output::Capture => {
                cmd.stdout(Stdio::piped());
            }
            Output::Discard => {
                cmd.stdout(Stdio::null());
            }
            Output::Append(path) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir).map_err(spawn_err)?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(spawn_err)?;
                cmd.stdout(Stdio::from(file));
            }
        }

        let cores = spec.cores.clone();
        let die_with_parent = spec.die_with_parent;
        unsafe {
            cmd.pre_exec(move || {
                if die_with_parent {
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong);
                }
                cores.apply_to_current()
            });
        }

        let mut child = cmd.spawn().map_err(spawn_err)?;
        let pgid = child.id() as i32;
        let lines = match child.stdout.take().map(|out| spawn_reader(out, pgid)).transpose() {
            Ok(lines) => lines,
            // NOBODY WOULD READ ITS OUTPUT: DO NOT LEAVE IT RUNNING
            Err(e) => return Err(abandon(child, pgid, &spec.program, e)),
        };

        debug!("STARTED {} pgid={}: {}", spec.role.label(), pgid, spec.command_line());
        self.procs.push(Tracked {
            info: ProcessInfo {
                id,
                pgid,
                role: spec.role,
                argv: spec.argv(),
                cores: spec.cores.clone(),
            },
            child: Some(child),
            lines,
        });
        Ok(id)
    }

    // NEXT STDOUT LINE, OR None AT END OF STREAM / SHUTDOWN / NOT CAPTURED
    pub fn read_line(&self, id: ProcessId) -> Option<String> {
        let rx = self.find(id)?.lines.as_ref()?;
        loop {
            if self.interrupted() {
                return None;
            }
            match rx.recv_timeout(READ_POLL) {
                Ok(line) => return Some(line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    // GRACEFUL STOP OF ONE PROCESS: SIGTERM, GRACE PERIOD, THEN SIGKILL
    pub fn stop(&mut self, id: ProcessId) {
        let Some(pos) = self.procs.iter().position(|t| t.info.id == id) else {
            return;
        };
        let mut tracked = self.procs.remove(pos);
        let pgid = tracked.info.pgid;
        drop(tracked.lines.take());
        let Some(child) = tracked.child.as_mut() else {
            return;
        };

        if let Ok(None) = child.try_wait() {
            signal_group(pgid, libc::SIGTERM);
            let deadline = Instant::now() + self.grace;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() >= deadline => break,
                    Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                    Err(_) => break,
                }
            }
        }
        // LEADER MAY BE GONE WHILE ITS GROUP LIVES ON
        signal_group(pgid, libc::SIGKILL);
        let _ = child.wait();
        debug!("STOPPED {} pgid={}", tracked.info.role.label(), pgid);
    }

    // SIGKILL EVERY TRACKED GROUP AND REAP. IDEMPOTENT.
    pub fn terminate_all(&mut self) -> usize {
        let count = self.procs.len();
        for mut tracked in self.procs.drain(..) {
            drop(tracked.lines.take());
            signal_group(tracked.info.pgid, libc::SIGKILL);
            if let Some(child) = tracked.child.as_mut() {
                let _ = child.wait();
            }
        }
        if count > 0 {
            debug!("TERMINATED {} PROCESS GROUP(S)", count);
        }
        count
    }

    pub fn live(&mut self) -> usize {
        self.procs
            .iter_mut()
            .filter_map(|t| t.child.as_mut())
            .map(|c| matches!(c.try_wait(), Ok(None)))
            .filter(|&alive| alive)
            .count()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn info(&self, id: ProcessId) -> Option<&ProcessInfo> {
        self.find(id).map(|t| &t.info)
    }

    pub fn processes(&self) -> impl Iterator<Item = &ProcessInfo> {
        self.procs.iter().map(|t| &t.info)
    }

    fn find(&self, id: ProcessId) -> Option<&Tracked> {
        self.procs.iter().find(|t| t.info.id == id)
    }
}

impl Default for ProcessGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if !self.procs.is_empty() {
            self.terminate_all();
        }
    }
}

// ONE DETACHED THREAD PER CAPTURED PROCESS. IT ENDS WHEN THE PIPE CLOSES OR
// THE RECEIVER IS DROPPED.
fn spawn_reader(stdout: ChildStdout, pgid: i32) -> std::io::Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name(format!("stdout-{}", pgid))
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(['\n', '\r'])
                            .to_string();
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                }
            }
        })?;
    Ok(rx)
}

// KILL AND REAP A CHILD THAT STARTED BUT CANNOT BE TRACKED
fn abandon(mut child: Child, pgid: i32, program: &str, source: std::io::Error) -> BenchError {
    warn!("NO STDOUT READER FOR {} (pgid={}), KILLING IT: {}", program, pgid, source);
    signal_group(pgid, libc::SIGKILL);
    let _ = child.wait();
    BenchError::Spawn {
        program: program.to_string(),
        source,
    }
}

// ESRCH (GROUP ALREADY GONE) IS EXPECTED AND SWALLOWED.
// PGID 0 WOULD SIGNAL OUR OWN GROUP: NEVER SEND IT.
fn signal_group(pgid: i32, sig: libc::c_int) {
    if pgid <= 0 {
        return;
    }
    unsafe {
        libc::killpg(pgid, sig);
    }
}

#[derive(Clone, Debug)]
pub struct CommandOutcome {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

// RUN A SHORT-LIVED COMMAND (CONTROL TOOL) TO COMPLETION. NOT TRACKED.
pub fn run_to_completion(spec: &LaunchSpec, dry_run: bool) -> Result<CommandOutcome> {
    if dry_run {
        info!("[DRY-RUN] RUNNING {}", spec.command_line());
        return Ok(CommandOutcome {
            success: true,
            status: "dry-run".to_string(),
            stdout: String::new(),
            stderr: String::new(),
        });
    }
    debug!("RUNNING {}", spec.command_line());

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).stdin(Stdio::null());
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }
    let output = cmd.output().map_err(|source| BenchError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let outcome = CommandOutcome {
        success: output.status.success(),
        status: output.status.to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };
    if !outcome.success {
        warn!("COMMAND FAILED ({}): {}", outcome.status, spec.command_line());
    }
    Ok(outcome)
}
