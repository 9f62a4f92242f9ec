// SHARDBENCH CORE SETS
// CPU LISTS IN THE KERNEL'S cpulist FORMAT ("0-3,8,10-11").
// AN EMPTY SET MEANS UNRESTRICTED: THE PROCESS INHERITS OUR AFFINITY.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BenchError;

const ONLINE_PATH: &str = "/sys/devices/system/cpu/online";

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CoreSet(Vec<usize>);

impl CoreSet {
    pub fn new(cores: impl IntoIterator<Item = usize>) -> Result<Self, BenchError> {
        let mut v: Vec<usize> = cores.into_iter().collect();
        if let Some(&bad) = v.iter().find(|&&c| c >= libc::CPU_SETSIZE as usize) {
            return Err(BenchError::Config(format!(
                "core {} exceeds CPU_SETSIZE ({})",
                bad,
                libc::CPU_SETSIZE
            )));
        }
        v.sort_unstable();
        v.dedup();
        Ok(Self(v))
    }

    pub fn range(lo: usize, hi: usize) -> Result<Self, BenchError> {
        Self::new(lo..hi)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn cores(&self) -> &[usize] {
        &self.0
    }

    pub fn contains(&self, core: usize) -> bool {
        self.0.binary_search(&core).is_ok()
    }

    pub fn intersection(&self, other: &CoreSet) -> CoreSet {
        CoreSet(self.0.iter().copied().filter(|c| other.contains(*c)).collect())
    }

    pub fn union<'a>(sets: impl IntoIterator<Item = &'a CoreSet>) -> CoreSet {
        let mut v: Vec<usize> = sets.into_iter().flat_map(|s| s.0.iter().copied()).collect();
        v.sort_unstable();
        v.dedup();
        CoreSet(v)
    }

    // PIN THE CALLING THREAD (OR THE CHILD BETWEEN fork AND exec) TO THIS SET.
    // ASYNC-SIGNAL-SAFE: NO ALLOCATION, ONLY THE RAW SYSCALL.
    pub fn apply_to_current(&self) -> std::io::Result<()> {
        if self.0.is_empty() {
            return Ok(());
        }
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            for &cpu in &self.0 {
                libc::CPU_SET(cpu, &mut set);
            }
            if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

impl FromStr for CoreSet {
    type Err = BenchError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut cores = Vec::new();
        for range in raw.trim().split(',') {
            let range = range.trim();
            if range.is_empty() {
                continue;
            }
            let parts: Vec<&str> = range.split('-').collect();
            let bad = || BenchError::Config(format!("bad core list `{}`", raw));
            match parts.len() {
                1 => cores.push(parts[0].trim().parse::<usize>().map_err(|_| bad())?),
                2 => {
                    let lo = parts[0].trim().parse::<usize>().map_err(|_| bad())?;
                    let hi = parts[1].trim().parse::<usize>().map_err(|_| bad())?;
                    if hi < lo {
                        return Err(bad());
                    }
                    cores.extend(lo..=hi);
                }
                _ => return Err(bad()),
            }
        }
        CoreSet::new(cores)
    }
}

impl TryFrom<String> for CoreSet {
    type Error = BenchError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<CoreSet> for String {
    fn from(set: CoreSet) -> String {
        set.to_string()
    }
}

// COMPACT FORM: CONSECUTIVE RUNS COLLAPSE TO "lo-hi"
impl fmt::Display for CoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut i = 0;
        while i < self.0.len() {
            let lo = self.0[i];
            let mut hi = lo;
            while i + 1 < self.0.len() && self.0[i + 1] == hi + 1 {
                i += 1;
                hi = self.0[i];
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if lo == hi {
                write!(f, "{}", lo)?;
            } else {
                write!(f, "{}-{}", lo, hi)?;
            }
            i += 1;
        }
        Ok(())
    }
}

pub fn online_cpus() -> CoreSet {
    std::fs::read_to_string(ONLINE_PATH)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default()
}
