use std::path::Path;
use std::process::Command;

use anyhow::{bail, Result};

use shardbench::config::Config;
use shardbench::cores::{online_cpus, CoreSet};

fn check_tool(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn check_dir(label: &str, dir: Option<&Path>) -> bool {
    let Some(dir) = dir else {
        println!("  {:<24}(CURRENT DIRECTORY)", label);
        return true;
    };
    if dir.is_dir() {
        println!("  {:<24}OK ({})", label, dir.display());
        true
    } else {
        println!("  {:<24}MISSING ({})", label, dir.display());
        false
    }
}

fn check_cores(label: &str, cores: &CoreSet, online: &CoreSet) -> bool {
    if cores.is_empty() {
        println!("  {:<24}UNPINNED", label);
        return true;
    }
    let offline: Vec<usize> = cores
        .cores()
        .iter()
        .copied()
        .filter(|c| !online.contains(*c))
        .collect();
    if offline.is_empty() || online.is_empty() {
        println!("  {:<24}OK ({})", label, cores);
        true
    } else {
        println!("  {:<24}OFFLINE CPUS {:?}", label, offline);
        false
    }
}

pub fn run_check(cfg: &Config) -> Result<()> {
    println!("SHARDBENCH ENVIRONMENT CHECK");
    println!();

    let mut ok = true;
    let mut tools: Vec<&str> = Vec::new();
    for argv in [
        &cfg.cluster.commands.coordinator,
        &cfg.cluster.commands.shard,
        &cfg.cluster.commands.control,
        &cfg.load.generator.command,
    ] {
        if let Some(program) = argv.first() {
            if !tools.contains(&program.as_str()) {
                tools.push(program.as_str());
            }
        }
    }
    println!("TOOLS:");
    for tool in &tools {
        if check_tool(tool) {
            println!("  {:<24}OK", tool);
        } else {
            println!("  {:<24}MISSING", tool);
            ok = false;
        }
    }
    println!();

    println!("DIRECTORIES:");
    ok &= check_dir("cluster cwd", cfg.cluster.commands.cwd.as_deref());
    ok &= check_dir("load cwd", cfg.load.generator.cwd.as_deref());
    println!();

    let online = online_cpus();
    println!("CPUS:");
    if online.is_empty() {
        println!("  {:<24}UNKNOWN (SKIPPED)", "online");
    } else {
        println!("  {:<24}{}", "online", online);
    }
    ok &= check_cores("coordinator", &cfg.cluster.coordinator.cores, &online);
    ok &= check_cores("clients", &cfg.load.client_cores, &online);
    for (i, shard) in cfg.cluster.shards.iter().enumerate() {
        ok &= check_cores(&format!("shard {}", i), shard, &online);
    }
    for profile in &cfg.profiles {
        let servers = CoreSet::union(profile.shards.iter());
        ok &= check_cores(&format!("profile {}", profile.name), &servers, &online);
        let clients = profile.client_cores.as_ref().unwrap_or(&cfg.load.client_cores);
        let shared = servers.intersection(clients);
        if !shared.is_empty() {
            println!("  {:<24}CLIENTS SHARE CPUS {} WITH SERVERS", "", shared);
        }
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
        Ok(())
    } else {
        println!("SOME CHECKS FAILED");
        if tools.contains(&"go") && !check_tool("go") {
            println!("  Install Go: https://go.dev/dl");
        }
        bail!("environment check failed");
    }
}
