use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use msisim::sim::config::{evictions_from, Config, OpSpec, SimConfig, WorkloadConfig};
use msisim::sim::log;
use msisim::sim::top::System;
use toml::Table;

#[derive(Parser)]
#[command(version, about = "Directory-based MSI coherence simulator")]
struct MsiArgs {
    #[arg(help="Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help="Override number of nodes")]
    num_nodes: Option<usize>,
    #[arg(long, help="Override node-to-node latency in cycles")]
    node_latency: Option<u32>,
    #[arg(long, help="Override local cache latency in cycles")]
    cache_latency: Option<u32>,
    #[arg(long, help="Enable log at level (0:none, 1:info, 2:debug)")]
    log: Option<u64>,
    #[arg(long, help="Step nodes on worker threads")]
    parallel: Option<bool>,
    #[arg(long = "op", value_name = "NODE:r|w:ADDR", help="Append a memory op to the workload")]
    ops: Vec<OpSpec>,
    #[arg(long, help="Write the final directory and line states as JSON")]
    dump_state: Option<PathBuf>,
}

pub fn main() -> anyhow::Result<()> {
    let argv = MsiArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;

    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;
    let mut sim_config = SimConfig::from_section(config_table.get("sim"));
    let mut workload = WorkloadConfig::from_section(config_table.get("workload"));
    let evictions = evictions_from(config_table.get("evict"));

    // override toml configs with argv
    sim_config.log_level = argv.log.unwrap_or(sim_config.log_level);
    sim_config.num_nodes = argv.num_nodes.unwrap_or(sim_config.num_nodes);
    sim_config.node_latency = argv.node_latency.unwrap_or(sim_config.node_latency);
    sim_config.cache_latency = argv.cache_latency.unwrap_or(sim_config.cache_latency);
    sim_config.parallel = argv.parallel.unwrap_or(sim_config.parallel);
    workload.ops.extend(argv.ops);

    log::init(sim_config.log_level);

    let mut sim = System::new(sim_config, &workload, &evictions)?;
    let cycles = sim.run()?;
    println!("simulation finished in {} cycles", cycles);

    if let Some(path) = argv.dump_state {
        let json = serde_json::to_string_pretty(&sim.snapshot())?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
