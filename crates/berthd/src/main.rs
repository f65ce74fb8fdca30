//! berthd: operator CLI for the Berth placement engine.
//!
//! Runs one subcommand against the redb store:
//! - `seed`: load a TOML topology with host capacity
//! - `plan`: place one workload and print the decision
//! - `capacity`: print a host's CPU and memory records
//! - `release`: hand capacity back, optionally holding it for the workload
//! - `config`: print the effective configuration
//!
//! # Usage
//!
//! ```text
//! berthd --data-dir /var/lib/berth seed --topology topology.toml
//! berthd --data-dir /var/lib/berth plan --zone zone-1 --cores 2 --speed 2000 --memory 4096
//! ```

mod commands;
mod topology;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use berth_core::{BerthConfig, ResourceRequest};
use berth_state::StateStore;

use crate::commands::PlanArgs;
use crate::topology::TopologyFile;

#[derive(Parser)]
#[command(name = "berthd", about = "Capacity-aware VM placement")]
struct Cli {
    /// Path to berth.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the store. Relative store paths resolve against it.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load zones, pods, clusters and hosts with their capacity.
    Seed {
        #[arg(long)]
        topology: PathBuf,
    },

    /// Place one workload and reserve its capacity.
    Plan {
        #[arg(long)]
        zone: String,

        /// Number of virtual CPUs.
        #[arg(long)]
        cores: u32,

        /// Speed per core in MHz.
        #[arg(long)]
        speed: u32,

        /// Memory in MB.
        #[arg(long)]
        memory: u64,

        /// Host the workload last ran on.
        #[arg(long)]
        last_host: Option<String>,

        #[arg(long = "avoid-host")]
        avoid_hosts: Vec<String>,

        #[arg(long = "avoid-cluster")]
        avoid_clusters: Vec<String>,

        #[arg(long = "avoid-pod")]
        avoid_pods: Vec<String>,
    },

    /// Show a host's capacity records.
    Capacity {
        #[arg(long)]
        host: String,
    },

    /// Return capacity from a stopped workload.
    Release {
        #[arg(long)]
        host: String,

        /// CPU in MHz.
        #[arg(long)]
        cpu: u64,

        /// Memory in MB.
        #[arg(long)]
        memory: u64,

        /// Hold the capacity for the workload's return instead of freeing it.
        /// The sticky return then drains `reserved` without counting in `used`.
        #[arg(long)]
        reserve: bool,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,berth=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let data_dir = cli.data_dir.as_deref();
    let store = || open_store(&config, data_dir);

    let output = match cli.command {
        Command::Seed { topology } => {
            let file = TopologyFile::from_file(&topology)?;
            commands::seed(&store()?, &file)?
        }
        Command::Plan {
            zone,
            cores,
            speed,
            memory,
            last_host,
            avoid_hosts,
            avoid_clusters,
            avoid_pods,
        } => commands::plan(
            &store()?,
            &config,
            &PlanArgs {
                zone,
                cores,
                speed_mhz: speed,
                memory_mb: memory,
                last_host,
                avoid_hosts,
                avoid_clusters,
                avoid_pods,
            },
        )?,
        Command::Capacity { host } => commands::capacity(&store()?, &host)?,
        Command::Release {
            host,
            cpu,
            memory,
            reserve,
        } => commands::release(&store()?, &host, ResourceRequest::new(cpu, memory), reserve)?,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BerthConfig> {
    match path {
        Some(path) => {
            let config = BerthConfig::from_file(path)?;
            info!(
                path = %path.display(),
                strategy = config.planner.strategy.as_str(),
                "config loaded"
            );
            Ok(config)
        }
        None => Ok(BerthConfig::default()),
    }
}

fn open_store(config: &BerthConfig, data_dir: Option<&Path>) -> anyhow::Result<StateStore> {
    let db_path = match data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create data dir {}", dir.display()))?;
            dir.join(&config.store.path)
        }
        None => config.store.path.clone(),
    };
    let lock_timeout = config.planner.lock_timeout();
    let store = StateStore::open(&db_path)?.with_lock_timeout(lock_timeout);
    info!(path = ?db_path, ?lock_timeout, "state store opened");
    Ok(store)
}
