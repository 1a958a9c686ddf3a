use clap::Parser;
use color_eyre::eyre;
use console::style;
use itertools::Itertools;
use nmoesim::{config::Policy, trace::Trace, Config, Simulator};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Options {
    /// Hierarchy configuration (YAML or JSON)
    #[arg(short, long, value_name = "CONFIG")]
    config: PathBuf,
    /// Client accesses to replay (YAML or JSON)
    #[arg(short, long, value_name = "TRACE")]
    trace: PathBuf,
    /// Override the configured propagation policy
    #[arg(long, value_enum)]
    policy: Option<Policy>,
    /// Print the statistics as JSON
    #[arg(long)]
    json: bool,
    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,
}

/// Tuple keyed counters do not map to JSON objects, so they are flattened.
#[derive(Debug, Serialize)]
struct Report<'a> {
    sim: &'a stats::Sim,
    accesses: Vec<stats::AccessRow>,
    networks: &'a indexmap::IndexMap<String, stats::Network>,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let options = Options::parse();

    let level = match options.debug {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut config = Config::from_path(&options.config)?;
    if let Some(policy) = options.policy {
        config.policy = policy;
    }
    let trace = Trace::from_path(&options.trace)?;

    let start = std::time::Instant::now();
    let mut sim = Simulator::new(config)?;
    nmoesim::trace::run(&mut sim, &trace)?;
    let stats = sim.stats();
    log::info!("simulation done in {:?}", start.elapsed());

    if options.json {
        let report = Report {
            sim: &stats.sim,
            accesses: stats.access_rows(),
            networks: &stats.networks,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} {} accesses, {} cycles, {} events",
        style("SIMULATED").bold(),
        stats.sim.accesses,
        stats.sim.cycles,
        stats.sim.events
    );
    for (module, cache) in stats.caches.iter() {
        let accesses = cache
            .flatten()
            .into_iter()
            .map(|((kind, status), count)| format!("{kind}[{status}]={count}"))
            .join(" ");
        println!("{:>12}: {accesses}", style(module).cyan());
        let retries: usize = cache.retries.values().sum();
        println!(
            "{:>12}  retries={retries} evictions={} (dirty={}) port waits={} lock waits={} useful prefetches={}",
            "",
            cache.evictions,
            cache.dirty_evictions,
            cache.port_waits,
            cache.lock_waits,
            cache.useful_prefetches,
        );
    }
    for (network, net) in &stats.networks {
        println!(
            "{:>12}: {} messages, {} bytes, {} rejected",
            style(network).cyan(),
            net.messages,
            net.bytes,
            net.rejected
        );
    }
    Ok(())
}
