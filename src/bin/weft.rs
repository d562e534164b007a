//! Command-line entry point: runs an in-process weft cluster.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};
use weft::{Cluster, ClusterConfig, GraphElementHandle, PropertyPredicate, WeftError};

#[derive(Parser, Debug)]
#[command(
    name = "weft",
    version,
    about = "Sharded graph store with cached cross-shard reachability",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, env = "WEFT_CONFIG", help = "Path to a TOML config file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override cluster.num_shards")]
    shards: Option<u32>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the end-to-end scenarios against a fresh cluster
    Demo,
    /// Build a random graph and hammer it with concurrent clients
    Stress(StressCmd),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
struct StressCmd {
    #[arg(long, default_value_t = 7, help = "Seed for the workload generator")]
    seed: u64,

    #[arg(long, default_value_t = 64, help = "Nodes to create")]
    nodes: usize,

    #[arg(long, default_value_t = 160, help = "Edges to create")]
    edges: usize,

    #[arg(long, default_value_t = 4, help = "Concurrent clients")]
    clients: usize,

    #[arg(long, default_value_t = 50, help = "Requests per client")]
    requests: usize,

    #[arg(
        long,
        default_value_t = 0.1,
        help = "Fraction of requests that delete an edge"
    )]
    delete_ratio: f64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct ScenarioReport {
    scenario: u32,
    name: &'static str,
    passed: bool,
    detail: String,
}

#[derive(Debug, Default, Serialize)]
struct StressReport {
    seed: u64,
    nodes: usize,
    edges: usize,
    clients: usize,
    reachable: usize,
    unreachable: usize,
    deletes: usize,
    rejected: usize,
    elapsed_ms: u64,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    install_tracing_subscriber();
    let cli = Cli::parse();
    let mut config = ClusterConfig::load(cli.config.as_deref())?;
    if let Some(shards) = cli.shards {
        config.cluster.num_shards = shards;
    }
    config.validate()?;

    match &cli.command {
        Command::Demo => {
            let reports = run_demo(&config)?;
            let failed = reports.iter().filter(|r| !r.passed).count();
            emit(cli.format, &reports, || {
                for report in &reports {
                    let verdict = if report.passed { "ok" } else { "FAILED" };
                    println!(
                        "scenario {} {:<28} {verdict:<6} {}",
                        report.scenario, report.name, report.detail
                    );
                }
            })?;
            if failed > 0 {
                return Err(format!("{failed} scenario(s) failed").into());
            }
        }
        Command::Stress(cmd) => {
            let report = run_stress(&config, cmd)?;
            emit(cli.format, &report, || {
                println!("seed         {}", report.seed);
                println!("graph        {} nodes, {} edges", report.nodes, report.edges);
                println!("clients      {}", report.clients);
                println!("reachable    {}", report.reachable);
                println!("unreachable  {}", report.unreachable);
                println!("deletes      {}", report.deletes);
                println!("rejected     {}", report.rejected);
                println!("elapsed      {} ms", report.elapsed_ms);
            })?;
        }
        Command::Config => print!("{}", config.to_toml()?),
    }
    Ok(())
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(),
) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Text => text(),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn run_demo(config: &ClusterConfig) -> Result<Vec<ScenarioReport>, Box<dyn Error>> {
    let mut config = config.clone();
    // Cache rounds are driven by hand so scenario 5 is deterministic.
    config.coordinator.cache_update_interval_ms = 3_600_000;
    let cluster = Cluster::start(&config)?;
    let mut client = cluster.client()?;
    let any = PropertyPredicate::any;
    let mut reports = Vec::new();

    let a = client.create_node()?;
    let b = client.create_node()?;
    let ab = client.create_edge(a, b)?;
    let reachable = client.reachable(a, b, any())?;
    reports.push(ScenarioReport {
        scenario: 1,
        name: "edge makes target reachable",
        passed: reachable,
        detail: format!("reachable({a}, {b}) = {reachable}"),
    });

    client.delete_edge(a, ab)?;
    let reachable = client.reachable(a, b, any())?;
    reports.push(ScenarioReport {
        scenario: 2,
        name: "deleted edge breaks path",
        passed: !reachable,
        detail: format!("reachable({a}, {b}) = {reachable}"),
    });

    client.delete_node(a)?;
    let second = client.delete_node(a);
    reports.push(ScenarioReport {
        scenario: 3,
        name: "double delete is rejected",
        passed: matches!(second, Err(WeftError::Rejected(_))),
        detail: match second {
            Ok(()) => "second delete accepted".to_string(),
            Err(err) => err.to_string(),
        },
    });

    let Chain { a, b, c, bc } = chain(&mut client)?;
    let reachable = client.reachable(a, c, any())?;
    reports.push(ScenarioReport {
        scenario: 4,
        name: "two-hop cross-shard flood",
        passed: reachable,
        detail: format!("reachable({a}, {c}) = {reachable}"),
    });

    let coordinator = cluster.coordinator();
    let fresh = coordinator.reachable_detailed(a, c, &any())?;
    coordinator.run_cache_round()?;
    coordinator.run_cache_round()?;
    let cached = coordinator.reachable_detailed(a, c, &any())?;
    client.delete_edge(b, bc)?;
    let after = coordinator.reachable_detailed(a, c, &any())?;
    reports.push(ScenarioReport {
        scenario: 5,
        name: "stale cached answer retried",
        passed: fresh.reachable
            && cached.used_cache_id.is_some()
            && !after.reachable
            && after.attempts > 1,
        detail: format!(
            "cached={:?} after_delete={} attempts={}",
            cached.used_cache_id, after.reachable, after.attempts
        ),
    });
    Ok(reports)
}

struct Chain {
    a: GraphElementHandle,
    b: GraphElementHandle,
    c: GraphElementHandle,
    bc: GraphElementHandle,
}

/// Creates `a -> b -> c` on consecutive shards.
fn chain(client: &mut weft::Client) -> Result<Chain, WeftError> {
    let a = client.create_node()?;
    let b = client.create_node()?;
    let c = client.create_node()?;
    client.create_edge(a, b)?;
    let bc = client.create_edge(b, c)?;
    Ok(Chain { a, b, c, bc })
}

fn run_stress(config: &ClusterConfig, cmd: &StressCmd) -> Result<StressReport, Box<dyn Error>> {
    if cmd.nodes < 2 || cmd.clients == 0 {
        return Err("stress needs at least two nodes and one client".into());
    }
    let cluster = Cluster::start(config)?;
    let mut rng = ChaCha8Rng::seed_from_u64(cmd.seed);
    let mut builder = cluster.client()?;
    let nodes = (0..cmd.nodes)
        .map(|_| builder.create_node())
        .collect::<Result<Vec<_>, _>>()?;
    let mut edges = Vec::with_capacity(cmd.edges);
    for _ in 0..cmd.edges {
        let from = nodes[rng.gen_range(0..nodes.len())];
        let to = nodes[rng.gen_range(0..nodes.len())];
        edges.push((from, builder.create_edge(from, to)?));
    }
    let nodes = Arc::new(nodes);
    let edges = Arc::new(edges);

    let started = Instant::now();
    let barrier = Arc::new(Barrier::new(cmd.clients));
    let mut workers = Vec::with_capacity(cmd.clients);
    for worker in 0..cmd.clients {
        let mut client = cluster.client()?;
        let mut rng = ChaCha8Rng::seed_from_u64(cmd.seed ^ ((worker as u64 + 1) << 32));
        let nodes = Arc::clone(&nodes);
        let edges = Arc::clone(&edges);
        let barrier = Arc::clone(&barrier);
        let requests = cmd.requests;
        let delete_ratio = cmd.delete_ratio;
        workers.push(thread::spawn(move || -> Result<StressReport, WeftError> {
            let mut report = StressReport::default();
            barrier.wait();
            for _ in 0..requests {
                if !edges.is_empty() && rng.gen_bool(delete_ratio.clamp(0.0, 1.0)) {
                    let (node, edge) = edges[rng.gen_range(0..edges.len())];
                    report.deletes += 1;
                    match client.delete_edge(node, edge) {
                        Ok(()) => {}
                        Err(WeftError::Rejected(_)) => report.rejected += 1,
                        Err(err) => return Err(err),
                    }
                    continue;
                }
                let from = nodes[rng.gen_range(0..nodes.len())];
                let to = nodes[rng.gen_range(0..nodes.len())];
                if client.reachable(from, to, PropertyPredicate::any())? {
                    report.reachable += 1;
                } else {
                    report.unreachable += 1;
                }
            }
            Ok(report)
        }));
    }

    let mut report = StressReport {
        seed: cmd.seed,
        nodes: cmd.nodes,
        edges: cmd.edges,
        clients: cmd.clients,
        ..StressReport::default()
    };
    for worker in workers {
        let partial = worker
            .join()
            .map_err(|_| "stress client panicked")??;
        report.reachable += partial.reachable;
        report.unreachable += partial.unreachable;
        report.deletes += partial.deletes;
        report.rejected += partial.rejected;
    }
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}
