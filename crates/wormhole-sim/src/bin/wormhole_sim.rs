//! Wormhole scenario runner.
//!
//! Builds the configured topology, runs the request/response flow to the
//! stop time and writes the routing dump, animation, route-tracking and
//! packet-trace artifacts.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wormhole_sim::observe::{ArtifactWriter, Observer, Recorder};
use wormhole_sim::{Driver, Scenario, Topology, TopologyConfig};

#[derive(Parser, Debug)]
#[command(name = "wormhole-sim", about = "Wormhole attack scenario for an ad hoc wireless network")]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scenario id: 1 = endpoints out of range, 2 = endpoints in range.
    #[arg(long)]
    scenario: Option<i64>,

    /// Directory for routing dumps, animation and trace files.
    #[arg(long, default_value = "scratch")]
    output_dir: PathBuf,

    /// Run without writing any artifact files.
    #[arg(long, default_value_t = false)]
    no_artifacts: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<TopologyConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            TopologyConfig::from_toml_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => TopologyConfig::default(),
    };
    if let Some(id) = cli.scenario {
        config = config.with_scenario(Scenario::from_id(id)?);
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::info!(
        scenario = %config.scenario,
        seed = config.seed,
        output_dir = %cli.output_dir.display(),
        "wormhole-sim starting"
    );

    let topology = Topology::build(&config).context("building topology")?;
    tracing::debug!("\n{topology}");

    let mut writer;
    let mut recorder;
    let observer: &mut dyn Observer = if cli.no_artifacts {
        recorder = Recorder::new();
        &mut recorder
    } else {
        writer = ArtifactWriter::new(&cli.output_dir, &config, &topology)
            .with_context(|| format!("preparing {}", cli.output_dir.display()))?;
        &mut writer
    };

    let summary = Driver::new(&config, &topology)?
        .run(observer)
        .context("running scenario")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "scenario {}: {}/{} requests answered, {} lost, next hop at snapshot {:?}, tunnel used {} times",
            config.scenario.id(),
            summary.responses_delivered,
            summary.requests_sent,
            summary.lost,
            summary.snapshot_next_hop,
            summary.tunnel_traversals
        );
    }
    Ok(())
}
