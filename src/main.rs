use ad_prune::engine::{DeleteCounter, NotWrittenCounter};
use ad_prune::init::{build_pipeline, load_config, setup_logging};
use ad_prune::pipeline::Pipeline;
use ad_prune::stats::CounterReport;
use ad_prune::store::{CounterStore, StoreLayout};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

/// Keeps an aggregated blocklist limited to rules whose domains still resolve.
#[derive(Parser, Debug)]
#[command(name = "ad-prune", version, about)]
struct Args {
    /// Path to the TOML configuration
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Validate this shard (1-based)
    #[arg(long)]
    part: Option<usize>,

    /// Re-fetch sources and re-partition before anything else
    #[arg(long)]
    force_update: bool,

    /// Print the counter report
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, from_file) = load_config(&args.config).await?;
    setup_logging(&config);
    info!("Starting ad-prune...");
    if !from_file {
        info!("Config file {} not found, using defaults.", args.config.display());
    }

    if args.stats {
        let layout = StoreLayout::from_config(&config);
        let dc = CounterStore::<DeleteCounter>::new(layout.delete_counter_file()).load();
        let nw = CounterStore::<NotWrittenCounter>::new(layout.not_written_file()).load();
        let report = CounterReport::build(&dc, &nw);
        println!("{}", report.render(config.lifecycle.discard_threshold));
        if args.part.is_none() && !args.force_update {
            return Ok(());
        }
    }

    let pipeline = build_pipeline(&config).await?;
    let result = run(&pipeline, &args).await;
    if result.is_err() {
        for event in pipeline.logger().recent() {
            error!("Recent status event: {:?}", event);
        }
    }
    result
}

async fn run(pipeline: &Pipeline, args: &Args) -> Result<()> {
    pipeline.ensure_partition(args.force_update).await?;

    if let Some(part) = args.part {
        let summary = pipeline.run_shard(part).await?;
        println!("{summary}");
    }

    Ok(())
}
