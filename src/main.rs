//! rcctl entry point.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rcctl::add_node::{JoinConfirmation, NodeJoiner};
use rcctl::check::ConsistencyChecker;
use rcctl::client::RedisConnector;
use rcctl::create::BootstrapPlanner;
use rcctl::del_node::MembershipRemovalEngine;
use rcctl::populate::DataPopulator;
use rcctl::reshard::{ReshardRequest, SlotMigrationEngine};
use rcctl::Config;
use tracing_subscriber::EnvFilter;

mod cli;
mod summary;

use cli::{Cli, Commands};
use summary::Summary;

// One task, strictly sequential awaits.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&cli, &config);

    let success = run(cli, config).await?;
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Load the config file (if any) and apply CLI overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(user) = &cli.user {
        config.connection.user = user.clone();
    }
    if let Some(password) = &cli.password {
        config.connection.password = Some(password.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(cli: &Cli, config: &Config) {
    // RUST_LOG wins unless --log-level was given explicitly.
    let filter = match (&cli.log_level, EnvFilter::try_from_default_env()) {
        (None, Ok(env)) => env,
        _ => EnvFilter::new(&config.logging.level),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, config: Config) -> Result<bool> {
    let connector = RedisConnector::new(config.connection.clone());
    let out = Summary::new(cli.format);

    match cli.command {
        Commands::Create(args) => {
            let planner = BootstrapPlanner::new(&connector, config.cluster.clone());
            let report = planner.create(&args.nodes, args.replicas).await?;
            out.bootstrap(&report)
        }
        Commands::AddNode(args) => {
            let confirmation = JoinConfirmation::from_config(&config.cluster, args.wait_for_join);
            let joiner = NodeJoiner::new(&connector, confirmation);
            let report = joiner
                .add(&args.new_node, &args.existing_node, args.master_id.as_deref())
                .await?;
            out.add_node(&report)
        }
        Commands::Reshard(args) => {
            let request = ReshardRequest {
                source_id: args.from_id,
                destination_id: args.to_id,
                slot_count: args.slots,
                batch_size: args.pipeline.unwrap_or(config.cluster.default_batch_size),
            };
            let engine = SlotMigrationEngine::new(&connector, config.cluster.migrate_timeout());
            let report = engine.reshard(&args.entry, &request).await?;
            out.reshard(&report)
        }
        Commands::DelNode(args) => {
            let engine = MembershipRemovalEngine::new(&connector);
            let report = engine.remove(&args.entry, &args.node_id).await?;
            out.removal(&report)
        }
        Commands::Check(args) => {
            let checker = ConsistencyChecker::new(&connector, config.cluster.total_slots);
            let report = checker.run(&args.entry).await?;
            out.check(&report)
        }
        Commands::PopulateTestData(args) => {
            let populator = DataPopulator::new(&connector, config.cluster.total_slots);
            let report = populator.populate(&args.entry, args.num_of_keys).await?;
            out.populate(&report)
        }
    }
}
