use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{LoggingConfig, TollgateConfig};
use tollgate::entry::DEFAULT_CONTEXT_NAME;
use tollgate::flow::FlowRuleManager;
use tollgate::FlowGuard;

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Flow-control rule evaluation")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a rule file and print the rules that would be enforced
    Validate {
        /// Flow rule file (YAML or JSON)
        #[arg(long)]
        rules: PathBuf,
    },
    /// Drive concurrent calls against a resource and report the decisions
    Simulate {
        /// Flow rule file, overriding the configured one
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Protected resource name
        #[arg(long)]
        resource: String,
        /// Caller origin
        #[arg(long, default_value = "")]
        origin: String,
        /// Context name
        #[arg(long, default_value = DEFAULT_CONTEXT_NAME)]
        context: String,
        /// Number of calls
        #[arg(long, default_value_t = 10)]
        calls: u32,
        /// Calls in flight at once
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// How long each admitted call holds its entry
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
        /// Mark calls as prioritized
        #[arg(long)]
        prioritized: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TollgateConfig::from_file(path)?,
        None => TollgateConfig::default(),
    };
    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Validate { rules } => {
            let manager = FlowRuleManager::from_file(&rules)?;
            let all = manager.all_rules();
            for rule in &all {
                println!("{}", rule);
            }
            println!(
                "{} rule(s) across {} resource(s)",
                all.len(),
                manager.resource_count()
            );
        }
        Command::Simulate {
            rules,
            resource,
            origin,
            context,
            calls,
            concurrency,
            hold_ms,
            prioritized,
        } => {
            if let Some(path) = rules {
                config.rules.path = Some(path.display().to_string());
            }
            let guard = Arc::new(FlowGuard::from_config(&config)?);
            let hold = Duration::from_millis(hold_ms);
            let started = Instant::now();

            let outcomes: Vec<bool> = stream::iter(0..calls)
                .map(|_| {
                    let guard = guard.clone();
                    let resource = resource.clone();
                    let origin = origin.clone();
                    let context = context.clone();
                    tokio::task::spawn_blocking(move || {
                        let entry = if prioritized {
                            guard.entry_prioritized(&resource, &context, &origin, 1)
                        } else {
                            guard.entry(&resource, &context, &origin, 1)
                        };
                        match entry {
                            Ok(_entry) => {
                                std::thread::sleep(hold);
                                true
                            }
                            Err(_) => false,
                        }
                    })
                })
                .buffer_unordered(concurrency.max(1))
                .map(|joined| joined.unwrap_or(false))
                .collect()
                .await;

            let admitted = outcomes.iter().filter(|ok| **ok).count();
            info!(
                resource = %resource,
                admitted = admitted,
                blocked = outcomes.len() - admitted,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Simulation finished"
            );
            println!(
                "resource={} admitted={} blocked={}",
                resource,
                admitted,
                outcomes.len() - admitted
            );
        }
    }

    Ok(())
}

/// Initialize tracing; `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
