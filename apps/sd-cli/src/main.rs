use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use parking_lot::Mutex;
use sd_core::{ConfigError, FetchError, ItemId, ItemMetadata, SchedulerConfig, Timestep};
use sd_fetcher::{FnSource, PanelGroup, PlotSource};
use sd_registry::{RegistryError, TaskRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sd-cli")]
#[command(about = "simdash CLI - drive the plot fetch scheduler against a synthetic backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrub through time steps with several panels and report the fetch schedule
    Simulate {
        /// Scheduler configuration YAML (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of panels, each bound to its own item
        #[arg(long, default_value_t = 2)]
        panels: usize,
        /// Number of time steps every item reports
        #[arg(long, default_value_t = 20)]
        steps: Timestep,
        /// Simulated network latency per request
        #[arg(long, default_value_t = 40)]
        latency_ms: u64,
        /// Override the global concurrency limit (0 = unbounded)
        #[arg(long)]
        limit: Option<usize>,
        /// Override the number of steps prefetched after the current one
        #[arg(long)]
        look_ahead: Option<usize>,
        /// Steps to visit, in order
        #[arg(long, value_delimiter = ',', default_value = "0,5,6,12")]
        scrub: Vec<Timestep>,
        /// Fail every Nth fetch request (0 = never)
        #[arg(long, default_value_t = 0)]
        fail_every: usize,
    },
    /// Print the effective scheduler configuration
    ShowConfig {
        /// Scheduler configuration YAML
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

type CliResult<T> = Result<T, CliError>;

/// What the synthetic backend hands back for one step.
#[derive(Debug, Clone)]
struct Frame {
    timestep: Timestep,
    points: usize,
}

/// Counters shared by the synthetic backend closures.
#[derive(Default)]
struct Backend {
    order: Mutex<Vec<String>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct SimulateOptions {
    panels: usize,
    steps: Timestep,
    latency: Duration,
    scrub: Vec<Timestep>,
    fail_every: usize,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            panels,
            steps,
            latency_ms,
            limit,
            look_ahead,
            scrub,
            fail_every,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(limit) = limit {
                config.registry.concurrency_limit = limit;
            }
            if let Some(look_ahead) = look_ahead {
                config.fetcher.look_ahead = look_ahead;
            }
            config.validate()?;
            let options = SimulateOptions {
                panels,
                steps,
                latency: Duration::from_millis(latency_ms),
                scrub,
                fail_every,
            };
            cmd_simulate(config, options).await
        }
        Commands::ShowConfig { config } => cmd_show_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<SchedulerConfig> {
    match path {
        Some(path) => Ok(SchedulerConfig::load_yaml(path)?),
        None => Ok(SchedulerConfig::default()),
    }
}

fn cmd_show_config(path: Option<&Path>) -> CliResult<()> {
    let config = load_config(path)?;
    print!("{}", config.to_yaml_string()?);
    Ok(())
}

async fn cmd_simulate(config: SchedulerConfig, options: SimulateOptions) -> CliResult<()> {
    tracing::info!(?config, "starting simulation");
    let registry = TaskRegistry::new(config.registry.clone())?;
    let backend = Arc::new(Backend::default());
    let source = Arc::new(synthetic_source(&backend, &options));

    let mut group = PanelGroup::new(source, registry.clone(), config.fetcher.clone());
    for i in 0..options.panels {
        group.bind(format!("panel-{i}"), ItemId::new(format!("run-{i}")));
    }

    println!(
        "Simulating {} panels over {} steps (limit {}, look-ahead {})",
        options.panels,
        options.steps,
        describe_limit(config.registry.concurrency_limit),
        config.fetcher.look_ahead
    );

    for (panel, result) in group.initialize_all().await {
        if let Err(err) = result {
            println!("  {panel}: initialization failed: {err}");
        }
    }

    for &requested in &options.scrub {
        let timestep = group.clamp_timestep(requested);
        let skipped = group.set_current_timestep(timestep, true);
        if !skipped.is_empty() {
            println!("  skipped uninitialized panels: {}", skipped.join(", "));
        }

        println!("Step {timestep}:");
        let plots = group.get_timestep_plots(timestep);
        let panels: Vec<String> = plots.iter().map(|(panel, _)| panel.clone()).collect();
        let outcomes = join_all(plots.into_iter().map(|(_, step)| step)).await;
        for (panel, outcome) in panels.iter().zip(outcomes) {
            match outcome {
                Ok(frame) => println!(
                    "  ✓ {panel}: step {} ({} points)",
                    frame.timestep, frame.points
                ),
                Err(err) => println!("  ✗ {panel}: {err}"),
            }
        }
    }

    // Let the remaining prefetches drain before reporting.
    while registry.running_count() > 0 || registry.queue_len() > 0 {
        tokio::time::sleep(options.latency.max(Duration::from_millis(1))).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    println!();
    println!("Fetch order:");
    for (i, entry) in backend.order.lock().iter().enumerate() {
        println!("  {:>3}. {entry}", i + 1);
    }
    println!(
        "Peak concurrency: {} (limit {})",
        backend.peak.load(Ordering::SeqCst),
        describe_limit(config.registry.concurrency_limit)
    );

    println!("Loaded steps:");
    for (panel, _) in group.panels() {
        if let Some(fetcher) = group.fetcher(panel) {
            println!("  {panel}: {:?}", fetcher.loaded_timesteps());
        }
    }
    Ok(())
}

fn describe_limit(limit: usize) -> String {
    if limit == 0 {
        "unbounded".to_string()
    } else {
        limit.to_string()
    }
}

/// A backend whose items report `0..steps` and whose payloads are synthetic samples.
fn synthetic_source(
    backend: &Arc<Backend>,
    options: &SimulateOptions,
) -> impl PlotSource<Raw = Vec<f64>, Payload = Frame> {
    let steps = options.steps;
    let latency = options.latency;
    let metadata_fn = move |_item: ItemId| async move {
        tokio::time::sleep(latency).await;
        let steps: Vec<Timestep> = (0..steps).collect();
        let times = steps.iter().map(|&s| s as f64 * 0.5).collect();
        Ok::<_, FetchError>(ItemMetadata {
            steps,
            times: Some(times),
        })
    };

    let fail_every = options.fail_every;
    let backend = Arc::clone(backend);
    let fetch_fn = move |item: ItemId, timestep: Timestep| {
        let backend = Arc::clone(&backend);
        async move {
            let call = backend.calls.fetch_add(1, Ordering::SeqCst) + 1;
            backend.order.lock().push(format!("{item}@{timestep}"));
            let now = backend.active.fetch_add(1, Ordering::SeqCst) + 1;
            backend.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(latency).await;
            backend.active.fetch_sub(1, Ordering::SeqCst);

            if fail_every > 0 && call % fail_every == 0 {
                return Err(FetchError::failed(format!(
                    "synthetic failure for {item} at step {timestep}"
                )));
            }
            let len = 64 + (timestep.unsigned_abs() % 64) as usize;
            Ok((0..len)
                .map(|i| (i as f64 + timestep as f64).sin())
                .collect::<Vec<f64>>())
        }
    };

    let resolve_fn = |samples: Vec<f64>, timestep: Timestep| async move {
        Ok::<_, FetchError>(Frame {
            timestep,
            points: samples.len(),
        })
    };

    FnSource::new(metadata_fn, fetch_fn, resolve_fn)
}
