use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use tally_config::{Config, RegistryConfig};
use tally_listeners::{ConsoleConfig, ListenerConfig};
use tally_metrics::{Registry, Tags, tags};

/// Produces counters, timers, samples, events and alerts at a fixed rate.
///
/// Without a config file, metrics are printed to stdout.
#[derive(Debug, Parser)]
#[command(verbatim_doc_comment)]
struct Args {
    /// Path to a YAML or JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long to produce metrics.
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    /// Operations per second and thread.
    #[arg(long, default_value_t = 100)]
    rate: u32,

    /// Number of distinct metric names.
    #[arg(long, default_value_t = 10)]
    metrics: usize,

    /// Number of producer threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::from_path(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => Ok(Config {
                registry: RegistryConfig {
                    namespace: "tally".to_owned(),
                    application: "loadgen".to_owned(),
                    app_type: "test".to_owned(),
                    ..Default::default()
                },
                listeners: vec![ListenerConfig::Console(ConsoleConfig::default())],
                ..Default::default()
            }),
        }
    }
}

fn produce(
    registry: &Registry,
    worker: usize,
    args: &Args,
    deadline: Instant,
    produced: &AtomicU64,
) {
    let mut rng = rand::rng();
    let pause = Duration::from_secs(1) / args.rate.max(1);
    let thread_tags = tags!("worker" => worker);

    while Instant::now() < deadline {
        let name = format!("load.metric{}", rng.random_range(0..args.metrics.max(1)));

        match rng.random_range(0..10) {
            0..=3 => registry
                .counter_with_tags(&name, thread_tags.clone())
                .increment(),
            4..=6 => {
                let timer = registry.timer_with_tags(&name, thread_tags.clone());
                thread::sleep(pause);
                timer.stop();
                produced.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            7 => registry.sample(&name, rng.random_range(0..1000i64), thread_tags.clone()),
            8 => registry.event_with_tags(&name, 1, thread_tags.clone()),
            _ => registry.alert_with_tags(&name, rng.random_range(0..5i64), thread_tags.clone()),
        }

        produced.fetch_add(1, Ordering::Relaxed);
        thread::sleep(pause);
    }
}

fn run(args: Args) -> Result<()> {
    let config = args.load_config()?;
    tally_log::init(&config.logging);

    let registry = config
        .build_registry()
        .context("failed to build metric registry")?;

    let produced = Arc::new(AtomicU64::new(0));
    let gauge_counter = Arc::clone(&produced);
    registry.schedule_gauge(
        "load.produced",
        Duration::from_secs(1),
        move || gauge_counter.load(Ordering::Relaxed),
        Tags::new(),
    )?;
    let meter = registry.schedule_meter("load.threads", Duration::from_secs(1), Tags::new())?;

    tally_log::info!(
        prefix = registry.prefix(),
        threads = args.threads,
        rate = args.rate,
        "producing metrics for {}s",
        args.duration_secs
    );

    let start = Instant::now();
    let deadline = start + Duration::from_secs(args.duration_secs);
    thread::scope(|scope| {
        for worker in 0..args.threads.max(1) {
            let registry = &registry;
            let args = &args;
            let produced = &*produced;
            let meter = &meter;
            scope.spawn(move || {
                meter.mark();
                produce(registry, worker, args, deadline, produced);
            });
        }
    });

    let total = produced.load(Ordering::Relaxed);
    let elapsed = start.elapsed();
    tally_log::info!(
        operations = total,
        per_second = total as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        "finished producing metrics"
    );

    registry.remove_all_listeners();
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(error) = run(args) {
        tally_log::ensure_error(&error);
        std::process::exit(1);
    }
}
