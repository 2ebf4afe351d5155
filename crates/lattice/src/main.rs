mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use lattice_core::{
    ContainerConfig, Mode, Service, ServiceBatch, ServiceContainer, ServiceName, ServiceSpec,
    StartContext, StartError, StartOutcome,
};

use cli::ConsoleListener;

/// Lattice: an in-process service lifecycle and dependency orchestrator.
///
/// Runs a small demo graph (config -> database -> {cache, web}) and an
/// on-demand worker node, then shuts everything down in reverse order.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Size of the transition worker pool
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Start timeout in seconds for asynchronously completing services
    #[arg(long, default_value_t = 30)]
    start_timeout: u64,

    /// Skip the on-demand worker portion of the demo
    #[arg(long)]
    no_worker: bool,
}

/// Demo behavior: sleeps briefly on start and exposes its label.
struct DemoService {
    label: &'static str,
    warmup: Duration,
}

#[async_trait::async_trait]
impl Service for DemoService {
    async fn start(&self, _ctx: StartContext) -> Result<StartOutcome, StartError> {
        tokio::time::sleep(self.warmup).await;
        Ok(StartOutcome::Ready(Arc::new(self.label.to_string())))
    }

    async fn stop(&self) {
        info!("{} released its resources", self.label);
    }
}

fn demo(label: &'static str, warmup_ms: u64) -> DemoService {
    DemoService {
        label,
        warmup: Duration::from_millis(warmup_ms),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = CliArgs::parse();

    let container = ServiceContainer::with_config(
        ContainerConfig::default()
            .worker_count(args.workers)
            .start_timeout(Duration::from_secs(args.start_timeout)),
    );
    container.subscribe_all(Box::new(ConsoleListener)).await;

    println!("Registering demo graph...");
    let batch = ServiceBatch::new()
        .add(ServiceSpec::new("config", demo("config", 10)))
        .add(ServiceSpec::new("database", demo("database", 50)).requires("config"))
        .add(ServiceSpec::new("cache", demo("cache", 20)).requires("database"))
        .add(
            ServiceSpec::new("web", demo("web", 20))
                .requires("database")
                .optionally("cache"),
        )
        .add(ServiceSpec::new("worker", demo("worker", 20)).mode(Mode::OnDemand));
    if let Err(e) = container.install_batch(batch) {
        error!("failed to register demo graph: {}", e);
        return;
    }

    let deadline = Duration::from_secs(10);
    let web = ServiceName::new("web");
    match container.await_up(&web, deadline).await {
        Ok(()) => {
            let value = container
                .get_value_as::<String>(&web)
                .map(|v| v.as_str().to_string())
                .unwrap_or_default();
            println!("web is up (value: {:?})", value);
        }
        Err(e) => {
            error!("demo graph did not come up: {}", e);
            return;
        }
    }

    if !args.no_worker {
        let worker = ServiceName::new("worker");
        println!("Demanding the on-demand worker...");
        if let Err(e) = container.demand(&worker) {
            error!("demand failed: {}", e);
        } else if let Err(e) = container.await_up(&worker, deadline).await {
            error!("worker did not come up: {}", e);
        } else {
            println!("worker is up; releasing the demand");
            if let Err(e) = container.undemand(&worker) {
                error!("undemand failed: {}", e);
            }
        }
    }

    println!("Shutting down...");
    container.shutdown().await;
    println!("All services stopped.");
}
