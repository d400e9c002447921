//! Server process hosting the code-execution dispatcher.
//!
//! Bootstraps logging and configuration, starts the worker pool against the
//! local Docker daemon and keeps it running until interrupted. The HTTP router
//! is mounted but exposes no routes yet; jobs can be run one at a time from the
//! command line with the `run` subcommand.

use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use codebox_core::executors::DockerConnector;
use codebox_core::{
    job_queue, results_channel, CodeboxConfig, ConfigLoader, Dispatcher, Job, JobSubmitter,
    Language, ResultReceiver, RunnerSettings,
};
use log::LevelFilter;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Codebox Server - run untrusted code in Docker sandboxes")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(long, short, default_value = "codebox.yaml", help = "Configuration file; defaults are used if it does not exist")]
    config: PathBuf,

    #[clap(long, short, default_value = "info")]
    log_level: String,

    #[clap(long, help = "Override the configured number of workers")]
    workers: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the dispatcher and the HTTP listener (default command)
    Serve {
        #[clap(long, help = "Override the configured bind address")]
        bind_addr: Option<String>,
    },
    /// Execute a single source file and print its output
    Run {
        #[clap(long, short = 'L', help = "Source language (python or java)")]
        language: Language,

        /// Path of the source file to execute
        file: PathBuf,
    },
}

struct Engine {
    dispatcher: Dispatcher,
    submitter: JobSubmitter,
    results: ResultReceiver,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let mut config = ConfigLoader::from_file_or_default(&cli.config).await?;
    if let Some(workers) = cli.workers {
        config.dispatcher.workers = workers;
        config.validate()?;
    }

    match cli.command {
        Some(Commands::Serve { bind_addr }) => {
            if let Some(bind_addr) = bind_addr {
                config.server.bind_addr = bind_addr;
            }
            serve(config).await
        }
        Some(Commands::Run { language, file }) => run_file(config, language, file).await,
        None => serve(config).await,
    }
}

fn start_engine(config: &CodeboxConfig, workers: usize) -> Result<Engine> {
    let (submitter, queue) = job_queue(config.dispatcher.queue_capacity);
    let (sender, results) = results_channel(config.dispatcher.results_capacity);

    let mut dispatcher = Dispatcher::new(workers, RunnerSettings::from_config(config));
    let connector = DockerConnector::new(config.sandbox.clone());
    if dispatcher.run(&connector, queue, sender) == 0 {
        anyhow::bail!("No sandbox workers could be started; is Docker running?");
    }

    Ok(Engine {
        dispatcher,
        submitter,
        results,
    })
}

async fn serve(config: CodeboxConfig) -> Result<()> {
    let bind_socket_addr = config.server.socket_addr()?;
    let Engine {
        dispatcher,
        submitter,
        mut results,
    } = start_engine(&config, config.dispatcher.workers)?;

    let consumer = tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            match result.error() {
                None => log::info!(
                    "Job '{}' completed ({} bytes of output)",
                    result.id(),
                    result.output().len()
                ),
                Some(error) => log::warn!("Job '{}' failed: {}", result.id(), error),
            }
        }
    });

    // Submissions will arrive through routes on this router.
    let app: Router = Router::new();
    let listener = tokio::net::TcpListener::bind(bind_socket_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_socket_addr))?;
    log::info!("Starting Codebox server on {}...", bind_socket_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        log::error!("Server failed: {}", e);
    }

    drop(submitter);
    let report = dispatcher
        .shutdown(config.dispatcher.drain_timeout())
        .await;
    if !report.cancelled.is_empty() {
        log::warn!("Cancelled unfinished jobs: {}", report.cancelled.join(", "));
    }
    if !report.abandoned.is_empty() {
        log::error!("Abandoned stuck jobs: {}", report.abandoned.join(", "));
    }
    let _ = consumer.await;

    log::info!("Codebox server shut down gracefully.");
    Ok(())
}

async fn run_file(config: CodeboxConfig, language: Language, file: PathBuf) -> Result<()> {
    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let Engine {
        dispatcher,
        submitter,
        mut results,
    } = start_engine(&config, 1)?;

    let job_id = Uuid::new_v4().to_string();
    submitter.submit(Job::new(job_id.clone(), language, code)).await?;

    let result = results
        .recv()
        .await
        .context("Worker exited without reporting a result")?;
    dispatcher
        .shutdown(config.dispatcher.drain_timeout())
        .await;

    match result.error() {
        None => {
            print!("{}", result.output());
            Ok(())
        }
        Some(error) => Err(anyhow::anyhow!("Job {} failed: {}", job_id, error)),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}
