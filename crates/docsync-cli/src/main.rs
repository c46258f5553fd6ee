//! docsync - ドキュメント取り込みバックエンド用の CLI
//!
//! Supervisor を 1 つ組み立てて、サブコマンドごとに 1 操作だけ行う。
//! `watch` だけは Ctrl-C まで動き続ける。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use docsync_core::SyncConfig;
use docsync_core::app::{Supervisor, SupervisorBuilder};
use docsync_core::observability::init_tracing;
use docsync_core::ports::TransportKind;
use tracing::info;

/// Track document uploads against an ingestion backend.
#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables still win)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the backend API root
    #[arg(long, global = true, value_name = "URL")]
    backend_url: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Probe the backend once and print its readiness
    Status,

    /// List uploaded documents
    Documents,

    /// Delete one document
    Delete {
        /// Document name as listed by `documents`
        name: String,
    },

    /// List the models the backend can chat with
    Models,

    /// Upload a file and follow it until it finishes
    Upload {
        path: PathBuf,

        /// Transport for queued uploads (poll or push)
        #[arg(long, value_name = "KIND")]
        transport: Option<TransportKind>,

        /// How long to wait for the backend to become ready, in seconds
        #[arg(long, default_value_t = 30)]
        ready_timeout: u64,
    },

    /// Follow readiness and the document list until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(if cli.debug { "debug" } else { "info" });

    let mut config = SyncConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }
    if let Commands::Upload {
        transport: Some(kind),
        ..
    } = &cli.command
    {
        config.queued_transport = *kind;
    }

    let supervisor = SupervisorBuilder::new(config).build()?;
    let result = run(&supervisor, cli.command).await;
    supervisor.shutdown().await;
    result
}

async fn run(supervisor: &Supervisor, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Status => {
            let state = supervisor.probe_now().await;
            if state.ready {
                println!("ready");
            } else {
                println!(
                    "not ready: {}",
                    state.last_error.as_deref().unwrap_or("subsystems starting")
                );
            }
        }
        Commands::Documents => {
            supervisor.probe_now().await;
            for name in supervisor.refresh_documents().await? {
                println!("{name}");
            }
        }
        Commands::Delete { name } => {
            supervisor.probe_now().await;
            supervisor.delete_document(&name).await?;
            println!("deleted {name}");
        }
        Commands::Models => {
            supervisor.probe_now().await;
            for model in supervisor.models().await? {
                println!("{model}");
            }
        }
        Commands::Upload {
            path,
            ready_timeout,
            ..
        } => {
            supervisor.start();
            wait_ready(supervisor, Duration::from_secs(ready_timeout)).await?;

            let handle = supervisor.submit_path(&path).await?;
            match handle.transport() {
                Some(kind) => info!(task_id = %handle.task_id(), transport = ?kind, "tracking upload"),
                None => info!(task_id = %handle.task_id(), "backend finished synchronously"),
            }

            let wait = handle.wait_success();
            tokio::pin!(wait);
            let outcome = tokio::select! {
                outcome = &mut wait => outcome?,
                _ = tokio::signal::ctrl_c() => {
                    handle.cancel();
                    bail!("interrupted while waiting for {}", handle.task_id());
                }
            };
            println!("{}: {}", outcome.task_id(), outcome.detail());
        }
        Commands::Watch => {
            supervisor.on_ready(|| println!("backend ready"));
            supervisor.start();

            let mut readiness = supervisor.subscribe_readiness();
            let mut documents = supervisor.subscribe_documents();
            loop {
                tokio::select! {
                    changed = readiness.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = readiness.borrow_and_update().clone();
                        if !state.ready {
                            println!(
                                "not ready: {}",
                                state.last_error.as_deref().unwrap_or("subsystems starting")
                            );
                        }
                    }
                    changed = documents.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let list = documents.borrow_and_update().clone();
                        println!("{} document(s): {}", list.len(), list.join(", "));
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }
    Ok(())
}

async fn wait_ready(supervisor: &Supervisor, timeout: Duration) -> anyhow::Result<()> {
    let mut readiness = supervisor.subscribe_readiness();
    tokio::time::timeout(timeout, readiness.wait_for(|state| state.ready))
        .await
        .with_context(|| {
            let reason = supervisor.readiness().last_error;
            format!(
                "backend not ready after {}s: {}",
                timeout.as_secs(),
                reason.as_deref().unwrap_or("no answer yet")
            )
        })??;
    Ok(())
}
