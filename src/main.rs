use std::path::PathBuf;
use std::process::ExitCode;

use auth_bootstrap::{init_tracing, App, BuildInfo, Config, Context, Error, Result};
use clap::Parser;
use tracing::{error, info};

/// Auth service
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error loading config: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_tracing(&config.log_level, config.log_format) {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "service failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let build = BuildInfo::current();
    info!(
        version = %build.version,
        commit = %build.git_commit,
        date = %build.build_date,
        "starting service"
    );

    let root = Context::background();
    let mut app = App::new(&config, build)?;

    let watcher = root.clone();
    let _ = app
        .supervisor()
        .spawn("signal-watcher", async move { watch_signals(watcher).await });

    let started = app.start(&root).await;
    if started.is_ok() {
        info!("all services started");
        root.token().cancelled().await;
        info!("received shutdown signal, stopping services...");
    } else {
        root.cancel();
    }

    let deadline = Context::background().with_timeout(config.server.shutdown_timeout());
    let stopped = app.shutdown(&deadline).await;

    started?;
    stopped?;
    info!("all services stopped");
    Ok(())
}

/// Cancel `ctx` on Ctrl-C or SIGTERM; returns early if `ctx` is cancelled elsewhere
async fn watch_signals(ctx: Context) -> Result<()> {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::Other(format!("failed to listen for ctrl-c: {}", e)))
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(|e| Error::Other(format!("failed to listen for SIGTERM: {}", e)))?;
        let _ = signal.recv().await;
        Ok::<(), Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    let result = tokio::select! {
        res = ctrl_c => res,
        res = terminate => res,
        _ = ctx.token().cancelled() => return Ok(()),
    };

    ctx.cancel();
    result
}
