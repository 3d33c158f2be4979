use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cookie_warden::app::{self, App};
use cookie_warden::config::AppConfig;
use cookie_warden::credentials::ValidityState;
use cookie_warden::logging::init_logging;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warden_platforms::bilibili::PassportEndpoints;

/// Keeps a cookie session alive and notifies on new timeline content.
#[derive(Parser)]
#[command(name = "cookie-warden", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "COOKIE_WARDEN_CONFIG", default_value = "cookie-warden.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run keepalive, polling and eviction until interrupted.
    Run,
    /// Bootstrap a credential by scanning a Bilibili QR code.
    Login,
    /// Force one refresh and persist the result.
    Refresh,
    /// Probe the stored credential. Exits with 2 when it is stale.
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Application error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let (logging, _guard) = init_logging(&config.logging)?;

    match cli.command {
        Command::Run => {
            let cancel = CancellationToken::new();
            logging.start_retention_cleanup(cancel.child_token());

            let app = App::build(config).await.context("startup failed")?;
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                info!("Shutdown signal received");
                signal_cancel.cancel();
            });

            app.run(cancel).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Login => {
            let credential = app::qr_login(&config, &PassportEndpoints::default(), |url| {
                println!("Scan this URL as a QR code with the Bilibili app:\n\n  {url}\n");
            })
            .await?;
            println!(
                "Logged in; credential for '{}' saved ({} refresh token).",
                credential.target_id,
                if credential.refresh_token.is_some() { "with" } else { "without" }
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Refresh => {
            let app = App::build(config).await.context("startup failed")?;
            let outcome = app.refresh().await?;
            println!("Refresh finished: {outcome:?}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let app = App::build(config).await.context("startup failed")?;
            let state = app.check().await?;
            println!("Credential is {state}");
            Ok(if state == ValidityState::Valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM; Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
