mod cli;
mod rpc;
mod service;
mod state;
mod watchdog;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    match args.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = cli::load_config()?;
            run_server(config).await
        }
        Some(Command::Config { command: ConfigCommand::Validate }) => {
            let (config, path) = cli::load_config()?;
            if !cli::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config { command: ConfigCommand::Show }) => {
            let (config, _path) = cli::load_config()?;
            cli::show(&config)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

async fn run_server(config: orc_domain::config::Config) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr.clone();
    let watchdog_interval_ms = config.watchdog_interval_ms;

    let state = AppState::new(config);
    let watchdog_handle = watchdog::spawn(state.service.clone(), watchdog_interval_ms);

    let app = rpc::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "orchestrator listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    watchdog_handle.abort();
    state.service.shutdown();
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
