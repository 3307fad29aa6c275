// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod compose;

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Command};
use podex_auth::RawPodToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Serve => serve(cli.config.as_deref()).await,
        Command::ShowConfig => {
            let config = podex_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Command::PodToken { user_id, name } => {
            mint_pod_token(&user_id, &name);
            Ok(())
        }
    }
}

async fn serve(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = podex_config::load(config_path)?;
    let bind = config.http.bind.clone();

    let coordinator = compose::build(config).await?;
    compose::spawn_background(&coordinator);

    let router = podex_api::build_router(coordinator.state.clone());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "coordinator listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("http server")?;

    info!("coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn mint_pod_token(user_id: &str, name: &str) {
    let pod_id = uuid::Uuid::new_v4();
    let raw = RawPodToken::generate();
    println!("Pod token (shown once — configure the pod with it now):");
    println!("  {}", raw.as_str());
    println!();
    let hash = raw.into_hash();
    println!("Pod record to register:");
    println!("  id:         {pod_id}");
    println!("  user_id:    {user_id}");
    println!("  name:       {name}");
    println!("  token_hash: {}", hash.to_hex());
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
