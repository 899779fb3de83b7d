// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dormant Controller - On-Demand Game Server Lifecycle Server
//!
//! Commands:
//! - `serve` (default): accept signed triggers, start the server on demand,
//!   publish its address and shut it down when idle
//! - `watch`: attach the watchdog to an already running server once and exit

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use dormant_controller::config::Config;
use dormant_controller::platform::aws::AwsPlatform;
use dormant_controller::platform::Orchestrator;
use dormant_controller::runtime::ControllerRuntime;

enum Command {
    Serve,
    Watch,
}

fn print_usage() {
    eprintln!("Usage: dormant-controller [serve|watch]");
    eprintln!();
    eprintln!("  serve   Run the trigger endpoint (default)");
    eprintln!("  watch   Watch the running server once, shut it down when idle, exit");
    eprintln!();
    eprintln!("Configuration is read from DORMANT_* environment variables.");
}

fn parse_command() -> Option<Command> {
    let mut args = std::env::args().skip(1);
    let command = match args.next().as_deref() {
        None | Some("serve") => Command::Serve,
        Some("watch") => Command::Watch,
        _ => return None,
    };
    if args.next().is_some() {
        return None;
    }
    Some(command)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dormant_controller=info,dormant_console=info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    let Some(command) = parse_command() else {
        print_usage();
        std::process::exit(2);
    };

    let config = Config::from_env()?;
    let credentials = config.aws_credentials.clone().context(
        "No AWS credentials: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY, \
         or AWS_CONTAINER_CREDENTIALS_RELATIVE_URI / AWS_CONTAINER_CREDENTIALS_FULL_URI",
    )?;
    let platform = Arc::new(AwsPlatform::new(config.aws.clone(), credentials)?);

    info!(
        service = %config.service,
        record = %config.record_name,
        region = %platform.region(),
        credentials = platform.credentials_kind(),
        platform = platform.platform_type(),
        "Starting Dormant Controller"
    );

    let runtime_config = ControllerRuntime::builder()
        .config(&config)
        .platform(platform)
        .build()?;

    match command {
        Command::Serve => {
            let runtime = runtime_config.start().await?;
            info!(addr = %runtime.bind_addr(), "Trigger endpoint ready");

            // Wait for shutdown signal
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");

            runtime.shutdown().await?;
        }
        Command::Watch => {
            let supervisor = runtime_config.supervisor().clone();
            let mut session = tokio::spawn(async move { supervisor.watch_once().await });

            let outcome = tokio::select! {
                result = &mut session => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    runtime_config.supervisor().shutdown().await;
                    session.await?
                }
            };

            match outcome {
                Ok(outcome) if !outcome.is_failure() => {
                    info!(outcome = ?outcome, "Watch session finished");
                }
                Ok(outcome) => {
                    error!(outcome = ?outcome, "Watch session failed");
                    std::process::exit(1);
                }
                Err(slot) => {
                    error!(slot = ?slot, "A session is already active");
                    std::process::exit(1);
                }
            }
        }
    }

    info!("Dormant Controller shut down");
    Ok(())
}
