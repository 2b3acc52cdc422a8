// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aegis::config::Settings;
use aegis::server::Server;

#[derive(Parser)]
#[command(name = "aegis", version, about = "Documentation-grounded AI chat backend")]
struct Cli {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(long)]
    port: Option<u16>,

    /// Path to a settings file (defaults to ~/.aegis/settings.json)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> aegis::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aegis=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => {
            let settings = Settings::load()?;
            // First run: write a starter file the user can edit
            let path = Settings::settings_path();
            if !path.exists() {
                if let Err(e) = settings.save_to(&path) {
                    tracing::warn!(error = %e, "could not write starter settings file");
                } else {
                    info!(path = %path.display(), "wrote starter settings file");
                }
            }
            settings
        }
    };
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    info!(
        host = %settings.server.host,
        port = settings.server.port,
        "starting aegis"
    );
    Server::new(settings).run().await
}
