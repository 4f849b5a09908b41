// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! LLM API simulator - standalone server

use anyhow::Context;
use clap::{Parser, Subcommand};
use llm_api_sim::logging::CliLoggingArgs;
use llm_api_sim::{SimConfig, SimServer};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "llm-api-sim")]
#[command(about = "Deterministic OpenAI/Anthropic API simulator for client testing")]
struct Cli {
    #[command(flatten)]
    logging: CliLoggingArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the simulated endpoints
    Serve {
        /// YAML or TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (0 picks a free port)
        #[arg(long)]
        port: Option<u16>,

        /// Words per streamed text fragment
        #[arg(long)]
        words_per_chunk: Option<usize>,

        /// Delay between streamed frames in milliseconds
        #[arg(long)]
        chunk_delay_ms: Option<u64>,

        /// Model echoed by the OpenAI-style endpoint when the request names none
        #[arg(long)]
        openai_model: Option<String>,

        /// Model echoed by the Anthropic-style endpoint when the request names none
        #[arg(long)]
        anthropic_model: Option<String>,
    },

    /// Print the effective configuration as YAML
    PrintConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.logging.init()?;

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            words_per_chunk,
            chunk_delay_ms,
            openai_model,
            anthropic_model,
        } => {
            let mut config = SimConfig::load(config.as_deref())
                .context("failed to load simulator configuration")?;

            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(words) = words_per_chunk {
                config.emitter.words_per_chunk = words;
            }
            if let Some(delay) = chunk_delay_ms {
                config.emitter.chunk_delay_ms = delay;
            }
            if let Some(model) = openai_model {
                config.openai.default_model = model;
            }
            if let Some(model) = anthropic_model {
                config.anthropic.default_model = model;
            }

            let server = SimServer::new(config).context("invalid simulator configuration")?;
            server.run().await?;
        }
        Commands::PrintConfig { config } => {
            let config = SimConfig::load(config.as_deref())?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
