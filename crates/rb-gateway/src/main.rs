// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The rb-gateway binary.
//!
//! `serve` (the default) runs the HTTP gateway; `trigger-webhooks` is the
//! one-shot dispatcher invoked by SCM hook scripts; `reinstall-hooks`
//! force-reinstalls the hook scripts in every configured repository.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use rbg_logging::Level;

#[derive(Parser, Debug)]
#[command(name = "rb-gateway", version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = rbg_config::DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run the gateway server (the default)
    Serve,

    /// Dispatch webhooks for an SCM event. Invoked by installed hook
    /// scripts; event data is read from stdin and the environment.
    TriggerWebhooks {
        /// The name of the repository the event occurred in
        repository: String,

        /// The event to dispatch
        event: String,
    },

    /// Reinstall webhook trigger scripts into every configured repository
    ReinstallHooks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    rbg_logging::init("rb-gateway", Level::INFO)?;

    match args.command.unwrap_or(CliCommand::Serve) {
        CliCommand::Serve => commands::serve::run(&args.config).await,

        CliCommand::TriggerWebhooks { repository, event } => {
            commands::trigger_webhooks::run(&args.config, &repository, &event).await
        }

        CliCommand::ReinstallHooks => commands::reinstall_hooks::run(&args.config),
    }
}
