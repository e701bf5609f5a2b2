// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The `trigger-webhooks` command.
//!
//! SCM hook scripts invoke this as a one-shot process after a push. The
//! webhook store is loaded fresh from disk here; it is never shared with a
//! running `serve` process, which is why store writes have to be atomic.

use std::path::Path;

use anyhow::{bail, Context};

use rbg_config::Config;
use rbg_repos::{events, Repository};
use rbg_webhooks::{invoke_all_hooks, WebhookStore};

pub async fn run(config_path: &Path, repo_name: &str, event: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("Could not parse configuration")?;

    let Some(repository) = config.repositories.get(repo_name) else {
        bail!("Unknown repository: \"{}\".", repo_name);
    };

    if !events::is_valid_event(event) {
        bail!("Unknown event: \"{}\"", event);
    }

    let store = WebhookStore::load(&config.webhook_store_path, &config.repository_set())
        .context("Could not load webhook store")?;

    let payload = repository
        .parse_event_payload(event, &mut std::io::stdin().lock())
        .context("Could not parse event payload")?;

    let client = reqwest::Client::new();

    invoke_all_hooks(&client, &store, event, repository.name(), &payload).await?;

    Ok(())
}
