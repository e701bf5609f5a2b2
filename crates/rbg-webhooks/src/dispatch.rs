// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Outbound webhook dispatch.

use tracing::{error, info, warn};

use rbg_repos::events::{self, marshal_payload, Payload};

use crate::webhook::Webhook;
use crate::{WebhookError, WebhookResult, WebhookStore};

/// Dispatch headers carried on every webhook POST.
pub const SIGNATURE_HEADER: &str = "X-RBG-Signature";
pub const EVENT_HEADER: &str = "X-RBG-Event";

/// Invoke all webhooks that match the given event and repository.
///
/// Dispatch failures are logged per hook and do not stop the remaining
/// deliveries; if any hook failed, a single summary error is returned.
pub async fn invoke_all_hooks<P: Payload>(
    client: &reqwest::Client,
    store: &WebhookStore,
    event: &str,
    repo_name: &str,
    payload: &P,
) -> WebhookResult<()> {
    if !events::is_valid_event(event) {
        return Err(WebhookError::UnknownEvent(event.to_string()));
    }

    let raw_payload = marshal_payload(payload)?;

    let hooks: Vec<Webhook> = store.matching(event, repo_name).cloned().collect();
    let mut failed = 0;

    for hook in &hooks {
        if let Err(err) = invoke_hook(client, event, repo_name, hook, &raw_payload).await {
            error!(
                "Error occurred while processing hook \"{}\" for URL \"{}\": {}",
                hook.id, hook.url, err
            );
            failed += 1;
        }
    }

    if failed != 0 {
        Err(WebhookError::Dispatch(failed))
    } else {
        Ok(())
    }
}

/// Deliver the payload to a single webhook.
async fn invoke_hook(
    client: &reqwest::Client,
    event: &str,
    repo_name: &str,
    hook: &Webhook,
    raw_payload: &[u8],
) -> WebhookResult<()> {
    let signature = hook.sign_payload(raw_payload);

    info!(
        "Dispatching webhook \"{}\" for event \"{}\" for repository \"{}\" to URL \"{}\"",
        hook.id, event, repo_name, hook.url
    );

    let response = client
        .post(&hook.url)
        .header(SIGNATURE_HEADER, signature)
        .header(EVENT_HEADER, event)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(raw_payload.to_vec())
        .send()
        .await
        .map_err(WebhookError::Transport)?;

    let status = response.status();

    if !status.is_success() {
        warn!("Expected status 2XX, received {}.", status);

        match response.text().await {
            Ok(body) => warn!("Response body: {}", body),
            Err(err) => warn!("Could not read response body: {}", err),
        }
    }

    Ok(())
}
