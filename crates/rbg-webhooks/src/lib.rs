// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Webhook subscriptions for rb-gateway.
//!
//! This crate owns the persistent store of webhook subscriptions, their
//! validation rules, payload signing, and the outbound dispatcher that fans
//! a push payload out to every matching subscriber.

pub mod dispatch;
pub mod store;
mod webhook;

pub use dispatch::invoke_all_hooks;
pub use store::WebhookStore;
pub use webhook::Webhook;

use thiserror::Error;

/// Result type alias for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Errors that can occur while validating, storing or dispatching webhooks.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// A hook failed validation. The message is delivered verbatim to API
    /// clients.
    #[error("{0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown event type \"{0}\"")]
    UnknownEvent(String),

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0} errors occurred while processing webhooks")]
    Dispatch(usize),
}
