// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::collections::HashSet;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use rbg_repos::events;

use crate::{WebhookError, WebhookResult};

/// The minimum accepted secret length, in bytes.
pub const MIN_SECRET_LENGTH: usize = 20;

/// A webhook subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    /// A unique ID for the webhook.
    pub id: String,

    /// The URL that the webhook will request.
    pub url: String,

    /// A secret used for generating an HMAC-SHA1 signature for the payload.
    pub secret: String,

    /// Whether or not the webhook is enabled.
    pub enabled: bool,

    /// A sorted list of events that this webhook applies to.
    pub events: Vec<String>,

    /// A sorted list of repository names that this webhook applies to.
    pub repos: Vec<String>,
}

impl Webhook {
    /// Return a lowercase-hex HMAC-SHA1 signature of the payload using the
    /// hook's secret.
    pub fn sign_payload(&self, payload: &[u8]) -> String {
        let mut mac = Hmac::<Sha1>::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload);

        hex::encode(mac.finalize().into_bytes())
    }

    /// Validate the hook against the set of configured repository names.
    ///
    /// Unlike store loading, which strips invalid entries, this is a hard
    /// check; the first problem found is returned as an error whose message
    /// is shown to API clients.
    pub fn validate(&self, repos: &HashSet<String>) -> WebhookResult<()> {
        if self.events.is_empty() {
            return Err(WebhookError::Validation("Hook has no events.".to_string()));
        }

        for event in &self.events {
            if !events::is_valid_event(event) {
                return Err(WebhookError::Validation(format!(
                    "Invalid event: \"{}\".",
                    event
                )));
            }
        }

        if self.repos.is_empty() {
            return Err(WebhookError::Validation(
                "Hook has no repositories.".to_string(),
            ));
        }

        for repo in &self.repos {
            if !repos.contains(repo) {
                return Err(WebhookError::Validation(format!(
                    "Invalid repository: \"{}\".",
                    repo
                )));
            }
        }

        let url = url::Url::parse(&self.url)
            .map_err(|err| WebhookError::Validation(format!("Invalid URL: {}", err)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(WebhookError::Validation(format!(
                "Invalid URL scheme \"{}\": only HTTP and HTTPS are supported.",
                url.scheme()
            )));
        }

        if self.secret.len() < MIN_SECRET_LENGTH {
            return Err(WebhookError::Validation(format!(
                "Secret is too short ({} bytes); secrets must be at least {} bytes.",
                self.secret.len(),
                MIN_SECRET_LENGTH
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hook() -> Webhook {
        Webhook {
            id: "test-hook".to_string(),
            url: "http://example.com/".to_string(),
            secret: "a".repeat(MIN_SECRET_LENGTH),
            enabled: true,
            events: vec!["push".to_string()],
            repos: vec!["repo".to_string()],
        }
    }

    fn repos() -> HashSet<String> {
        ["repo".to_string()].into_iter().collect()
    }

    #[test]
    fn test_valid_hook() {
        assert!(test_hook().validate(&repos()).is_ok());
    }

    #[test]
    fn test_no_events() {
        let mut hook = test_hook();
        hook.events.clear();

        let err = hook.validate(&repos()).unwrap_err();
        assert_eq!(err.to_string(), "Hook has no events.");
    }

    #[test]
    fn test_invalid_event() {
        let mut hook = test_hook();
        hook.events = vec!["pull".to_string()];

        let err = hook.validate(&repos()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid event: \"pull\".");
    }

    #[test]
    fn test_no_repos() {
        let mut hook = test_hook();
        hook.repos.clear();

        let err = hook.validate(&repos()).unwrap_err();
        assert_eq!(err.to_string(), "Hook has no repositories.");
    }

    #[test]
    fn test_unknown_repo() {
        let mut hook = test_hook();
        hook.repos = vec!["other".to_string()];

        let err = hook.validate(&repos()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid repository: \"other\".");
    }

    #[test]
    fn test_url_scheme() {
        let mut hook = test_hook();
        hook.url = "ftp://example.com".to_string();

        let err = hook.validate(&repos()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid URL scheme \"ftp\": only HTTP and HTTPS are supported."
        );

        hook.url = "https://example.com".to_string();
        assert!(hook.validate(&repos()).is_ok());
    }

    #[test]
    fn test_secret_length_boundary() {
        let mut hook = test_hook();

        hook.secret = "a".repeat(19);
        let err = hook.validate(&repos()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Secret is too short (19 bytes); secrets must be at least 20 bytes."
        );

        hook.secret = "a".repeat(20);
        assert!(hook.validate(&repos()).is_ok());
    }

    #[test]
    fn test_sign_payload() {
        let hook = test_hook();

        // Vector computed with a reference HMAC-SHA1 implementation.
        assert_eq!(
            hook.sign_payload(b"payload"),
            "8394ca5685e81974eaceed52db77a38a92840b57"
        );
        assert_ne!(hook.sign_payload(b"payload"), hook.sign_payload(b"other"));
    }
}
