// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The persistent collection of webhook subscriptions.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use tracing::warn;

use rbg_repos::events;

use crate::webhook::{Webhook, MIN_SECRET_LENGTH};
use crate::{WebhookError, WebhookResult};

/// A collection of webhooks, keyed by their `id`.
#[derive(Debug, Default, Clone)]
pub struct WebhookStore {
    hooks: HashMap<String, Webhook>,
}

impl WebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from the JSON array at `path`.
    ///
    /// A non-existent or empty file yields an empty store. Each entry is
    /// sanitized against `repositories`, the set of configured repository
    /// names: unknown events and repositories are stripped with a warning,
    /// and hooks left with no valid event or repository are dropped.
    pub fn load(path: &Path, repositories: &HashSet<String>) -> WebhookResult<Self> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(err.into()),
        };

        if content.is_empty() {
            return Ok(Self::new());
        }

        let raw: Vec<Webhook> = serde_json::from_slice(&content)?;
        let mut store = Self::new();

        for mut hook in raw {
            if sanitize_hook(&mut hook, repositories) {
                store.hooks.insert(hook.id.clone(), hook);
            }
        }

        Ok(store)
    }

    /// Save the store as an indented JSON array.
    ///
    /// The store is written to a temporary file in the target directory and
    /// then renamed over the target path, so that concurrently running
    /// `trigger-webhooks` processes never observe a partial write.
    pub fn save(&self, path: &Path) -> WebhookResult<()> {
        let hooks: Vec<&Webhook> = self.hooks.values().collect();
        let content = serde_json::to_vec_pretty(&hooks)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmpfile = tempfile::NamedTempFile::new_in(dir)?;

        tmpfile.write_all(&content)?;
        tmpfile
            .persist(path)
            .map_err(|err| WebhookError::Io(err.error))?;

        Ok(())
    }

    /// Return the hook with the given ID, if any.
    pub fn get(&self, id: &str) -> Option<&Webhook> {
        self.hooks.get(id)
    }

    /// Whether the store contains a hook with the given ID.
    pub fn contains(&self, id: &str) -> bool {
        self.hooks.contains_key(id)
    }

    /// Insert or replace a hook.
    pub fn insert(&mut self, hook: Webhook) -> Option<Webhook> {
        self.hooks.insert(hook.id.clone(), hook)
    }

    /// Remove and return the hook with the given ID.
    pub fn remove(&mut self, id: &str) -> Option<Webhook> {
        self.hooks.remove(id)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Iterate over all hooks in the store.
    pub fn values(&self) -> impl Iterator<Item = &Webhook> {
        self.hooks.values()
    }

    /// Iterate over the enabled hooks subscribed to `event` for `repo_name`.
    ///
    /// Membership checks binary-search the hook's pre-sorted lists.
    pub fn matching<'a>(
        &'a self,
        event: &'a str,
        repo_name: &'a str,
    ) -> impl Iterator<Item = &'a Webhook> {
        self.hooks.values().filter(move |hook| {
            hook.enabled
                && hook.events.binary_search_by(|e| e.as_str().cmp(event)).is_ok()
                && hook.repos.binary_search_by(|r| r.as_str().cmp(repo_name)).is_ok()
        })
    }

    /// Invoke `f` for every enabled hook matching `event` and `repo_name`.
    ///
    /// Errors do not stop the iteration; all of them are collected and
    /// returned.
    pub fn for_each<F>(&self, event: &str, repo_name: &str, mut f: F) -> Vec<WebhookError>
    where
        F: FnMut(&Webhook) -> WebhookResult<()>,
    {
        let mut errors = Vec::new();

        for hook in self.matching(event, repo_name) {
            if let Err(err) = f(hook) {
                errors.push(err);
            }
        }

        errors
    }
}

/// Sanitize a hook loaded from disk, stripping invalid entries.
///
/// Returns whether the hook should be kept. As a side effect the `events`
/// and `repos` lists are sorted.
fn sanitize_hook(hook: &mut Webhook, repositories: &HashSet<String>) -> bool {
    hook.events.retain(|event| {
        if events::is_valid_event(event) {
            true
        } else {
            warn!(
                "Unknown event type \"{}\" in hook \"{}\"; skipping event.",
                event, hook.id
            );
            false
        }
    });

    hook.repos.retain(|repo| {
        if repositories.contains(repo) {
            true
        } else {
            warn!(
                "Unknown repo \"{}\" in hook \"{}\"; skipping repo.",
                repo, hook.id
            );
            false
        }
    });

    if hook.events.is_empty() {
        warn!("Hook \"{}\" has no valid events; skipping hook.", hook.id);
        return false;
    }

    if hook.repos.is_empty() {
        warn!("Hook \"{}\" has no valid repositories; skipping hook.", hook.id);
        return false;
    }

    if hook.secret.len() < MIN_SECRET_LENGTH {
        warn!(
            "Secret for webhook \"{}\" is too short ({} bytes); should be at least {} bytes.",
            hook.id,
            hook.secret.len(),
            MIN_SECRET_LENGTH
        );
    }

    hook.events.sort();
    hook.repos.sort();

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn repos() -> HashSet<String> {
        ["repo".to_string(), "other-repo".to_string()]
            .into_iter()
            .collect()
    }

    fn test_hook(id: &str) -> Webhook {
        Webhook {
            id: id.to_string(),
            url: "http://example.com/".to_string(),
            secret: "a".repeat(MIN_SECRET_LENGTH),
            enabled: true,
            events: vec!["push".to_string()],
            repos: vec!["repo".to_string()],
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = WebhookStore::load(&dir.path().join("webhooks.json"), &repos()).unwrap();

        assert!(store.is_empty());
    }

    #[test]
    fn test_load_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webhooks.json");
        std::fs::write(&path, b"").unwrap();

        let store = WebhookStore::load(&path, &repos()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_sanitizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webhooks.json");

        std::fs::write(
            &path,
            r#"[
                {
                    "id": "good",
                    "url": "http://example.com/",
                    "secret": "aaaaaaaaaaaaaaaaaaaa",
                    "enabled": true,
                    "events": ["push", "not-an-event"],
                    "repos": ["repo", "unknown-repo", "other-repo"]
                },
                {
                    "id": "no-valid-events",
                    "url": "http://example.com/",
                    "secret": "aaaaaaaaaaaaaaaaaaaa",
                    "enabled": true,
                    "events": ["not-an-event"],
                    "repos": ["repo"]
                },
                {
                    "id": "no-valid-repos",
                    "url": "http://example.com/",
                    "secret": "aaaaaaaaaaaaaaaaaaaa",
                    "enabled": true,
                    "events": ["push"],
                    "repos": ["unknown-repo"]
                }
            ]"#,
        )
        .unwrap();

        let store = WebhookStore::load(&path, &repos()).unwrap();

        assert_eq!(store.len(), 1);

        let hook = store.get("good").unwrap();
        assert_eq!(hook.events, vec!["push"]);
        assert_eq!(hook.repos, vec!["other-repo", "repo"]);
    }

    #[test]
    fn test_load_keeps_short_secret() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webhooks.json");

        std::fs::write(
            &path,
            r#"[{
                "id": "short-secret",
                "url": "http://example.com/",
                "secret": "a",
                "enabled": true,
                "events": ["push"],
                "repos": ["repo"]
            }]"#,
        )
        .unwrap();

        let store = WebhookStore::load(&path, &repos()).unwrap();
        assert!(store.contains("short-secret"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webhooks.json");

        let mut store = WebhookStore::new();
        store.insert(test_hook("hook-1"));
        store.insert(test_hook("hook-2"));

        store.save(&path).unwrap();

        let loaded = WebhookStore::load(&path, &repos()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("hook-1"), store.get("hook-1"));
        assert_eq!(loaded.get("hook-2"), store.get("hook-2"));
    }

    #[test]
    fn test_save_replaces_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webhooks.json");

        let mut store = WebhookStore::new();
        store.insert(test_hook("hook-1"));
        store.save(&path).unwrap();

        store.insert(test_hook("hook-2"));
        store.save(&path).unwrap();

        // The temp file must not linger next to the target.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("webhooks.json")]);

        let loaded = WebhookStore::load(&path, &repos()).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_for_each_filters() {
        let mut store = WebhookStore::new();

        store.insert(test_hook("enabled"));

        let mut disabled = test_hook("disabled");
        disabled.enabled = false;
        store.insert(disabled);

        let mut other_repo = test_hook("other-repo-hook");
        other_repo.repos = vec!["other-repo".to_string()];
        store.insert(other_repo);

        let mut invoked = Vec::new();
        let errors = store.for_each("push", "repo", |hook| {
            invoked.push(hook.id.clone());
            Ok(())
        });

        assert!(errors.is_empty());
        assert_eq!(invoked, vec!["enabled"]);
    }

    #[test]
    fn test_for_each_collects_errors() {
        let mut store = WebhookStore::new();
        store.insert(test_hook("hook-1"));

        let mut hook2 = test_hook("hook-2");
        hook2.url = "http://example.com/2/".to_string();
        store.insert(hook2);

        let errors = store.for_each("push", "repo", |hook| {
            Err(WebhookError::Validation(hook.id.clone()))
        });

        assert_eq!(errors.len(), 2);
    }
}
