// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! HTTP route handlers.
//!
//! Handlers are thin: they marshal parameters, call into the repository
//! adapters and stores, and map error kinds onto HTTP statuses. SCM work is
//! synchronous and runs on the blocking thread pool.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::error;

use rbg_repos::{Repository, RepositoryError};
use rbg_webhooks::Webhook;

use crate::error::{ApiError, ApiResult};
use crate::middleware::RepositoryHandle;
use crate::session::Session;
use crate::SharedState;

/// Run a blocking repository operation on the blocking thread pool.
async fn run_repo_op<T, F>(repo: Arc<dyn Repository>, op: F) -> ApiResult<Result<T, RepositoryError>>
where
    T: Send + 'static,
    F: FnOnce(&dyn Repository) -> Result<T, RepositoryError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(repo.as_ref()))
        .await
        .map_err(|err| {
            error!("Repository task panicked: {}", err);
            ApiError::internal()
        })
}

fn basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    let (user, password) = decoded.split_once(':')?;

    Some((user.to_string(), password.to_string()))
}

/// Mint a session for basic-auth credentials.
///
/// URL: `/session`
pub async fn get_session(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> ApiResult<Json<Session>> {
    let (username, password) =
        basic_auth(&headers).ok_or_else(|| ApiError::unauthorized("Invalid Authorization header."))?;

    let state = state.read().await;

    if !state.credentials.verify(&username, &password) {
        return Err(ApiError::unauthorized("Authorization failed."));
    }

    let token = state.token_store.new_token().map_err(|err| {
        error!("Could not create session: {}", err);
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Could not create session".to_string(),
        }
    })?;

    Ok(Json(Session {
        private_token: token,
    }))
}

/// Return the branches in the repository.
///
/// URL: `/repos/<repo>/branches`
pub async fn get_branches(
    Extension(RepositoryHandle(repo)): Extension<RepositoryHandle>,
) -> ApiResult<Response> {
    let branches = run_repo_op(repo, |repo| repo.get_branches())
        .await?
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    Ok(Json(branches).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CommitsQuery {
    #[serde(default)]
    start: Option<String>,
}

/// Return the commits for a branch.
///
/// URL: `/repos/<repo>/branches/<branch>/commits?start=<start>`
pub async fn get_commits(
    Extension(RepositoryHandle(repo)): Extension<RepositoryHandle>,
    Path(params): Path<std::collections::HashMap<String, String>>,
    Query(query): Query<CommitsQuery>,
) -> ApiResult<Response> {
    let branch = params
        .get("branch")
        .filter(|branch| !branch.is_empty())
        .ok_or_else(|| ApiError::bad_request("Branch not specified."))?
        .clone();

    let commits = run_repo_op(repo, move |repo| {
        repo.get_commits(&branch, query.start.as_deref())
    })
    .await?
    .map_err(|err| ApiError::bad_request(format!("Could not get commits: {}", err)))?;

    Ok(Json(commits).into_response())
}

/// Return a commit and its diff.
///
/// URL: `/repos/<repo>/commits/<commit-id>`
pub async fn get_commit(
    Extension(RepositoryHandle(repo)): Extension<RepositoryHandle>,
    Path(params): Path<std::collections::HashMap<String, String>>,
) -> ApiResult<Response> {
    let commit_id = params
        .get("commit_id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Commit ID not specified."))?
        .clone();

    let commit = run_repo_op(repo, move |repo| repo.get_commit(&commit_id))
        .await?
        .map_err(|err| match err {
            RepositoryError::NotFound(_) | RepositoryError::InvalidId(_) => {
                ApiError::not_found("Commit ID not found.")
            }
            err => {
                error!("Could not get commit: {}", err);
                ApiError::internal()
            }
        })?;

    Ok(Json(commit).into_response())
}

fn octet_stream(contents: Vec<u8>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        contents,
    )
        .into_response()
}

/// Return the contents of a file, identified by an object ID.
///
/// URL: `/repos/<repo>/file/<file-id>`
pub async fn get_file(
    Extension(RepositoryHandle(repo)): Extension<RepositoryHandle>,
    Path(params): Path<std::collections::HashMap<String, String>>,
) -> ApiResult<Response> {
    let file_id = params
        .get("file_id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("File ID not specified."))?
        .clone();

    let id = file_id.clone();
    let contents = run_repo_op(repo, move |repo| repo.get_file(&id))
        .await?
        .map_err(|err| match err {
            RepositoryError::InvalidId(_) => ApiError::bad_request(err.to_string()),
            err => ApiError::not_found(format!("Could not get file \"{}\": {}", file_id, err)),
        })?;

    Ok(octet_stream(contents))
}

/// Return whether a file, identified by an object ID, exists.
///
/// URL: `/repos/<repo>/file/<file-id>`
pub async fn get_file_exists(
    Extension(RepositoryHandle(repo)): Extension<RepositoryHandle>,
    Path(params): Path<std::collections::HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let file_id = params
        .get("file_id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("File ID not specified."))?
        .clone();

    let exists = run_repo_op(repo, move |repo| repo.file_exists(&file_id))
        .await?
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    if exists {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

fn commit_and_path(
    params: &std::collections::HashMap<String, String>,
) -> ApiResult<(String, String)> {
    let commit_id = params
        .get("commit_id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Commit ID not specified."))?;

    let path = params
        .get("path")
        .filter(|path| !path.is_empty())
        .ok_or_else(|| ApiError::bad_request("File path not specified."))?;

    Ok((commit_id.clone(), path.trim_start_matches('/').to_string()))
}

/// Return the contents of a file at a specific commit.
///
/// URL: `/repos/<repo>/commits/<commit-id>/path/<path>`
pub async fn get_file_by_commit(
    Extension(RepositoryHandle(repo)): Extension<RepositoryHandle>,
    Path(params): Path<std::collections::HashMap<String, String>>,
) -> ApiResult<Response> {
    let (commit_id, path) = commit_and_path(&params)?;

    let describe = format!("\"{}\" at commit \"{}\"", path, commit_id);
    let contents = run_repo_op(repo, move |repo| repo.get_file_by_commit(&commit_id, &path))
        .await?
        .map_err(|err| match err {
            RepositoryError::InvalidId(_) => ApiError::bad_request(err.to_string()),
            err => ApiError::not_found(format!("Could not get file {}: {}", describe, err)),
        })?;

    Ok(octet_stream(contents))
}

/// Return whether a file exists at a specific commit.
///
/// URL: `/repos/<repo>/commits/<commit-id>/path/<path>`
pub async fn get_file_exists_by_commit(
    Extension(RepositoryHandle(repo)): Extension<RepositoryHandle>,
    Path(params): Path<std::collections::HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let (commit_id, path) = commit_and_path(&params)?;

    let exists = run_repo_op(repo, move |repo| {
        repo.file_exists_by_commit(&commit_id, &path)
    })
    .await?
    .map_err(|err| ApiError::bad_request(err.to_string()))?;

    if exists {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// Confirm that the caller can access the repository.
///
/// Review Board probes this endpoint to confirm repository access; being
/// behind the authorization middleware, it can always answer 200.
///
/// URL: `/repos/<repo>/path`
pub async fn get_path() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
struct WebhookList {
    webhooks: Vec<Webhook>,
}

/// List all webhooks.
///
/// URL: `/webhooks`
pub async fn get_hooks(State(state): State<SharedState>) -> ApiResult<Response> {
    let state = state.read().await;

    let webhooks: Vec<Webhook> = state.hook_store.values().cloned().collect();

    Ok(Json(WebhookList { webhooks }).into_response())
}

/// Register a new webhook.
///
/// URL: `/webhooks`
pub async fn create_hook(
    State(state): State<SharedState>,
    payload: Result<Json<Webhook>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(mut hook) = payload
        .map_err(|err| ApiError::bad_request(format!("Could not parse request body: {}", err)))?;

    let mut state = state.write().await;

    if state.hook_store.contains(&hook.id) {
        return Err(ApiError::bad_request(format!(
            "A webhook with ID \"{}\" already exists.",
            hook.id
        )));
    }

    hook.validate(&state.config.repository_set())
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    hook.events.sort();
    hook.repos.sort();

    let id = hook.id.clone();
    state.hook_store.insert(hook);

    let path = state.config.webhook_store_path.clone();
    if let Err(err) = state.hook_store.save(&path) {
        // Keep memory consistent with disk.
        error!("Could not save webhook store: {}", err);
        state.hook_store.remove(&id);

        return Err(ApiError::internal());
    }

    Ok(StatusCode::CREATED)
}

/// Fetch a single webhook.
///
/// URL: `/webhooks/<hook-id>`
pub async fn get_hook(
    State(state): State<SharedState>,
    Path(hook_id): Path<String>,
) -> ApiResult<Response> {
    let state = state.read().await;

    let hook = state
        .hook_store
        .get(&hook_id)
        .ok_or_else(|| ApiError::not_found("No such webhook"))?;

    Ok(Json(hook.clone()).into_response())
}

/// Delete a webhook.
///
/// URL: `/webhooks/<hook-id>`
pub async fn delete_hook(
    State(state): State<SharedState>,
    Path(hook_id): Path<String>,
) -> ApiResult<StatusCode> {
    let mut state = state.write().await;

    let hook = state
        .hook_store
        .remove(&hook_id)
        .ok_or_else(|| ApiError::not_found("No such webhook"))?;

    let path = state.config.webhook_store_path.clone();
    if let Err(err) = state.hook_store.save(&path) {
        // Keep memory consistent with disk.
        error!("Could not save webhook store: {}", err);
        state.hook_store.insert(hook);

        return Err(ApiError::internal());
    }

    Ok(StatusCode::NO_CONTENT)
}

/// A partial webhook update.
#[derive(Debug, Deserialize)]
pub struct UpdateHookRequest {
    id: Option<String>,
    url: Option<String>,
    secret: Option<String>,
    enabled: Option<bool>,
    events: Option<Vec<String>>,
    repos: Option<Vec<String>>,
}

/// Apply a partial update to a webhook.
///
/// URL: `/webhooks/<hook-id>`
pub async fn update_hook(
    State(state): State<SharedState>,
    Path(hook_id): Path<String>,
    payload: Result<Json<UpdateHookRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(patch) = payload
        .map_err(|err| ApiError::bad_request(format!("Could not parse request body: {}", err)))?;

    let mut state = state.write().await;

    let original = state
        .hook_store
        .get(&hook_id)
        .ok_or_else(|| ApiError::not_found("No such webhook"))?
        .clone();

    if patch.id.is_some() {
        return Err(ApiError::bad_request("Hook ID cannot be updated."));
    }

    let mut updated = original.clone();

    if let Some(url) = patch.url {
        updated.url = url;
    }

    if let Some(secret) = patch.secret {
        updated.secret = secret;
    }

    if let Some(enabled) = patch.enabled {
        updated.enabled = enabled;
    }

    if let Some(events) = patch.events {
        updated.events = events;
    }

    if let Some(repos) = patch.repos {
        updated.repos = repos;
    }

    updated
        .validate(&state.config.repository_set())
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    updated.events.sort();
    updated.repos.sort();

    state.hook_store.insert(updated.clone());

    let path = state.config.webhook_store_path.clone();
    if let Err(err) = state.hook_store.save(&path) {
        // Keep memory consistent with disk.
        error!("Could not update hook store: {}", err);
        state.hook_store.insert(original);

        return Err(ApiError::internal());
    }

    Ok(Json(updated).into_response())
}
