// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request middleware.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use rbg_repos::Repository;

use crate::error::ApiError;
use crate::tokens::TOKEN_HEADER;
use crate::SharedState;

/// The repository resolved for the current request, attached as a request
/// extension by [`with_repository`].
#[derive(Clone)]
pub struct RepositoryHandle(pub Arc<dyn Repository>);

/// Reject requests that do not carry a known private token.
pub async fn token_required(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    let authorized = match token {
        Some(token) => state.read().await.token_store.exists(token),
        None => false,
    };

    if authorized {
        next.run(req).await
    } else {
        ApiError::unauthorized("Invalid private token.").into_response()
    }
}

/// Resolve the `{repo}` path parameter against the current configuration.
///
/// On success the repository adapter is attached to the request as a
/// [`RepositoryHandle`].
pub async fn with_repository(
    State(state): State<SharedState>,
    Path(params): Path<HashMap<String, String>>,
    mut req: Request,
    next: Next,
) -> Response {
    let repo_name = match params.get("repo") {
        Some(name) if !name.is_empty() => name,
        _ => return ApiError::bad_request("Repository not provided.").into_response(),
    };

    let repo = state.read().await.config.repositories.get(repo_name).cloned();

    match repo {
        Some(repo) => {
            req.extensions_mut().insert(RepositoryHandle(repo));
            next.run(req).await
        }
        None => ApiError::not_found("Repository not found.").into_response(),
    }
}
