// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The rb-gateway HTTP API and its request lifecycle.
//!
//! [`Api`] owns the active configuration snapshot together with the stores
//! built from it (tokens, credentials, webhooks) behind one reader/writer
//! lock. Handlers take the read side per request; configuration reloads
//! rebuild every dependent store and swap them in under the write side, so
//! a request never observes a half-replaced bundle.

pub mod credentials;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod session;
pub mod tokens;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use rbg_config::Config;
use rbg_webhooks::WebhookStore;

pub use credentials::Credentials;
pub use error::{ApiError, ApiResult};
pub use session::Session;
pub use tokens::{TokenStore, TOKEN_HEADER, TOKEN_SIZE};

/// Errors that can occur while building the API from a configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Could not open token store: {0}")]
    Tokens(#[from] tokens::TokenError),

    #[error("Could not load htpasswd file: {0}")]
    Credentials(#[from] credentials::CredentialsError),

    #[error("Could not load webhook store: {0}")]
    Webhooks(#[from] rbg_webhooks::WebhookError),
}

/// The dependency bundle behind the API's reader/writer lock.
pub struct ApiState {
    pub config: Config,
    pub token_store: Arc<TokenStore>,
    pub credentials: Arc<Credentials>,
    pub hook_store: WebhookStore,
}

impl ApiState {
    fn build(config: Config) -> Result<ApiState, SetupError> {
        let token_store = TokenStore::open(&config.token_store_path)?;
        let credentials = Credentials::load(&config.htpasswd_path)?;
        let hook_store = WebhookStore::load(&config.webhook_store_path, &config.repository_set())?;

        Ok(ApiState {
            config,
            token_store: Arc::new(token_store),
            credentials: Arc::new(credentials),
            hook_store,
        })
    }
}

/// The shared, hot-swappable API state.
pub type SharedState = Arc<RwLock<ApiState>>;

/// The rb-gateway API.
#[derive(Clone)]
pub struct Api {
    state: SharedState,
}

impl Api {
    /// Build the API from a configuration snapshot.
    pub fn new(config: Config) -> Result<Api, SetupError> {
        Ok(Api {
            state: Arc::new(RwLock::new(ApiState::build(config)?)),
        })
    }

    /// The shared state handle.
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Replace the active configuration.
    ///
    /// The token store, credentials and webhook store are rebuilt from the
    /// new configuration first; only once all of them construct successfully
    /// is the bundle swapped in. On failure the previous configuration stays
    /// active.
    pub async fn set_config(&self, config: Config) -> Result<(), SetupError> {
        let new_state = ApiState::build(config)?;

        let mut state = self.state.write().await;
        *state = new_state;

        Ok(())
    }

    /// Persist the token store.
    ///
    /// Taking the write lock fences any in-flight request that still holds
    /// a token-store reference.
    pub async fn save_token_store(&self) -> ApiResult<()> {
        let state = self.state.write().await;

        state.token_store.save().map_err(|err| {
            tracing::error!("Could not save token store: {}", err);
            ApiError::internal()
        })
    }

    /// Build the router for the API.
    pub fn router(&self) -> Router {
        let state = self.state.clone();

        let repo_routes = Router::new()
            .route("/branches", get(handlers::get_branches))
            .route("/branches/:branch/commits", get(handlers::get_commits))
            .route("/commits/:commit_id", get(handlers::get_commit))
            .route(
                "/commits/:commit_id/path/*path",
                get(handlers::get_file_by_commit).head(handlers::get_file_exists_by_commit),
            )
            .route(
                "/file/:file_id",
                get(handlers::get_file).head(handlers::get_file_exists),
            )
            .route("/path", get(handlers::get_path))
            .route_layer(from_fn_with_state(state.clone(), middleware::with_repository))
            .route_layer(from_fn_with_state(state.clone(), middleware::token_required));

        Router::new()
            .route(
                "/session",
                get(handlers::get_session).post(handlers::get_session),
            )
            .nest("/repos/:repo", repo_routes)
            .route(
                "/webhooks",
                get(handlers::get_hooks).post(handlers::create_hook),
            )
            .route(
                "/webhooks/:hook_id",
                get(handlers::get_hook)
                    .delete(handlers::delete_hook)
                    .patch(handlers::update_hook),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
