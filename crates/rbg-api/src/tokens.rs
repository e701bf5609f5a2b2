// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Private-token stores.
//!
//! Tokens are 64-character uppercase hex strings minted from 32 random
//! bytes. Two store variants exist: a file-backed store used by the server
//! and an in-memory store reserved for tests (selected with the path
//! `":memory:"`).

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::RwLock;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use rbg_config::MEMORY_STORE_PATH;

/// The request header carrying the private token.
pub const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// The length of a rendered token.
pub const TOKEN_SIZE: usize = 64;

const RAW_TOKEN_SIZE: usize = 32;
const MAX_ATTEMPTS: usize = 10;

/// Result type alias for token-store operations.
pub type TokenResult<T> = Result<T, TokenError>;

/// Errors that can occur while minting or persisting tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Could not generate token: {0}")]
    Rng(String),

    #[error("Could not generate token after {0} attempts.")]
    Exhausted(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A store of issued private tokens.
pub enum TokenStore {
    /// A memory-only store for unit testing. Tokens do not persist between
    /// restarts.
    Memory(RwLock<HashSet<String>>),

    /// A store backed by a JSON file on disk.
    File {
        path: PathBuf,
        tokens: RwLock<HashSet<String>>,
    },
}

impl TokenStore {
    /// Open the token store for the given path.
    ///
    /// The special path `":memory:"` selects the in-memory variant; it
    /// should only be used by tests.
    pub fn open(path: &str) -> TokenResult<TokenStore> {
        if path == MEMORY_STORE_PATH {
            Ok(TokenStore::Memory(RwLock::new(HashSet::new())))
        } else {
            let path = PathBuf::from(path);
            let mut tokens = HashSet::new();

            match std::fs::read(&path) {
                Ok(content) if !content.is_empty() => {
                    let loaded: Vec<String> = serde_json::from_slice(&content)?;
                    tokens.extend(loaded);
                }
                Ok(_) => (),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
                Err(err) => return Err(err.into()),
            }

            Ok(TokenStore::File {
                path,
                tokens: RwLock::new(tokens),
            })
        }
    }

    fn tokens(&self) -> &RwLock<HashSet<String>> {
        match self {
            TokenStore::Memory(tokens) => tokens,
            TokenStore::File { tokens, .. } => tokens,
        }
    }

    /// Create a new, unique token.
    ///
    /// This may fail if the OS random device cannot be read or if a unique
    /// token cannot be generated after a number of attempts.
    pub fn new_token(&self) -> TokenResult<String> {
        let mut raw = [0u8; RAW_TOKEN_SIZE];
        let mut tokens = self.tokens().write().expect("token store lock poisoned");

        for _ in 0..MAX_ATTEMPTS {
            OsRng
                .try_fill_bytes(&mut raw)
                .map_err(|err| TokenError::Rng(err.to_string()))?;

            let token = hex::encode_upper(raw);

            if tokens.insert(token.clone()) {
                return Ok(token);
            }
        }

        Err(TokenError::Exhausted(MAX_ATTEMPTS))
    }

    /// Return the token from a request header value, if it is valid and
    /// known.
    pub fn get(&self, header_value: &str) -> Option<String> {
        if self.exists(header_value) {
            Some(header_value.to_string())
        } else {
            None
        }
    }

    /// Return whether a token exists in the store.
    pub fn exists(&self, token: &str) -> bool {
        if token.len() != TOKEN_SIZE {
            return false;
        }

        self.tokens()
            .read()
            .expect("token store lock poisoned")
            .contains(token)
    }

    /// Persist the store.
    ///
    /// The tokens are written as a JSON array with file mode 0600. This is
    /// a no-op for the in-memory variant.
    pub fn save(&self) -> TokenResult<()> {
        let TokenStore::File { path, tokens } = self else {
            return Ok(());
        };

        let tokens = tokens.read().expect("token store lock poisoned");
        let list: Vec<&String> = tokens.iter().collect();
        let content = serde_json::to_vec(&list)?;

        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;

        f.write_all(&content)?;

        Ok(())
    }
}
