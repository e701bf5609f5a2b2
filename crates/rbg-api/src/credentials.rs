// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! htpasswd-backed credentials.
//!
//! The htpasswd file is loaded fully at configuration time and never
//! re-read implicitly; a configuration reload (e.g. `SIGHUP`) builds a new
//! [`Credentials`] instance.

use std::collections::HashMap;
use std::path::Path;

use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;

/// Result type alias for credential operations.
pub type CredentialsResult<T> = Result<T, CredentialsError>;

/// Errors that can occur while loading credentials.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed htpasswd file")]
    Malformed,
}

/// The credential records loaded from an htpasswd file.
pub struct Credentials {
    records: HashMap<String, String>,
}

impl Credentials {
    /// Load the htpasswd file at `path`.
    ///
    /// Lines are `user:secret` records; `#` starts a comment and leading
    /// whitespace is ignored.
    pub fn load(path: &Path) -> CredentialsResult<Credentials> {
        let content = std::fs::read_to_string(path)?;
        let mut records = HashMap::new();

        for line in content.lines() {
            let line = line.trim_start();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (user, secret) = line.split_once(':').ok_or(CredentialsError::Malformed)?;
            records.insert(user.to_string(), secret.to_string());
        }

        Ok(Credentials { records })
    }

    /// Verify a username/password pair.
    ///
    /// Both halves are compared in constant time; the result is true only
    /// when a record matches on both.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let mut valid = Choice::from(0u8);

        for (user, secret) in &self.records {
            let user_ok = user.as_bytes().ct_eq(username.as_bytes());
            let pass_ok = secret.as_bytes().ct_eq(password.as_bytes());

            valid |= user_ok & pass_ok;
        }

        valid.into()
    }
}
