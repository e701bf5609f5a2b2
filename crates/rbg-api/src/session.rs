// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use serde::{Deserialize, Serialize};

/// A session minted for an authenticated user.
///
/// Currently this only holds the private token used for authenticating API
/// requests; more session information can be added later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub private_token: String,
}
