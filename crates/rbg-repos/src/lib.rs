// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SCM repository adapters for rb-gateway.
//!
//! This crate provides a unified [`Repository`] interface over the supported
//! SCM backends (Git and Mercurial) with consistent APIs for object lookup,
//! branch and commit enumeration, diff rendering, push-event parsing and
//! webhook hook installation.

pub mod error;
pub mod events;
pub mod git;
mod git_hooks;
pub mod hg;
mod hgcmd;
mod util;

use std::io::Read;
use std::path::{Path, PathBuf};

pub use error::{RepositoryError, RepositoryResult};
pub use events::{PushPayload, PushPayloadCommit, PushPayloadCommitTarget};
pub use git::GitRepository;
pub use hg::HgRepository;

/// The maximum number of commits returned by a single `get_commits` call.
pub const COMMITS_PAGE_SIZE: usize = 20;

/// A generic representation of a repository: a unique name and the path to
/// the repository on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub name: String,
    pub path: PathBuf,
}

/// Information about a branch in an SCM.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Branch {
    /// The name of the branch.
    pub name: String,

    /// The commit ID the branch points to.
    pub id: String,
}

/// Metadata about a commit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommitInfo {
    /// The author of the commit.
    pub author: String,

    /// The unique identifier of the commit.
    pub id: String,

    /// The date the commit was authored.
    pub date: String,

    /// The commit's message.
    pub message: String,

    /// The unique identifier of the first parent, or empty for a root
    /// commit.
    pub parent_id: String,
}

/// A commit with metadata and a diff against its first parent.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Commit {
    #[serde(flatten)]
    pub info: CommitInfo,

    /// The contents of the diff.
    pub diff: String,
}

/// The interface handlers and commands use to perform actions on
/// repositories, such as fetching file contents or enumerating branches.
///
/// Implementations exist for Git ([`GitRepository`]) and Mercurial
/// ([`HgRepository`]). All methods are synchronous; callers running inside
/// the server move them onto a blocking thread.
pub trait Repository: Send + Sync {
    /// The configured name of the repository.
    fn name(&self) -> &str;

    /// The path to the repository on disk.
    fn path(&self) -> &Path;

    /// The name of the SCM tool (`"git"` or `"hg"`).
    fn scm(&self) -> &'static str;

    /// Return the contents of the file with the given object ID.
    fn get_file(&self, id: &str) -> RepositoryResult<Vec<u8>>;

    /// Return the contents of the file at `path` as of `commit`.
    fn get_file_by_commit(&self, commit: &str, path: &str) -> RepositoryResult<Vec<u8>>;

    /// Return whether a file with the given object ID exists.
    fn file_exists(&self, id: &str) -> RepositoryResult<bool>;

    /// Return whether the file at `path` exists as of `commit`.
    fn file_exists_by_commit(&self, commit: &str, path: &str) -> RepositoryResult<bool>;

    /// Return all branches in the repository.
    fn get_branches(&self) -> RepositoryResult<Vec<Branch>>;

    /// Return up to [`COMMITS_PAGE_SIZE`] commits, walking from `start` if
    /// provided and from the tip of `branch` otherwise.
    fn get_commits(&self, branch: &str, start: Option<&str>) -> RepositoryResult<Vec<CommitInfo>>;

    /// Return the commit with the given ID, including its diff.
    fn get_commit(&self, commit_id: &str) -> RepositoryResult<Commit>;

    /// Parse the raw data emitted by an SCM hook for the given event into a
    /// normalized payload.
    fn parse_event_payload(
        &self,
        event: &str,
        input: &mut dyn Read,
    ) -> RepositoryResult<PushPayload>;

    /// Install scripts into the repository that trigger webhooks on SCM
    /// events.
    ///
    /// Existing hooks are left in place unless `force` is set.
    fn install_hooks(&self, config_path: &Path, force: bool) -> RepositoryResult<()>;
}
