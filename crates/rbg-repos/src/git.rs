// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The Git repository adapter, backed by libgit2.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use chrono::{FixedOffset, TimeZone};
use git2::{BranchType, DiffFormat, DiffOptions, Oid, Sort};

use crate::error::{RepositoryError, RepositoryResult};
use crate::events::{self, PushPayload, PushPayloadCommit, PushPayloadCommitTarget};
use crate::{Branch, Commit, CommitInfo, Repository, RepositoryInfo, COMMITS_PAGE_SIZE};

/// The length of a full Git object ID, used for patch indices.
const PATCH_INDEX_LENGTH: u16 = 40;

/// The all-zero object ID the post-receive wire format uses for created and
/// deleted refs.
const ZERO_ID: &str = "0000000000000000000000000000000000000000";

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// A Git repository.
pub struct GitRepository {
    info: RepositoryInfo,
}

impl GitRepository {
    pub fn new(info: RepositoryInfo) -> Self {
        Self { info }
    }

    fn open(&self) -> RepositoryResult<git2::Repository> {
        Ok(git2::Repository::open(&self.info.path)?)
    }

    fn parse_oid(id: &str) -> RepositoryResult<Oid> {
        Oid::from_str(id).map_err(|_| RepositoryError::InvalidId(id.to_string()))
    }

    /// Format a commit time as `YYYY-MM-DDTHH:MM:SS±HHMM`.
    fn format_time(time: git2::Time) -> String {
        let offset = FixedOffset::east_opt(time.offset_minutes() * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());

        match offset.timestamp_opt(time.seconds(), 0) {
            chrono::LocalResult::Single(date) => date.format("%Y-%m-%dT%H:%M:%S%z").to_string(),
            _ => String::new(),
        }
    }

    fn commit_info(commit: &git2::Commit) -> CommitInfo {
        let parent_id = if commit.parent_count() > 0 {
            commit.parent_id(0).map(|id| id.to_string()).unwrap_or_default()
        } else {
            String::new()
        };

        CommitInfo {
            author: commit.author().name().unwrap_or_default().to_string(),
            id: commit.id().to_string(),
            date: Self::format_time(commit.author().when()),
            message: commit.message().unwrap_or_default().to_string(),
            parent_id,
        }
    }

    fn find_blob_by_commit<'r>(
        repo: &'r git2::Repository,
        commit_id: &str,
        path: &str,
    ) -> RepositoryResult<git2::Blob<'r>> {
        let commit = repo.find_commit(Self::parse_oid(commit_id)?)?;
        let tree = commit.tree()?;
        let entry = tree.get_path(Path::new(path))?;

        Ok(repo.find_blob(entry.id())?)
    }

    /// Find a boundary commit separating `a`'s history from `b`'s.
    ///
    /// Ancestors of `a` are ranked in pre-order; every ancestor of `b` found
    /// in that set is a common ancestor. Common ancestors that have a common
    /// child cannot be the divergence point, so they are discarded, and the
    /// lowest-ranked survivor wins. This is not a full lowest-common-ancestor
    /// search; it only needs to produce *a* commit that cleanly separates the
    /// pushed commits from the history they were based on.
    fn merge_base(
        repo: &git2::Repository,
        a: Oid,
        b: Oid,
    ) -> RepositoryResult<Option<Oid>> {
        let mut ranks: HashMap<Oid, usize> = HashMap::new();
        let mut stack = vec![a];

        while let Some(oid) = stack.pop() {
            if ranks.contains_key(&oid) {
                continue;
            }

            ranks.insert(oid, ranks.len());

            let commit = repo.find_commit(oid)?;
            let parents: Vec<Oid> = commit.parent_ids().collect();

            // Reversed so that the first parent is visited first.
            stack.extend(parents.into_iter().rev());
        }

        let mut common: HashSet<Oid> = HashSet::new();
        let mut visited: HashSet<Oid> = HashSet::new();
        let mut stack = vec![b];

        while let Some(oid) = stack.pop() {
            if !visited.insert(oid) {
                continue;
            }

            if ranks.contains_key(&oid) {
                common.insert(oid);
            }

            let commit = repo.find_commit(oid)?;
            stack.extend(commit.parent_ids());
        }

        // A common ancestor whose child is also a common ancestor is part of
        // the shared history proper, not the divergence point.
        let mut has_common_child: HashSet<Oid> = HashSet::new();
        for oid in &common {
            let commit = repo.find_commit(*oid)?;
            for parent in commit.parent_ids() {
                if common.contains(&parent) {
                    has_common_child.insert(parent);
                }
            }
        }

        Ok(common
            .iter()
            .copied()
            .filter(|oid| !has_common_child.contains(oid))
            .min_by_key(|oid| ranks[oid]))
    }

    /// Collect the commits introduced by a single post-receive record.
    ///
    /// Commits reachable from any OID in `exclude` are hidden from the walk.
    /// The returned list is ordered oldest first; commits already in `seen`
    /// are skipped and newly yielded ones are added to it.
    fn collect_pushed_commits(
        repo: &git2::Repository,
        new: Oid,
        exclude: &[Oid],
        branch: &str,
        seen: &mut HashSet<Oid>,
    ) -> RepositoryResult<Vec<PushPayloadCommit>> {
        let mut walk = repo.revwalk()?;
        walk.push(new)?;

        for oid in exclude {
            walk.hide(*oid)?;
        }

        let mut commits = Vec::new();

        for oid in walk {
            let oid = oid?;

            if !seen.insert(oid) {
                continue;
            }

            let commit = repo.find_commit(oid)?;

            commits.push(PushPayloadCommit {
                id: oid.to_string(),
                message: commit.message().unwrap_or_default().to_string(),
                target: PushPayloadCommitTarget {
                    branch: branch.to_string(),
                    bookmarks: None,
                    tags: None,
                },
            });
        }

        // The walk yields newest first; the payload wants the oldest commit
        // of each ref first.
        commits.reverse();

        Ok(commits)
    }

    fn parse_push_event(&self, input: &mut dyn Read) -> RepositoryResult<PushPayload> {
        let mut raw = String::new();
        input
            .read_to_string(&mut raw)
            .map_err(|err| RepositoryError::Parse(err.to_string()))?;

        let repo = self.open()?;

        let mut payload = PushPayload {
            repository: self.info.name.clone(),
            commits: Vec::new(),
        };

        let mut seen: HashSet<Oid> = HashSet::new();

        for line in raw.lines() {
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 3 {
                return Err(RepositoryError::Parse(format!(
                    "Unexpected post-receive input: \"{}\"",
                    line
                )));
            }

            let (old, new, refname) = (fields[0], fields[1], fields[2]);

            // Deleted refs and non-branch refs carry no new commits.
            if new == ZERO_ID || !refname.starts_with(BRANCH_REF_PREFIX) {
                continue;
            }

            let branch = &refname[BRANCH_REF_PREFIX.len()..];
            let new_oid = Self::parse_oid(new)?;

            let exclude: Vec<Oid> = if old == ZERO_ID {
                // A new branch: everything reachable from the other local
                // branches was already present before the push.
                let mut tips = Vec::new();

                for entry in repo.branches(Some(BranchType::Local))? {
                    let (other, _) = entry?;

                    if other.get().name() == Some(refname) {
                        continue;
                    }

                    if let Some(tip) = other.get().target() {
                        tips.push(tip);
                    }
                }

                tips
            } else {
                let old_oid = Self::parse_oid(old)?;

                // Walking from the merge base rather than the old tip keeps
                // rewritten commits from a force push and drops the commits
                // that became unreachable.
                Self::merge_base(&repo, new_oid, old_oid)?
                    .map(|base| vec![base])
                    .unwrap_or_default()
            };

            let commits =
                Self::collect_pushed_commits(&repo, new_oid, &exclude, branch, &mut seen)?;
            payload.commits.extend(commits);
        }

        Ok(payload)
    }
}

impl Repository for GitRepository {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn path(&self) -> &Path {
        &self.info.path
    }

    fn scm(&self) -> &'static str {
        "git"
    }

    fn get_file(&self, id: &str) -> RepositoryResult<Vec<u8>> {
        let repo = self.open()?;
        let blob = repo.find_blob(Self::parse_oid(id)?)?;

        Ok(blob.content().to_vec())
    }

    fn get_file_by_commit(&self, commit: &str, path: &str) -> RepositoryResult<Vec<u8>> {
        let repo = self.open()?;
        let blob = Self::find_blob_by_commit(&repo, commit, path)?;

        Ok(blob.content().to_vec())
    }

    fn file_exists(&self, id: &str) -> RepositoryResult<bool> {
        let repo = self.open()?;

        let result = match repo.find_blob(Self::parse_oid(id)?) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        };
        result
    }

    fn file_exists_by_commit(&self, commit: &str, path: &str) -> RepositoryResult<bool> {
        let repo = self.open()?;

        let result = match Self::find_blob_by_commit(&repo, commit, path) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        };
        result
    }

    fn get_branches(&self) -> RepositoryResult<Vec<Branch>> {
        let repo = self.open()?;
        let mut branches = Vec::new();

        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;

            let name = match branch.name()? {
                Some(name) => name.to_string(),
                None => continue,
            };

            let id = match branch.get().target() {
                Some(oid) => oid.to_string(),
                None => continue,
            };

            branches.push(Branch { name, id });
        }

        Ok(branches)
    }

    fn get_commits(
        &self,
        branch: &str,
        start: Option<&str>,
    ) -> RepositoryResult<Vec<CommitInfo>> {
        let repo = self.open()?;

        let start_oid = match start {
            Some(start) if !start.is_empty() => Self::parse_oid(start)?,
            _ => {
                let branch = repo.find_branch(branch, BranchType::Local)?;

                branch.get().target().ok_or_else(|| {
                    RepositoryError::NotFound("Branch has no target commit.".to_string())
                })?
            }
        };

        let mut walk = repo.revwalk()?;
        walk.push(start_oid)?;
        walk.set_sorting(Sort::TIME)?;

        let mut commits = Vec::with_capacity(COMMITS_PAGE_SIZE);

        for oid in walk {
            if commits.len() == COMMITS_PAGE_SIZE {
                break;
            }

            let commit = repo.find_commit(oid?)?;
            commits.push(Self::commit_info(&commit));
        }

        Ok(commits)
    }

    fn get_commit(&self, commit_id: &str) -> RepositoryResult<Commit> {
        let repo = self.open()?;
        let commit = repo.find_commit(Self::parse_oid(commit_id)?)?;

        if commit.parent_count() == 0 {
            return Err(RepositoryError::Scm("Commit has no parents.".to_string()));
        }

        let parent = commit.parent(0)?;

        let mut opts = DiffOptions::new();
        opts.id_abbrev(PATCH_INDEX_LENGTH);

        let diff = repo.diff_tree_to_tree(
            Some(&parent.tree()?),
            Some(&commit.tree()?),
            Some(&mut opts),
        )?;

        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_, _, line| {
            let origin = line.origin();

            if matches!(origin, '+' | '-' | ' ') {
                patch.push(origin);
            }

            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;

        Ok(Commit {
            info: Self::commit_info(&commit),
            diff: patch,
        })
    }

    fn parse_event_payload(
        &self,
        event: &str,
        input: &mut dyn Read,
    ) -> RepositoryResult<PushPayload> {
        if !events::is_valid_event(event) {
            return Err(RepositoryError::InvalidEvent);
        }

        match event {
            events::PUSH_EVENT => self.parse_push_event(input),
            _ => Err(RepositoryError::InvalidEvent),
        }
    }

    fn install_hooks(&self, config_path: &Path, force: bool) -> RepositoryResult<()> {
        crate::git_hooks::install_hooks(self, config_path, force)
    }
}
