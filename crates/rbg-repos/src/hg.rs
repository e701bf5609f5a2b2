// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The Mercurial repository adapter, backed by the `hg` command server.

use std::io::Read;
use std::path::Path;

use ini::Ini;
use tracing::debug;

use crate::error::{RepositoryError, RepositoryResult};
use crate::events::{self, PushPayload, PushPayloadCommit, PushPayloadCommitTarget};
use crate::hgcmd::HgClient;
use crate::util::exe_path;
use crate::{Branch, Commit, CommitInfo, Repository, RepositoryInfo, COMMITS_PAGE_SIZE};

/// The Mercurial hook point for each supported event.
const HG_EVENTS: &[(&str, &str)] = &[(events::PUSH_EVENT, "changegroup")];

/// Field and record separators used in `--template` arguments. Mercurial
/// expands the escapes; the output contains the raw control bytes.
const FIELD_SEP_TEMPLATE: &str = "\\x1f";
const RECORD_SEP_TEMPLATE: &str = "\\x1e";
const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';

/// A Mercurial repository.
pub struct HgRepository {
    info: RepositoryInfo,
}

impl HgRepository {
    pub fn new(info: RepositoryInfo) -> Self {
        Self { info }
    }

    /// Create a new command-server client for the repository.
    fn client(&self) -> RepositoryResult<HgClient> {
        HgClient::connect(&self.info.path)
    }

    /// Run `hg log` and split the templated output into records.
    ///
    /// `fields` are template keywords (e.g. `{node}`); the returned records
    /// hold one value per field for each revision matched by `revisions`.
    fn log(
        &self,
        client: &mut HgClient,
        fields: &[&str],
        revisions: &[&str],
        args: &[&str],
    ) -> RepositoryResult<Vec<Vec<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let template = format!("{}{}", fields.join(FIELD_SEP_TEMPLATE), RECORD_SEP_TEMPLATE);

        let mut command = vec!["log", "--template", template.as_str()];
        for rev in revisions.iter().copied() {
            command.push("-r");
            command.push(rev);
        }
        command.extend_from_slice(args);

        let output = client.run(&command)?;
        let output = String::from_utf8_lossy(&output);

        Ok(output
            .trim_end_matches(RECORD_SEP)
            .split(RECORD_SEP)
            .filter(|record| !record.is_empty())
            .map(|record| record.split(FIELD_SEP).map(str::to_string).collect())
            .collect())
    }

    fn commit_info(record: &[String]) -> CommitInfo {
        CommitInfo {
            author: record[0].clone(),
            id: record[1].clone(),
            date: record[2].clone(),
            message: record[3].clone(),
            parent_id: record[4].clone(),
        }
    }

    fn parse_push_event(&self) -> RepositoryResult<PushPayload> {
        // The changegroup hook reports the pushed range through the
        // environment.
        let first_node = std::env::var("HG_NODE")
            .map_err(|_| RepositoryError::Parse("No HG_NODE environment variable.".to_string()))?;

        let last_node = match std::env::var("HG_NODE_LAST") {
            Ok(node) if !node.is_empty() => node,
            _ => first_node.clone(),
        };

        let mut client = self.client()?;
        let revset = format!("{}:{}", first_node, last_node);

        let records = self.log(
            &mut client,
            &["{node}", "{desc}", "{branch}", "{bookmarks}", "{tags}"],
            &[revset.as_str()],
            &[],
        )?;

        let mut payload = PushPayload {
            repository: self.info.name.clone(),
            commits: Vec::with_capacity(records.len()),
        };

        for record in &records {
            if record.len() != 5 {
                return Err(RepositoryError::Parse(
                    "Unexpected output from hg log.".to_string(),
                ));
            }

            let split_names = |raw: &str| -> Option<Vec<String>> {
                if raw.is_empty() {
                    None
                } else {
                    Some(raw.split(' ').map(str::to_string).collect())
                }
            };

            payload.commits.push(PushPayloadCommit {
                id: record[0].clone(),
                message: record[1].clone(),
                target: PushPayloadCommitTarget {
                    branch: record[2].clone(),
                    bookmarks: split_names(&record[3]),
                    tags: split_names(&record[4]),
                },
            });
        }

        Ok(payload)
    }
}

/// Whether an hg error indicates a missing file rather than a failure.
fn is_not_exist(err: &RepositoryError) -> bool {
    err.to_string().contains(": no such file in rev ")
}

/// Whether an hg error indicates an unknown revision.
fn is_unknown_revision(err: &RepositoryError) -> bool {
    let msg = err.to_string();
    msg.contains("unknown revision") || msg.contains("abort: empty revision range")
}

impl Repository for HgRepository {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn path(&self) -> &Path {
        &self.info.path
    }

    fn scm(&self) -> &'static str {
        "hg"
    }

    fn get_file(&self, filepath: &str) -> RepositoryResult<Vec<u8>> {
        let mut client = self.client()?;

        client.run(&["cat", filepath]).map_err(|err| {
            if is_not_exist(&err) {
                RepositoryError::NotFound(err.to_string())
            } else {
                err
            }
        })
    }

    fn get_file_by_commit(&self, changeset: &str, filepath: &str) -> RepositoryResult<Vec<u8>> {
        let mut client = self.client()?;

        client
            .run(&["cat", "-r", changeset, filepath])
            .map_err(|err| {
                if is_not_exist(&err) {
                    RepositoryError::NotFound(err.to_string())
                } else {
                    err
                }
            })
    }

    fn file_exists(&self, filepath: &str) -> RepositoryResult<bool> {
        let mut client = self.client()?;

        match client.run(&["cat", filepath]) {
            Ok(_) => Ok(true),
            Err(err) if is_not_exist(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn file_exists_by_commit(&self, changeset: &str, filepath: &str) -> RepositoryResult<bool> {
        let mut client = self.client()?;

        match client.run(&["cat", "-r", changeset, "--template", "", filepath]) {
            Ok(_) => Ok(true),
            Err(err) if is_not_exist(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Return the branches of the repository.
    ///
    /// This returns both Mercurial branches and bookmarks, branches first.
    fn get_branches(&self) -> RepositoryResult<Vec<Branch>> {
        let mut client = self.client()?;

        let branch_template = format!("{{branch}}{}{{node}}{}", FIELD_SEP_TEMPLATE, RECORD_SEP_TEMPLATE);
        let bookmark_template =
            format!("{{bookmark}}{}{{node}}{}", FIELD_SEP_TEMPLATE, RECORD_SEP_TEMPLATE);

        let branch_output = client.run(&["branches", "--template", &branch_template])?;
        let bookmark_output = client.run(&["bookmarks", "--template", &bookmark_template])?;

        let mut branches = Vec::new();

        for output in [branch_output, bookmark_output] {
            let output = String::from_utf8_lossy(&output);

            for record in output.trim_end_matches(RECORD_SEP).split(RECORD_SEP) {
                if record.is_empty() {
                    continue;
                }

                let mut fields = record.split(FIELD_SEP);

                match (fields.next(), fields.next()) {
                    (Some(name), Some(id)) => branches.push(Branch {
                        name: name.to_string(),
                        id: id.to_string(),
                    }),
                    _ => {
                        return Err(RepositoryError::Parse(
                            "Unexpected output from hg.".to_string(),
                        ))
                    }
                }
            }
        }

        Ok(branches)
    }

    fn get_commits(
        &self,
        branch: &str,
        start: Option<&str>,
    ) -> RepositoryResult<Vec<CommitInfo>> {
        let start = match start {
            Some(start) if !start.is_empty() => start,
            _ => branch,
        };

        let mut client = self.client()?;
        let limit = COMMITS_PAGE_SIZE.to_string();

        let records = self
            .log(
                &mut client,
                &["{author}", "{node}", "{date|rfc3339date}", "{desc}", "{p1node}"],
                &[start],
                &["--follow", "--limit", &limit],
            )
            .map_err(|err| {
                if is_unknown_revision(&err) {
                    RepositoryError::NotFound(err.to_string())
                } else {
                    err
                }
            })?;

        Ok(records
            .iter()
            .filter(|record| record.len() == 5)
            .map(|record| Self::commit_info(record))
            .collect())
    }

    fn get_commit(&self, commit_id: &str) -> RepositoryResult<Commit> {
        let mut client = self.client()?;

        let records = self
            .log(
                &mut client,
                &["{author}", "{node}", "{date|rfc3339date}", "{desc}", "{p1node}"],
                &[commit_id],
                &[],
            )
            .map_err(|err| {
                if is_unknown_revision(&err) {
                    RepositoryError::NotFound(err.to_string())
                } else {
                    err
                }
            })?;

        let record = match records.first() {
            Some(record) if record.len() == 5 => record,
            _ => {
                return Err(RepositoryError::NotFound(format!(
                    "Unknown changeset: {}",
                    commit_id
                )))
            }
        };

        let diff = client.run(&[
            "diff",
            "--git",
            "--rev",
            &format!("{}^:{}", commit_id, commit_id),
        ])?;

        Ok(Commit {
            info: Self::commit_info(record),
            diff: String::from_utf8_lossy(&diff).into_owned(),
        })
    }

    fn parse_event_payload(
        &self,
        event: &str,
        _input: &mut dyn Read,
    ) -> RepositoryResult<PushPayload> {
        if !events::is_valid_event(event) {
            return Err(RepositoryError::InvalidEvent);
        }

        match event {
            events::PUSH_EVENT => self.parse_push_event(),
            _ => Err(RepositoryError::InvalidEvent),
        }
    }

    fn install_hooks(&self, config_path: &Path, force: bool) -> RepositoryResult<()> {
        let hgrc_path = self.info.path.join(".hg").join("hgrc");

        let mut hgrc = if hgrc_path.exists() {
            Ini::load_from_file(&hgrc_path)
                .map_err(|err| RepositoryError::Parse(err.to_string()))?
        } else {
            Ini::new()
        };

        let exe = exe_path()?;

        for &(event, hook) in HG_EVENTS {
            let key = format!("{}.rbgateway", hook);

            if hgrc.get_from(Some("hooks"), key.as_str()).is_some() && !force {
                debug!(key = %key, "Hook already installed; skipping");
                continue;
            }

            let value = shell_words::join([
                exe.to_string_lossy().as_ref(),
                "--config",
                config_path.to_string_lossy().as_ref(),
                "trigger-webhooks",
                self.info.name.as_str(),
                event,
            ]);

            hgrc.with_section(Some("hooks")).set(key.as_str(), value);
        }

        hgrc.write_to_file(&hgrc_path)?;

        Ok(())
    }
}
