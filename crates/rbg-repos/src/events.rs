// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Event payloads emitted to webhook subscribers.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// The push event, emitted when commits land in a repository.
pub const PUSH_EVENT: &str = "push";

/// Return whether `event` names a known event type.
pub fn is_valid_event(event: &str) -> bool {
    event == PUSH_EVENT
}

/// A payload that can be delivered to webhook subscribers.
///
/// The wire format orders keys as `event`, `repository`, then the payload's
/// content key; [`marshal_payload`] relies on this trait to keep that layout
/// independent of the concrete payload type.
pub trait Payload {
    type Content: Serialize;

    /// The event the payload corresponds to.
    fn event(&self) -> &'static str;

    /// The repository where the event occurred.
    fn repository(&self) -> &str;

    /// The content key and value of the payload.
    fn content(&self) -> (&'static str, &Self::Content);
}

/// A payload for a push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    /// The repository where the push occurred.
    pub repository: String,

    /// The commits that were pushed.
    pub commits: Vec<PushPayloadCommit>,
}

/// A commit that is part of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayloadCommit {
    /// The commit ID.
    pub id: String,

    /// The commit message.
    pub message: String,

    /// The targets the commit was pushed to.
    pub target: PushPayloadCommitTarget,
}

/// A target for a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayloadCommitTarget {
    /// The branch the commit was pushed to.
    pub branch: String,

    /// The bookmarks that point at the commit, if any.
    ///
    /// This can only be present for Mercurial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmarks: Option<Vec<String>>,

    /// The tags that point at the commit, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Payload for PushPayload {
    type Content = Vec<PushPayloadCommit>;

    fn event(&self) -> &'static str {
        PUSH_EVENT
    }

    fn repository(&self) -> &str {
        &self.repository
    }

    fn content(&self) -> (&'static str, &Self::Content) {
        ("commits", &self.commits)
    }
}

struct Wire<'a, P: Payload>(&'a P);

impl<P: Payload> Serialize for Wire<'_, P> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (key, content) = self.0.content();

        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("event", self.0.event())?;
        map.serialize_entry("repository", self.0.repository())?;
        map.serialize_entry(key, content)?;
        map.end()
    }
}

/// Serialize a payload into its wire form.
///
/// The output is tab-indented JSON with a trailing newline; consumers verify
/// the payload against an HMAC signature, so the byte layout is part of the
/// contract.
pub fn marshal_payload<P: Payload>(payload: &P) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);

    Wire(payload).serialize(&mut serializer)?;
    buf.push(b'\n');

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_event() {
        assert!(is_valid_event("push"));
        assert!(!is_valid_event("pull"));
        assert!(!is_valid_event(""));
    }

    #[test]
    fn test_marshal_push_payload() {
        let payload = PushPayload {
            repository: "foo".into(),
            commits: vec![
                PushPayloadCommit {
                    id: "abababab".into(),
                    message: "Commit message 1".into(),
                    target: PushPayloadCommitTarget {
                        branch: "master".into(),
                        bookmarks: None,
                        tags: Some(vec!["v1".into()]),
                    },
                },
                PushPayloadCommit {
                    id: "cdcdcdcd".into(),
                    message: "Commit message 2".into(),
                    target: PushPayloadCommitTarget {
                        branch: "dev".into(),
                        bookmarks: None,
                        tags: None,
                    },
                },
                PushPayloadCommit {
                    id: "efefefef".into(),
                    message: "Commit message 3".into(),
                    target: PushPayloadCommitTarget {
                        branch: "default".into(),
                        bookmarks: Some(vec!["my-bookmark".into()]),
                        tags: Some(vec!["dev".into(), "foo".into()]),
                    },
                },
            ],
        };

        let expected = "{
\t\"event\": \"push\",
\t\"repository\": \"foo\",
\t\"commits\": [
\t\t{
\t\t\t\"id\": \"abababab\",
\t\t\t\"message\": \"Commit message 1\",
\t\t\t\"target\": {
\t\t\t\t\"branch\": \"master\",
\t\t\t\t\"tags\": [
\t\t\t\t\t\"v1\"
\t\t\t\t]
\t\t\t}
\t\t},
\t\t{
\t\t\t\"id\": \"cdcdcdcd\",
\t\t\t\"message\": \"Commit message 2\",
\t\t\t\"target\": {
\t\t\t\t\"branch\": \"dev\"
\t\t\t}
\t\t},
\t\t{
\t\t\t\"id\": \"efefefef\",
\t\t\t\"message\": \"Commit message 3\",
\t\t\t\"target\": {
\t\t\t\t\"branch\": \"default\",
\t\t\t\t\"bookmarks\": [
\t\t\t\t\t\"my-bookmark\"
\t\t\t\t],
\t\t\t\t\"tags\": [
\t\t\t\t\t\"dev\",
\t\t\t\t\t\"foo\"
\t\t\t\t]
\t\t\t}
\t\t}
\t]
}
";

        let raw = marshal_payload(&payload).unwrap();
        assert_eq!(expected, String::from_utf8(raw).unwrap());
    }
}
