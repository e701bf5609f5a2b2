// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! A minimal client for the Mercurial command server.
//!
//! The client spawns `hg serve --cmdserver pipe` against a repository and
//! speaks the pipe framing: each message is a one-byte channel identifier
//! followed by a big-endian u32 length. Command output arrives on the `o`
//! and `e` channels; the `r` channel carries the exit code.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::error::{RepositoryError, RepositoryResult};

const HG_BIN: &str = "hg";

pub(crate) struct HgClient {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl HgClient {
    /// Spawn a command server for the repository and consume its hello
    /// message.
    pub fn connect(repo_path: &Path) -> RepositoryResult<Self> {
        let mut child = Command::new(HG_BIN)
            .arg("serve")
            .arg("--cmdserver")
            .arg("pipe")
            .arg("-R")
            .arg(repo_path)
            .arg("--config")
            .arg("ui.interactive=False")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().expect("hg stdin is piped");
        let stdout = child.stdout.take().expect("hg stdout is piped");

        let mut client = Self {
            child,
            stdin,
            stdout,
        };

        let (channel, hello) = client.read_message()?;
        if channel != b'o' {
            return Err(RepositoryError::Scm(format!(
                "Unexpected hello channel '{}' from hg command server",
                channel as char
            )));
        }

        let hello = String::from_utf8_lossy(&hello);
        if !hello.contains("runcommand") {
            return Err(RepositoryError::Scm(
                "hg command server does not support runcommand".to_string(),
            ));
        }

        Ok(client)
    }

    /// Run an hg command, returning its stdout.
    ///
    /// A non-zero exit code is surfaced as an error carrying the command's
    /// stderr.
    pub fn run(&mut self, args: &[&str]) -> RepositoryResult<Vec<u8>> {
        let data = args.join("\0");

        self.stdin.write_all(b"runcommand\n")?;
        self.stdin.write_all(&(data.len() as u32).to_be_bytes())?;
        self.stdin.write_all(data.as_bytes())?;
        self.stdin.flush()?;

        let mut out = Vec::new();
        let mut err = Vec::new();

        loop {
            let (channel, body) = self.read_message()?;

            match channel {
                b'o' => out.extend_from_slice(&body),
                b'e' => err.extend_from_slice(&body),
                b'r' => {
                    if body.len() != 4 {
                        return Err(RepositoryError::Scm(
                            "Malformed result from hg command server".to_string(),
                        ));
                    }

                    let code = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);

                    return if code == 0 {
                        Ok(out)
                    } else {
                        Err(RepositoryError::Scm(
                            String::from_utf8_lossy(&err).trim_end().to_string(),
                        ))
                    };
                }

                // Required channels (uppercase) expect input we cannot
                // provide.
                c if c.is_ascii_uppercase() => {
                    return Err(RepositoryError::Scm(format!(
                        "hg command server requested unsupported channel '{}'",
                        c as char
                    )));
                }

                _ => (),
            }
        }
    }

    fn read_message(&mut self) -> RepositoryResult<(u8, Vec<u8>)> {
        let mut header = [0u8; 5];
        self.stdout.read_exact(&mut header)?;

        let channel = header[0];
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

        // Input-request channels carry a length, not a body.
        if channel.is_ascii_uppercase() {
            return Ok((channel, Vec::new()));
        }

        let mut body = vec![0u8; len];
        self.stdout.read_exact(&mut body)?;

        Ok((channel, body))
    }
}

impl Drop for HgClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
