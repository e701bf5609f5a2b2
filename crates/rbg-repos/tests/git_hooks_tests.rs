// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tests for installing webhook trigger scripts into Git repositories.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;

use rbg_repos::{GitRepository, Repository, RepositoryInfo};

fn check_git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn setup_repo() -> (TempDir, PathBuf, GitRepository) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("repo");
    fs::create_dir(&path).unwrap();

    let status = Command::new("git")
        .args(["init", "-b", "master"])
        .current_dir(&path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(status.success());

    let repo = GitRepository::new(RepositoryInfo {
        name: "repo".to_string(),
        path: path.clone(),
    });

    (dir, path, repo)
}

fn hook_paths(path: &Path) -> (PathBuf, PathBuf) {
    let hooks = path.join(".git").join("hooks");

    (
        hooks.join("post-receive"),
        hooks.join("post-receive.d").join("99-rbgateway-push.sh"),
    )
}

#[test]
fn test_install_hooks() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, path, repo) = setup_repo();

    repo.install_hooks(Path::new("/etc/rb-gateway/config.json"), false)
        .unwrap();

    let (dispatch_path, script_path) = hook_paths(&path);

    assert!(dispatch_path.exists());
    assert!(script_path.exists());

    // Both scripts must be executable.
    for p in [&dispatch_path, &script_path] {
        let mode = fs::metadata(p).unwrap().permissions().mode();
        assert_eq!(mode & 0o700, 0o700, "{} is not executable", p.display());
    }

    let script = fs::read_to_string(&script_path).unwrap();
    assert!(script.starts_with("#!/bin/bash\n"));
    assert!(script.contains("--config /etc/rb-gateway/config.json"));
    assert!(script.contains("trigger-webhooks repo push"));

    let dispatch = fs::read_to_string(&dispatch_path).unwrap();
    assert!(dispatch.contains("post-receive.d"));
}

#[test]
fn test_install_hooks_idempotent() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, path, repo) = setup_repo();
    let cfg = Path::new("/etc/rb-gateway/config.json");

    repo.install_hooks(cfg, false).unwrap();

    let (dispatch_path, script_path) = hook_paths(&path);
    let dispatch_before = fs::read_to_string(&dispatch_path).unwrap();
    let script_before = fs::read_to_string(&script_path).unwrap();

    repo.install_hooks(cfg, false).unwrap();

    assert_eq!(fs::read_to_string(&dispatch_path).unwrap(), dispatch_before);
    assert_eq!(fs::read_to_string(&script_path).unwrap(), script_before);
}

#[test]
fn test_install_hooks_force_overwrites() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, path, repo) = setup_repo();
    let (_, script_path) = hook_paths(&path);

    repo.install_hooks(Path::new("/old/config.json"), false).unwrap();

    // Without force the stale script stays; with force it is rewritten.
    repo.install_hooks(Path::new("/new/config.json"), false).unwrap();
    assert!(fs::read_to_string(&script_path)
        .unwrap()
        .contains("/old/config.json"));

    repo.install_hooks(Path::new("/new/config.json"), true).unwrap();
    assert!(fs::read_to_string(&script_path)
        .unwrap()
        .contains("/new/config.json"));
}

#[test]
fn test_install_hooks_preserves_existing_hook() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, path, repo) = setup_repo();

    let hooks_dir = path.join(".git").join("hooks");
    fs::create_dir_all(&hooks_dir).unwrap();

    let original = "#!/bin/sh\necho original\n";
    fs::write(hooks_dir.join("post-receive"), original).unwrap();

    repo.install_hooks(Path::new("/etc/rb-gateway/config.json"), false)
        .unwrap();

    let preserved = hooks_dir.join("post-receive.d").join("00-original-post-receive");
    assert_eq!(fs::read_to_string(&preserved).unwrap(), original);

    // The dispatcher took the original's place.
    let dispatch = fs::read_to_string(hooks_dir.join("post-receive")).unwrap();
    assert!(dispatch.contains("post-receive.d"));
}

#[test]
fn test_install_hooks_quotes_paths() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, path, repo) = setup_repo();

    repo.install_hooks(Path::new("/etc/rb gateway/my config.json"), false)
        .unwrap();

    let (_, script_path) = hook_paths(&path);
    let script = fs::read_to_string(&script_path).unwrap();

    assert!(script.contains("'/etc/rb gateway/my config.json'"));
}
