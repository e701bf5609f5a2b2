// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Installation of webhook trigger scripts into Git hook directories.
//!
//! Two files are written per event: a dispatch script at
//! `<common_dir>/hooks/<hook>` that runs every executable in `<hook>.d/`,
//! and `<hook>.d/99-rbgateway-<event>.sh` which invokes
//! `rb-gateway trigger-webhooks`. A pre-existing hook is preserved as
//! `<hook>.d/00-original-<hook>` so its behavior survives the install.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::warn;

use crate::error::RepositoryResult;
use crate::events::PUSH_EVENT;
use crate::git::GitRepository;
use crate::util::{ensure_dir, exe_path};
use crate::Repository;

/// The Git hook name for each supported event.
const GIT_EVENTS: &[(&str, &str)] = &[(PUSH_EVENT, "post-receive")];

struct HookData {
    config_path: String,
    event: String,
    exe_path: String,
    hook_name: String,
    repository: String,
}

fn dispatch_script(hook_name: &str) -> String {
    format!(
        r#"#!/bin/bash
# Run hooks in .git/hooks/{hook_name}.d
# This file was installed by rb-gateway.

HOOK_DIR=$(dirname $0)/{hook_name}.d

EXIT=0

if [ -d "$HOOK_DIR" ]; then
	STDIN=$(cat /dev/stdin)
	for HOOK in ${{HOOK_DIR}}/*; do
		if [ -x "$HOOK" ]; then
			echo -n "$STDIN" | "$HOOK" "$@"
		fi
	done
	LAST_EXIT=$?
	if [ $LAST_EXIT != 0 ]; then
		EXIT=$LAST_EXIT
	fi
fi

exit $EXIT
"#
    )
}

fn trigger_script(data: &HookData) -> String {
    format!(
        "#!/bin/bash\nexec {} --config {} trigger-webhooks {} {}\n",
        data.exe_path, data.config_path, data.repository, data.event
    )
}

/// Install hooks for every supported event into the repository.
pub(crate) fn install_hooks(
    repo: &GitRepository,
    config_path: &Path,
    force: bool,
) -> RepositoryResult<()> {
    let git_repo = git2::Repository::open(repo.path())?;
    let hook_dir = git_repo.commondir().join("hooks");

    ensure_dir(&hook_dir)?;

    let exe = exe_path()?;

    for &(event, hook_name) in GIT_EVENTS {
        let data = HookData {
            config_path: shell_words::quote(&config_path.to_string_lossy()).into_owned(),
            event: shell_words::quote(event).into_owned(),
            exe_path: shell_words::quote(&exe.to_string_lossy()).into_owned(),
            hook_name: shell_words::quote(hook_name).into_owned(),
            repository: shell_words::quote(repo.name()).into_owned(),
        };

        install_hook(&hook_dir, event, hook_name, &data, force)?;
    }

    Ok(())
}

/// Install the dispatch script and trigger script for a single hook.
fn install_hook(
    hook_dir: &Path,
    event: &str,
    hook_name: &str,
    data: &HookData,
    force: bool,
) -> RepositoryResult<()> {
    let dispatch_path = hook_dir.join(hook_name);
    let script_dir = hook_dir.join(format!("{}.d", hook_name));
    let script_path = script_dir.join(format!("99-rbgateway-{}.sh", event));

    let created = ensure_dir(&script_dir)?;
    let renamed_path = script_dir.join(format!("00-original-{}", hook_name));

    // If there is an existing hook, move it into the script dir so that it
    // still executes after our dispatcher takes its place.
    let moved_original = created && dispatch_path.exists();
    if moved_original {
        std::fs::rename(&dispatch_path, &renamed_path)?;
    }

    let result = write_hook_scripts(&dispatch_path, &script_path, data, force);

    if result.is_err() && moved_original {
        warn!(hook = hook_name, "Restoring filesystem to original state for hook");

        if let Err(err) = std::fs::rename(&renamed_path, &dispatch_path) {
            warn!("Could not restore filesystem after error: {}", err);
        }
    }

    result
}

fn write_hook_scripts(
    dispatch_path: &Path,
    script_path: &Path,
    data: &HookData,
    force: bool,
) -> RepositoryResult<()> {
    if force || !script_path.exists() {
        write_executable(script_path, &trigger_script(data))?;
    }

    if force || !dispatch_path.exists() {
        write_executable(dispatch_path, &dispatch_script(&data.hook_name))?;
    }

    Ok(())
}

fn write_executable(path: &Path, content: &str) -> RepositoryResult<()> {
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o700)
        .open(path)?;

    f.write_all(content.as_bytes())?;

    Ok(())
}
