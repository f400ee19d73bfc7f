//! Shell scripts run for a build.
//!
//! A build script is the concatenation of three segments, in this order:
//!
//! 1. bootstrap: `set -e` and the configured environment
//! 2. checkout: shallow clone of the repository at the build's commit
//! 3. invocation: source the repository's CI script if it exists
//!
//! The cleanup script empties the workspace afterwards. Every value taken
//! from configuration or from a webhook is single-quoted before it reaches
//! the shell.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;
use tinderbox_core::Build;

/// Directory inside the workspace the repository is cloned into.
pub const CHECKOUT_DIR: &str = "repo";

/// Name of the script file written into the workspace.
pub const SCRIPT_FILE: &str = "run";

/// Build-independent inputs to the build script.
#[derive(Debug, Clone, Default)]
pub struct ScriptConfig {
    /// Exported before anything else runs, in key order.
    pub env: BTreeMap<String, String>,
    /// CI script path relative to the repository root.
    pub ci_script: String,
}

/// Quote `value` for POSIX sh.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Compose the script that checks out and builds `build` in `workspace`.
pub fn build_script(config: &ScriptConfig, workspace: &Path, build: &Build) -> String {
    let mut script = String::from("#!/bin/sh\n");
    bootstrap(&mut script, config);
    checkout(&mut script, workspace, build);
    invocation(&mut script, config);
    script
}

/// Compose the script that empties `workspace`, hidden files included.
pub fn cleanup_script(workspace: &Path) -> String {
    let dir = shell_quote(&workspace.to_string_lossy());
    format!("#!/bin/sh\nrm -rf {dir}/* {dir}/.[!.]* {dir}/..?*\n")
}

fn bootstrap(script: &mut String, config: &ScriptConfig) {
    script.push_str("set -e\n");
    for (key, value) in &config.env {
        let _ = writeln!(script, "export {}={}", key, shell_quote(value));
    }
}

fn checkout(script: &mut String, workspace: &Path, build: &Build) {
    let _ = writeln!(script, "cd {}", shell_quote(&workspace.to_string_lossy()));
    let _ = writeln!(
        script,
        "git clone --depth 1 {} {}",
        shell_quote(&build.clone_url),
        CHECKOUT_DIR
    );
    let _ = writeln!(script, "cd {}", CHECKOUT_DIR);
    let _ = writeln!(script, "git fetch origin {}", shell_quote(&build.ref_name));
    let _ = writeln!(script, "git checkout -qf {}", shell_quote(&build.commit_sha));
}

fn invocation(script: &mut String, config: &ScriptConfig) {
    let file = shell_quote(&config.ci_script);
    let missing = shell_quote(&format!(
        "{} not found, it seems the ci script is not configured.",
        config.ci_script
    ));
    let _ = writeln!(script, "if [ -f {file} ]; then");
    let _ = writeln!(script, "    . {file}");
    let _ = writeln!(script, "else");
    let _ = writeln!(script, "    echo {missing}");
    let _ = writeln!(script, "fi");
}
