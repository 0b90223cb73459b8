//! Build script for AutoGLM UI
//!
//! Embeds the git revision, build time, target and profile so that
//! `autoglm-ui version` can report them.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash =
        git(&["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let git_dirty = git(&["status", "--porcelain"])
        .map(|out| (!out.is_empty()).to_string())
        .unwrap_or_else(|| "false".to_string());
    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    println!("cargo:rustc-env=AUTOGLM_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=AUTOGLM_GIT_DIRTY={}", git_dirty);
    println!("cargo:rustc-env=AUTOGLM_BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=AUTOGLM_TARGET={}", env_or_unknown("TARGET"));
    println!("cargo:rustc-env=AUTOGLM_PROFILE={}", env_or_unknown("PROFILE"));
}

/// Run git and return trimmed stdout on success
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

fn env_or_unknown(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| "unknown".to_string())
}
