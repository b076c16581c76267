//! Embeds the commit and build time reported by `--version` and `/version`

use chrono::{DateTime, Utc};
use std::process::Command;

fn git_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    Some(hash.trim().to_string())
}

/// Honors SOURCE_DATE_EPOCH for reproducible builds
fn build_time() -> DateTime<Utc> {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|epoch| epoch.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

fn main() {
    let git_hash = std::env::var("LAUNCHPAD_GIT_HASH")
        .ok()
        .or_else(git_hash)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={git_hash}");
    println!(
        "cargo:rustc-env=BUILD_TIME={}",
        build_time().format("%Y-%m-%d %H:%M:%S UTC")
    );

    println!("cargo:rerun-if-env-changed=LAUNCHPAD_GIT_HASH");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
