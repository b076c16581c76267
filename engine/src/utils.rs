//! Utility functions

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Version information for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

fn report(name: &str, result: Result<String, String>) -> bool {
    match result {
        Ok(detail) => {
            println!("{} {} {}", "✓".green(), name.bold(), detail.dimmed());
            true
        }
        Err(detail) => {
            println!("{} {} {}", "✗".red(), name.bold(), detail);
            false
        }
    }
}

async fn program_version(program: &str, args: &[&str]) -> Result<String, String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("not available: {e}"))?;
    // ssh -V prints to stderr
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).to_string()
    };
    if output.status.success() {
        Ok(text.trim().to_string())
    } else {
        Err(text.trim().to_string())
    }
}

/// Check the local prerequisites of the engine; returns whether all passed
pub async fn run_diagnostic(layout: &StorageLayout) -> bool {
    println!("{}", "Launchpad diagnostics".bold());
    let version = version_info();
    println!("version {} ({}, built {})", version.version, version.git_hash, version.build_time);

    let settings_file = layout.settings_file();
    let settings = if settings_file.exists().await {
        settings_file.read_json::<Settings>().await.map(|_| {
            format!("{}", settings_file.path().display())
        })
    } else {
        Ok(format!("{} missing, defaults apply", settings_file.path().display()))
    };

    let mut ok = report("settings", settings.map_err(|e| e.to_string()));
    ok &= report("ssh", program_version("ssh", &["-V"]).await);
    ok &= report("docker", program_version("docker", &["--version"]).await);
    ok
}
