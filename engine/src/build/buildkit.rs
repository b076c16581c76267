//! BuildKit capability probe

use crate::errors::EngineError;
use crate::remote::{RemoteCommand, RemoteExecutor};

/// Oldest docker server with `RUN --mount=type=secret`
const MIN_VERSION: (u32, u32) = (18, 9);

/// Parse `major.minor` of a docker server version such as `24.0.7`
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()
        .map(|m| {
            m.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
        })
        .and_then(|m| m.parse().ok())
        .unwrap_or(0);
    Some((major, minor))
}

pub fn supports_secrets(version: &str) -> bool {
    parse_version(version)
        .map(|v| v >= MIN_VERSION)
        .unwrap_or(false)
}

/// Probe the builder inside the helper container.
///
/// Any failure disables BuildKit; only cancellation is returned as an error.
pub async fn probe(executor: &RemoteExecutor, helper: &str) -> Result<bool, EngineError> {
    let version = match executor
        .run_one(
            RemoteCommand::helper(helper, "docker version --format '{{.Server.Version}}'")
                .hidden()
                .ignore_errors(),
        )
        .await
    {
        Ok(output) if output.success() => output.stdout_trimmed().to_string(),
        Ok(_) => {
            executor
                .log()
                .debug("Could not read the docker server version, BuildKit disabled")
                .await;
            return Ok(false);
        }
        Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
        Err(e) => {
            executor
                .log()
                .debug(format!("BuildKit probe failed: {e}"))
                .await;
            return Ok(false);
        }
    };

    if !supports_secrets(&version) {
        executor
            .log()
            .debug(format!(
                "Docker {version} does not support build secrets, falling back to build arguments"
            ))
            .await;
        return Ok(false);
    }

    let help = match executor
        .run_one(
            RemoteCommand::helper(helper, "docker build --help 2>&1")
                .hidden()
                .ignore_errors(),
        )
        .await
    {
        Ok(output) => output.stdout,
        Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
        Err(e) => {
            executor
                .log()
                .debug(format!("BuildKit probe failed: {e}"))
                .await;
            return Ok(false);
        }
    };

    let supported = help.contains("--secret");
    executor
        .log()
        .debug(if supported {
            "BuildKit with build secrets detected"
        } else {
            "docker build has no --secret flag, falling back to build arguments"
        })
        .await;
    Ok(supported)
}
