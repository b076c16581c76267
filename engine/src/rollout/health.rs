//! Container health polling

use std::time::Duration;

use serde::Deserialize;

use crate::context::BuildContext;
use crate::errors::EngineError;
use crate::remote::{shell, RemoteCommand, RemoteExecutor};

/// Wait before the single status check of a container without healthcheck
pub const UNCHECKED_GRACE: Duration = Duration::from_secs(5);

/// Container log lines shown when a container fails
pub const FAILURE_LOG_LINES: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthState {
    status: String,
    #[serde(default)]
    log: Option<Vec<HealthProbe>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthProbe {
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    output: String,
}

/// Result of waiting for a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy,
    Unhealthy(String),
}

/// Parsed `.State.Health`: status and the last probe output
pub fn parse_health(raw: &str) -> Option<(String, Option<String>)> {
    let state: HealthState = serde_json::from_str(raw.trim()).ok()?;
    let last = state
        .log
        .as_ref()
        .and_then(|log| log.last())
        .map(|probe| format!("exit {}: {}", probe.exit_code, probe.output.trim()));
    Some((state.status, last))
}

async fn show_container_logs(executor: &RemoteExecutor, container: &str) -> Result<(), EngineError> {
    executor
        .log()
        .info(format!("Last {FAILURE_LOG_LINES} log lines of {container}:"))
        .await;
    executor
        .run_one(
            RemoteCommand::host(format!(
                "docker logs -n {FAILURE_LOG_LINES} {} 2>&1",
                shell::quote_arg(container)
            ))
            .ignore_errors(),
        )
        .await?;
    Ok(())
}

/// Whether docker reports health for the container at all
pub fn health_reported(ctx: &BuildContext) -> bool {
    ctx.custom_healthcheck || ctx.healthcheck_enabled()
}

/// Wait for `container` to become healthy.
///
/// Errors are reserved for cancellation and transport failures, an unhealthy
/// container is an [`HealthOutcome::Unhealthy`].
pub async fn wait_healthy(
    ctx: &BuildContext,
    executor: &RemoteExecutor,
    container: &str,
) -> Result<HealthOutcome, EngineError> {
    if !health_reported(ctx) {
        return check_running(executor, container).await;
    }

    let hc = &ctx.application.health_check;
    executor
        .log()
        .info(format!(
            "Waiting for the healthcheck of {container} ({}s start period, {} retries every {}s)",
            hc.start_period, hc.retries, hc.interval
        ))
        .await;
    executor.sleep(Duration::from_secs(hc.start_period)).await?;

    let retries = hc.retries.max(1);
    for attempt in 1..=retries {
        let output = executor
            .run_one(
                RemoteCommand::host(format!(
                    "docker inspect --format '{{{{json .State.Health}}}}' {}",
                    shell::quote_arg(container)
                ))
                .hidden()
                .ignore_errors(),
            )
            .await?;

        let (status, last_probe) =
            parse_health(&output.stdout).unwrap_or_else(|| ("unknown".to_string(), None));
        executor
            .log()
            .info(format!(
                "Attempt {attempt} of {retries} | Healthcheck status: {status}"
            ))
            .await;
        if let Some(probe) = &last_probe {
            executor.log().debug(format!("Healthcheck probe: {probe}")).await;
        }

        match status.as_str() {
            "healthy" => return Ok(HealthOutcome::Healthy),
            "unhealthy" => {
                show_container_logs(executor, container).await?;
                return Ok(HealthOutcome::Unhealthy(format!(
                    "{container} is unhealthy{}",
                    last_probe.map(|p| format!(" ({p})")).unwrap_or_default()
                )));
            }
            _ => {}
        }

        if attempt < retries {
            executor.sleep(Duration::from_secs(hc.interval)).await?;
        }
    }

    show_container_logs(executor, container).await?;
    Ok(HealthOutcome::Unhealthy(format!(
        "{container} did not become healthy after {retries} attempts"
    )))
}

async fn check_running(
    executor: &RemoteExecutor,
    container: &str,
) -> Result<HealthOutcome, EngineError> {
    executor
        .log()
        .info("Healthcheck is disabled, checking that the container keeps running")
        .await;
    executor.sleep(UNCHECKED_GRACE).await?;

    let output = executor
        .run_one(
            RemoteCommand::host(format!(
                "docker inspect --format '{{{{.State.Status}}}}:{{{{.State.Restarting}}}}' {}",
                shell::quote_arg(container)
            ))
            .hidden()
            .ignore_errors(),
        )
        .await?;
    if output.stdout_trimmed() == "running:false" {
        return Ok(HealthOutcome::Healthy);
    }

    show_container_logs(executor, container).await?;
    Ok(HealthOutcome::Unhealthy(format!(
        "{container} is not running ({})",
        output.stdout_trimmed()
    )))
}
