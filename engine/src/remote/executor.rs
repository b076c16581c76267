//! Sequential command execution on one host

use std::sync::Arc;
use std::time::Duration;

use platform_models::{LogStream, Server};
use tokio::sync::mpsc;
use tracing::debug;

use crate::deploy::log::DeploymentLog;
use crate::errors::EngineError;
use crate::remote::cancel::CancelSignal;
use crate::remote::command::{CommandOutput, RemoteCommand};
use crate::remote::transport::Transport;

/// Stderr lines kept in a command failure
const STDERR_TAIL_LINES: usize = 20;

/// Runs commands on a host, streaming their output into a deployment log
#[derive(Clone)]
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
    host: Server,
    log: Arc<DeploymentLog>,
    cancel: CancelSignal,
}

impl RemoteExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        host: Server,
        log: Arc<DeploymentLog>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            transport,
            host,
            log,
            cancel,
        }
    }

    /// Same log and cancellation, different host
    pub fn for_host(&self, host: Server) -> Self {
        Self {
            host,
            ..self.clone()
        }
    }

    /// Same host and log, no longer cancellable; for cleanup after a cancel
    pub fn detached(&self) -> Self {
        Self {
            cancel: CancelSignal::new(),
            ..self.clone()
        }
    }

    pub fn host(&self) -> &Server {
        &self.host
    }

    pub fn log(&self) -> &Arc<DeploymentLog> {
        &self.log
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Run commands in order, stopping at the first failure
    pub async fn run(
        &self,
        commands: Vec<RemoteCommand>,
    ) -> Result<Vec<CommandOutput>, EngineError> {
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            outputs.push(self.run_one(command).await?);
        }
        Ok(outputs)
    }

    /// Run a single command and return its captured output
    pub async fn run_one(&self, command: RemoteCommand) -> Result<CommandOutput, EngineError> {
        self.cancel.check()?;

        self.log
            .add(format!("[CMD]: {}", command.command()), LogStream::Stdout, true)
            .await;

        let script = command.script();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hidden = command.is_hidden();
        let log = self.log.clone();

        let exec = self.transport.exec(&self.host, &script, tx);
        let collect = async move {
            let mut output = CommandOutput::default();
            while let Some(line) = rx.recv().await {
                let buf = match line.stream {
                    LogStream::Stdout => &mut output.stdout,
                    LogStream::Stderr => &mut output.stderr,
                };
                buf.push_str(&line.text);
                buf.push('\n');
                log.add(line.text, line.stream, hidden).await;
            }
            output
        };

        let (exit_code, mut output) = tokio::join!(exec, collect);
        output.exit_code = exit_code?;
        debug!(
            host = %self.host.name,
            exit_code = output.exit_code,
            "Command finished"
        );

        if !output.success() && !command.ignores_errors() {
            let stderr = match output.stderr_tail(STDERR_TAIL_LINES) {
                tail if tail.is_empty() => output.stdout_trimmed().to_string(),
                tail => tail,
            };
            return Err(EngineError::RemoteCommand {
                exit_code: output.exit_code,
                stderr,
            });
        }
        Ok(output)
    }

    /// Cancellable sleep
    pub async fn sleep(&self, duration: Duration) -> Result<(), EngineError> {
        self.cancel.sleep(duration).await
    }
}
