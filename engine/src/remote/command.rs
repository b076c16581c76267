//! Remote command model

use crate::remote::shell;

/// Where a command runs on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTarget {
    /// Directly in the host shell
    Host,
    /// Inside the named helper container
    Helper(String),
}

/// A single command line to run on a deployment host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    command: String,
    hidden: bool,
    ignore_errors: bool,
    target: CommandTarget,
}

impl RemoteCommand {
    /// Command run in the host shell
    pub fn host(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            hidden: false,
            ignore_errors: false,
            target: CommandTarget::Host,
        }
    }

    /// Command run inside a helper container
    pub fn helper(container: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            hidden: false,
            ignore_errors: false,
            target: CommandTarget::Helper(container.into()),
        }
    }

    /// Keep the command and its output out of the public log
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Do not fail the deployment on a non-zero exit code
    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn ignores_errors(&self) -> bool {
        self.ignore_errors
    }

    pub fn target(&self) -> &CommandTarget {
        &self.target
    }

    /// Script handed to the transport
    pub fn script(&self) -> String {
        match &self.target {
            CommandTarget::Host => self.command.clone(),
            CommandTarget::Helper(container) => format!(
                "docker exec {} bash -c {}",
                shell::quote_arg(container),
                shell::quote(&self.command)
            ),
        }
    }
}

/// Captured result of a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Last `n` lines of stderr, for error messages
    pub fn stderr_tail(&self, n: usize) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}
