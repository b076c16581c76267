//! Connection abstraction to deployment hosts

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use platform_models::{LogStream, Server};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::EngineError;

/// A line of command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: LogStream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stderr,
            text: text.into(),
        }
    }
}

/// Runs a shell script on a host, streaming its output line by line
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute `script` on `host` and return its exit code.
    ///
    /// Output lines are sent on `lines` as they are produced. The sender is
    /// dropped when the command finishes.
    async fn exec(
        &self,
        host: &Server,
        script: &str,
        lines: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<i32, EngineError>;
}

/// SSH client options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Default private key, overridden per server
    pub private_key_path: Option<PathBuf>,

    pub connect_timeout: Duration,

    pub server_alive_interval: Duration,

    /// Directory for multiplexed control sockets, disabled when absent
    pub mux_dir: Option<PathBuf>,

    pub mux_persist: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            private_key_path: None,
            connect_timeout: Duration::from_secs(10),
            server_alive_interval: Duration::from_secs(20),
            mux_dir: Some(PathBuf::from("/tmp")),
            mux_persist: Duration::from_secs(3600),
        }
    }
}

/// Transport shelling out to `ssh`, or to a local `bash` for local servers
pub struct ShellTransport {
    options: SshOptions,
}

impl ShellTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Program and arguments used to reach `host`
    pub fn argv(&self, host: &Server) -> Vec<String> {
        if host.is_local {
            return vec!["bash".to_string(), "-se".to_string()];
        }

        let mut argv = vec!["ssh".to_string()];
        let key = host
            .private_key_path
            .clone()
            .map(PathBuf::from)
            .or_else(|| self.options.private_key_path.clone());
        if let Some(key) = key {
            argv.push("-i".to_string());
            argv.push(key.display().to_string());
        }

        let mut opts = vec![
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "PasswordAuthentication=no".to_string(),
            "RequestTTY=no".to_string(),
            "LogLevel=ERROR".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs()),
            format!(
                "ServerAliveInterval={}",
                self.options.server_alive_interval.as_secs()
            ),
        ];
        if let Some(dir) = &self.options.mux_dir {
            opts.push("ControlMaster=auto".to_string());
            opts.push(format!("ControlPath={}/mux_%h_%p_%r", dir.display()));
            opts.push(format!("ControlPersist={}", self.options.mux_persist.as_secs()));
        }
        for opt in opts {
            argv.push("-o".to_string());
            argv.push(opt);
        }

        argv.push("-p".to_string());
        argv.push(host.port.to_string());
        argv.push(format!("{}@{}", host.user, host.ip));
        argv.push("bash -se".to_string());
        argv
    }
}

async fn forward_lines<R>(reader: R, stream: LogStream, lines: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader).lines();
    while let Ok(Some(text)) = reader.next_line().await {
        if lines.send(OutputLine { stream, text }).is_err() {
            break;
        }
    }
}

#[async_trait]
impl Transport for ShellTransport {
    async fn exec(
        &self,
        host: &Server,
        script: &str,
        lines: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<i32, EngineError> {
        let argv = self.argv(host);
        debug!("Executing on {} ({} bytes of script)", host.name, script.len());

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Internal("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Internal("stderr not captured".to_string()))?;

        futures::future::join(
            forward_lines(stdout, LogStream::Stdout, lines.clone()),
            forward_lines(stderr, LogStream::Stderr, lines),
        )
        .await;

        let status = child.wait().await?;
        // Killed by a signal, report like the shell does
        Ok(status.code().unwrap_or(255))
    }
}
