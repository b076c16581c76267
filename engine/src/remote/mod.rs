//! Remote command execution on deployment hosts

pub mod cancel;
pub mod command;
pub mod executor;
pub mod shell;
pub mod transport;

pub use cancel::CancelSignal;
pub use command::{CommandOutput, CommandTarget, RemoteCommand};
pub use executor::RemoteExecutor;
pub use transport::{OutputLine, ShellTransport, SshOptions, Transport};
