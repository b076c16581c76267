//! Repository checkout inside the helper container

use crate::context::BuildContext;
use crate::errors::EngineError;
use crate::remote::{shell, RemoteCommand, RemoteExecutor};

/// Deploy key location inside the helper container
pub const HELPER_KEY_PATH: &str = "/root/.ssh/id_launchpad";

/// Commands fetching an application's source
pub trait GitSource: Send + Sync {
    /// Commands cloning the repository into the work dir at the resolved commit
    fn clone_commands(&self, ctx: &BuildContext) -> Vec<RemoteCommand>;

    /// Command listing the remote ref being deployed
    fn ls_remote_command(&self, ctx: &BuildContext) -> RemoteCommand;
}

/// Plain and deploy-key repositories
#[derive(Debug, Clone, Default)]
pub struct DefaultGitSource;

fn ssh_prefix(ctx: &BuildContext) -> String {
    match ctx.application.git_private_key_path {
        Some(_) => format!(
            "GIT_SSH_COMMAND=\"ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -i {HELPER_KEY_PATH}\" "
        ),
        None => String::new(),
    }
}

fn remote_ref(ctx: &BuildContext) -> String {
    if ctx.flags.is_pull_request() {
        format!("refs/pull/{}/head", ctx.flags.pull_request_id)
    } else {
        format!("refs/heads/{}", ctx.application.git_branch)
    }
}

impl GitSource for DefaultGitSource {
    fn clone_commands(&self, ctx: &BuildContext) -> Vec<RemoteCommand> {
        let app = &ctx.application;
        let helper = &ctx.helper_container;
        let ssh = ssh_prefix(ctx);
        let dir = shell::quote_arg(&ctx.work_dir);
        let mut commands = Vec::new();

        if let Some(key) = &app.git_private_key_path {
            commands.push(
                RemoteCommand::host(format!(
                    "docker exec {helper} mkdir -p /root/.ssh && docker cp {} {helper}:{HELPER_KEY_PATH}",
                    shell::quote_arg(key)
                ))
                .hidden(),
            );
            commands.push(
                RemoteCommand::helper(helper, format!("chmod 600 {HELPER_KEY_PATH}")).hidden(),
            );
        }

        commands.push(RemoteCommand::helper(
            helper,
            format!(
                "{ssh}git clone -q -b {} {} {dir}",
                shell::quote_arg(&app.git_branch),
                shell::quote_arg(&app.git_repository)
            ),
        ));

        if ctx.flags.is_pull_request() {
            let id = ctx.flags.pull_request_id;
            commands.push(RemoteCommand::helper(
                helper,
                format!("cd {dir} && {ssh}git fetch -q origin pull/{id}/head:pr-{id} && git checkout -q pr-{id}"),
            ));
        }

        if ctx.commit != "HEAD" {
            commands.push(RemoteCommand::helper(
                helper,
                format!(
                    "cd {dir} && git -c advice.detachedHead=false checkout -q {}",
                    shell::quote_arg(&ctx.commit)
                ),
            ));
        }

        commands.push(RemoteCommand::helper(
            helper,
            format!(
                "cd {dir} && if [ -f .gitmodules ]; then {ssh}git submodule update --init --recursive -q; fi"
            ),
        ));
        commands
    }

    fn ls_remote_command(&self, ctx: &BuildContext) -> RemoteCommand {
        RemoteCommand::helper(
            &ctx.helper_container,
            format!(
                "{}git ls-remote {} {}",
                ssh_prefix(ctx),
                shell::quote_arg(&ctx.application.git_repository),
                shell::quote_arg(&remote_ref(ctx))
            ),
        )
        .hidden()
    }
}

/// First 40 character hex SHA followed by a tab
pub fn extract_commit_sha(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (sha, _) = line.trim_start().split_once('\t')?;
        let valid = sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit());
        valid.then(|| sha.to_string())
    })
}

fn git_error(e: EngineError) -> EngineError {
    match e {
        EngineError::Cancelled => EngineError::Cancelled,
        e => EngineError::GitError(e.to_string()),
    }
}

/// Resolve `HEAD` to a SHA: the application's pinned commit, else the remote ref
pub async fn resolve_commit(
    source: &dyn GitSource,
    ctx: &mut BuildContext,
    executor: &RemoteExecutor,
) -> Result<(), EngineError> {
    if ctx.commit == "HEAD" && ctx.application.git_commit_sha != "HEAD" && !ctx.flags.is_pull_request()
    {
        ctx.commit = ctx.application.git_commit_sha.clone();
    }
    if ctx.commit != "HEAD" {
        return Ok(());
    }

    let output = executor
        .run_one(source.ls_remote_command(ctx))
        .await
        .map_err(git_error)?;
    match extract_commit_sha(&output.stdout) {
        Some(sha) => {
            executor
                .log()
                .debug(format!("Resolved {} to {sha}", remote_ref(ctx)))
                .await;
            ctx.commit = sha;
            Ok(())
        }
        None => {
            executor
                .log()
                .error(format!("Could not find {} in the repository", remote_ref(ctx)))
                .await;
            Err(EngineError::GitError(format!(
                "no commit found for {}",
                remote_ref(ctx)
            )))
        }
    }
}

/// Clone and check out the source; returns the commit message
pub async fn checkout(
    source: &dyn GitSource,
    ctx: &BuildContext,
    executor: &RemoteExecutor,
) -> Result<Option<String>, EngineError> {
    executor
        .log()
        .info(format!(
            "Importing {}:{} (commit {})",
            ctx.application.git_repository, ctx.application.git_branch, ctx.commit
        ))
        .await;
    executor
        .run(source.clone_commands(ctx))
        .await
        .map_err(git_error)?;

    let output = executor
        .run_one(
            RemoteCommand::helper(
                &ctx.helper_container,
                format!(
                    "cd {} && git log -1 --pretty=%B",
                    shell::quote_arg(&ctx.work_dir)
                ),
            )
            .hidden()
            .ignore_errors(),
        )
        .await?;
    let message = output.stdout_trimmed();
    Ok((output.success() && !message.is_empty()).then(|| message.to_string()))
}
