//! Dockerfile build pack and Dockerfile mutations

use std::collections::HashSet;

use async_trait::async_trait;

use crate::build::{dockerfile_build, read_helper_file, BuildPlan, BuildStrategy};
use crate::context::BuildContext;
use crate::errors::EngineError;
use crate::remote::RemoteExecutor;

pub const SYNTAX_DIRECTIVE: &str = "# syntax=docker/dockerfile:1";

/// Rewritten Dockerfile written back before the build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerfileMutation {
    pub path: String,
    pub contents: String,
}

fn instruction(line: &str) -> String {
    line.trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

fn arg_name(line: &str) -> Option<String> {
    if instruction(line) != "ARG" {
        return None;
    }
    let rest = line.trim_start()[3..].trim();
    let name = rest.split(['=', ' ']).next().unwrap_or("");
    (!name.is_empty()).then(|| name.to_string())
}

/// Insert `ARG KEY` after each `FROM` for every key missing from that stage
pub fn inject_build_args(contents: &str, keys: &[String]) -> String {
    let lines: Vec<&str> = contents.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + keys.len());

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        out.push(line.to_string());
        i += 1;
        if instruction(line) != "FROM" {
            continue;
        }

        let stage_end = lines[i..]
            .iter()
            .position(|l| instruction(l) == "FROM")
            .map(|p| i + p)
            .unwrap_or(lines.len());
        let existing: HashSet<String> = lines[i..stage_end]
            .iter()
            .filter_map(|l| arg_name(l))
            .collect();

        for key in keys {
            if !existing.contains(key) {
                out.push(format!("ARG {key}"));
            }
        }
    }

    let mut result = out.join("\n");
    if contents.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Mount every build secret into each `RUN` instruction lacking a mount
pub fn inject_secret_mounts(contents: &str, secret_ids: &[String]) -> String {
    if secret_ids.is_empty() {
        return contents.to_string();
    }
    let mounts = secret_ids
        .iter()
        .map(|id| format!("--mount=type=secret,id={id},env={id}"))
        .collect::<Vec<_>>()
        .join(" ");

    let mut out: Vec<String> = Vec::new();
    let has_syntax = contents
        .lines()
        .next()
        .map(|l| l.trim_start().starts_with("# syntax="))
        .unwrap_or(false);
    if !has_syntax {
        out.push(SYNTAX_DIRECTIVE.to_string());
    }

    for line in contents.lines() {
        if instruction(line) == "RUN" && !line.contains("--mount=") {
            let indent = &line[..line.len() - line.trim_start().len()];
            let rest = line.trim_start()[3..].trim_start();
            out.push(format!("{indent}RUN {mounts} {rest}"));
        } else {
            out.push(line.to_string());
        }
    }

    let mut result = out.join("\n");
    if contents.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Whether the Dockerfile declares its own health check
pub fn has_healthcheck(contents: &str) -> bool {
    contents.lines().any(|line| {
        instruction(line) == "HEALTHCHECK"
            && !line.trim().to_ascii_uppercase().ends_with("NONE")
    })
}

/// Builds the repository's own Dockerfile
pub struct DockerfileStrategy;

impl DockerfileStrategy {
    /// Build into `image` instead of the production image
    pub async fn plan_into(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
        image: &str,
    ) -> Result<BuildPlan, EngineError> {
        let source_dir = ctx.source_dir();
        let path = format!("{}{}", source_dir, ctx.application.dockerfile_location);
        let contents = read_helper_file(ctx, executor, &path)
            .await?
            .ok_or_else(|| EngineError::BuildError(format!("Dockerfile not found at {path}")))?;

        if has_healthcheck(&contents) {
            executor
                .log()
                .info("Custom HEALTHCHECK found in Dockerfile, using it instead of the generated one")
                .await;
            ctx.custom_healthcheck = true;
        }

        Ok(dockerfile_build(ctx, &path, &contents, &source_dir, image))
    }
}

#[async_trait]
impl BuildStrategy for DockerfileStrategy {
    fn name(&self) -> &'static str {
        "dockerfile"
    }

    async fn plan(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<BuildPlan, EngineError> {
        let image = ctx.production_image.clone();
        self.plan_into(ctx, executor, &image).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI_STAGE: &str = "FROM node:20 AS build\nARG API_URL\nRUN npm ci\nFROM nginx:alpine\nCOPY --from=build /app/dist /usr/share/nginx/html\n";

    fn keys() -> Vec<String> {
        vec!["API_URL".to_string(), "NODE_ENV".to_string()]
    }

    #[test]
    fn test_args_injected_per_stage() {
        let out = inject_build_args(MULTI_STAGE, &keys());
        assert_eq!(
            out,
            "FROM node:20 AS build\nARG NODE_ENV\nARG API_URL\nRUN npm ci\nFROM nginx:alpine\nARG API_URL\nARG NODE_ENV\nCOPY --from=build /app/dist /usr/share/nginx/html\n"
        );
    }

    #[test]
    fn test_arg_with_default_counts_as_present() {
        let out = inject_build_args("FROM alpine\nARG NODE_ENV=production\n", &keys());
        assert_eq!(out.matches("NODE_ENV").count(), 1);
    }

    #[test]
    fn test_secret_mounts() {
        let out = inject_secret_mounts(
            "FROM alpine\nRUN apk add curl\nRUN --mount=type=cache,target=/root true\n",
            &["TOKEN".to_string()],
        );
        assert_eq!(
            out,
            "# syntax=docker/dockerfile:1\nFROM alpine\nRUN --mount=type=secret,id=TOKEN,env=TOKEN apk add curl\nRUN --mount=type=cache,target=/root true\n"
        );
        assert_eq!(inject_secret_mounts(&out, &["TOKEN".to_string()]), out);
    }

    #[test]
    fn test_healthcheck_detection() {
        assert!(has_healthcheck("FROM alpine\nHEALTHCHECK CMD curl -f http://localhost/\n"));
        assert!(!has_healthcheck("FROM alpine\nHEALTHCHECK NONE\n"));
        assert!(!has_healthcheck("FROM alpine\n"));
    }
}
