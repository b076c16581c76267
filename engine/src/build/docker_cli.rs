//! Typed `docker build` invocation

use crate::remote::shell;

/// Options of a `docker build` run, rendered to a safely quoted command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerBuild {
    context: String,
    dockerfile: Option<String>,
    tags: Vec<String>,
    build_args: Vec<(String, String)>,
    labels: Vec<(String, String)>,
    secrets: Vec<String>,
    /// Shell file exporting secret values before the build
    secrets_file: Option<String>,
    network: Option<String>,
    pull: bool,
    no_cache: bool,
    buildkit: bool,
}

impl DockerBuild {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Default::default()
        }
    }

    pub fn dockerfile(mut self, path: impl Into<String>) -> Self {
        self.dockerfile = Some(path.into());
        self
    }

    pub fn tag(mut self, image: impl Into<String>) -> Self {
        self.tags.push(image.into());
        self
    }

    pub fn build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.push((key.into(), value.into()));
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Secret read from the environment variable of the same name
    pub fn secret(mut self, id: impl Into<String>) -> Self {
        self.secrets.push(id.into());
        self
    }

    pub fn secrets_file(mut self, path: impl Into<String>) -> Self {
        self.secrets_file = Some(path.into());
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn pull(mut self, pull: bool) -> Self {
        self.pull = pull;
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn buildkit(mut self, enabled: bool) -> Self {
        self.buildkit = enabled;
        self
    }

    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec!["docker".to_string(), "build".to_string()];
        if let Some(network) = &self.network {
            argv.push("--network".to_string());
            argv.push(network.clone());
        }
        if self.pull {
            argv.push("--pull".to_string());
        }
        if self.no_cache {
            argv.push("--no-cache".to_string());
        }
        argv.push("--progress".to_string());
        argv.push("plain".to_string());
        if let Some(dockerfile) = &self.dockerfile {
            argv.push("-f".to_string());
            argv.push(dockerfile.clone());
        }
        for (key, value) in &self.build_args {
            argv.push("--build-arg".to_string());
            argv.push(format!("{key}={value}"));
        }
        for (key, value) in &self.labels {
            argv.push("--label".to_string());
            argv.push(format!("{key}={value}"));
        }
        for id in &self.secrets {
            argv.push("--secret".to_string());
            argv.push(format!("id={id},env={id}"));
        }
        for tag in &self.tags {
            argv.push("-t".to_string());
            argv.push(tag.clone());
        }
        argv.push(self.context.clone());
        argv
    }

    /// Full shell command line
    pub fn render(&self) -> String {
        let mut prefix = String::new();
        if let Some(file) = &self.secrets_file {
            prefix.push_str(&format!("set -a && . {} && set +a && ", shell::quote_arg(file)));
        }
        if self.buildkit {
            prefix.push_str("DOCKER_BUILDKIT=1 ");
        }
        format!("{}{}", prefix, shell::join_argv(&self.argv()))
    }
}
