//! Shared fixtures: scripted transport, recording event sink, records

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use launchpad::context::{BuildContext, HostPaths, PipelineFlags};
use launchpad::deploy::pipeline::Options as PipelineOptions;
use launchpad::deploy::{
    DeploymentLog, DeploymentPipeline, DeploymentQueue, DeploymentStatusManager, QueueSignal,
};
use launchpad::git::DefaultGitSource;
use launchpad::errors::EngineError;
use launchpad::notify::{EngineEvent, EventSink};
use launchpad::remote::{CancelSignal, OutputLine, RemoteExecutor, Transport};
use launchpad::rollout::{CanaryManager, CanaryTick, ProxyOptions, RolloutController};
use launchpad::store::memory::MemoryStore;
use platform_models::{Application, DeploymentRequest, Destination, NewDeployment, Server};
use serde_json::json;
use tokio::sync::mpsc;

/// Canned result of a command
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub exit_code: i32,
    pub stdout: String,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
        }
    }

    pub fn fail(exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
        }
    }
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

/// Transport answering scripts by substring. The latest matching rule
/// wins and its last reply repeats; unmatched scripts succeed silently
#[derive(Default)]
pub struct ScriptedTransport {
    rules: Mutex<Vec<Rule>>,
    scripts: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, replies: Vec<Reply>) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
        });
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    /// Scripts containing every one of `patterns`
    pub fn count(&self, patterns: &[&str]) -> usize {
        self.scripts()
            .iter()
            .filter(|s| patterns.iter().all(|p| s.contains(p)))
            .count()
    }

    fn reply(&self, script: &str) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().rev().find(|r| script.contains(&r.pattern)) else {
            return Reply::default();
        };
        if rule.replies.len() > 1 {
            rule.replies.pop_front().unwrap_or_default()
        } else {
            rule.replies.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exec(
        &self,
        _host: &Server,
        script: &str,
        lines: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<i32, EngineError> {
        self.scripts.lock().unwrap().push(script.to_string());
        let reply = self.reply(script);
        for line in reply.stdout.lines() {
            let _ = lines.send(OutputLine::stdout(line));
        }
        Ok(reply.exit_code)
    }
}

#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(EngineEvent::name).collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn destination(id: &str) -> Destination {
    Destination {
        id: id.to_string(),
        network: "launchpad".to_string(),
        server: Server::local(&format!("server-{id}")),
        is_swarm: false,
    }
}

/// Dockerfile application with a domain and default health check
pub fn application(id: &str) -> Application {
    serde_json::from_value(json!({
        "id": id,
        "uuid": format!("{id}uuid"),
        "name": format!("app {id}"),
        "git_repository": "https://github.com/acme/web.git",
        "build_pack": "dockerfile",
        "fqdn": "https://web.example.com",
        "ports_exposes": "3000",
        "destination": destination("primary"),
    }))
    .unwrap()
}

pub fn deployment(application: &Application) -> DeploymentRequest {
    NewDeployment {
        application_id: application.id.clone(),
        commit: Some("0123456789abcdef0123456789abcdef01234567".to_string()),
        ..Default::default()
    }
    .into_request(application.destination.clone())
}

pub fn context(application: Application, deployment: DeploymentRequest) -> BuildContext {
    let flags = PipelineFlags::resolve(&application, &deployment, false);
    BuildContext::new(application, deployment, flags, &HostPaths::default())
}

/// Engine components wired to an in-memory store and a scripted transport
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<ScriptedTransport>,
    pub events: Arc<RecordingEventSink>,
    pub queue: Arc<DeploymentQueue>,
    pub status: Arc<DeploymentStatusManager>,
    pub canary: Arc<CanaryManager>,
    pub signals: mpsc::UnboundedReceiver<QueueSignal>,
    pub ticks: mpsc::UnboundedReceiver<CanaryTick>,
}

impl Harness {
    pub fn new(applications: Vec<Application>) -> Self {
        let store = Arc::new(MemoryStore::with_applications(applications));
        let transport = Arc::new(ScriptedTransport::new());
        let events = Arc::new(RecordingEventSink::default());
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let (ticks_tx, ticks) = mpsc::unbounded_channel();

        let queue = Arc::new(DeploymentQueue::new(store.clone(), signals_tx));
        let status = Arc::new(DeploymentStatusManager::new(
            store.clone(),
            events.clone(),
            queue.clone(),
        ));
        let canary = Arc::new(CanaryManager::new(
            store.clone(),
            transport.clone(),
            events.clone(),
            ProxyOptions::default(),
            ticks_tx,
            10,
        ));

        Self {
            store,
            transport,
            events,
            queue,
            status,
            canary,
            signals,
            ticks,
        }
    }

    /// Queue a deployment and claim it, as the deployer worker does
    pub async fn start(&self, deployment: DeploymentRequest) -> (DeploymentRequest, CancelSignal) {
        let application_id = deployment.application_id.clone();
        self.queue.enqueue(deployment).await.unwrap();
        self.queue
            .claim_next(&application_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn executor(&self, ctx: &BuildContext) -> RemoteExecutor {
        let log = DeploymentLog::open(ctx.deployment_uuid(), self.store.clone(), 10)
            .await
            .unwrap();
        RemoteExecutor::new(
            self.transport.clone(),
            ctx.destination().server.clone(),
            Arc::new(log),
            CancelSignal::new(),
        )
    }

    pub fn pipeline(&self) -> Arc<DeploymentPipeline> {
        Arc::new(DeploymentPipeline::new(
            PipelineOptions::default(),
            self.store.clone(),
            self.transport.clone(),
            Arc::new(DefaultGitSource),
            self.status.clone(),
            RolloutController::new(self.store.clone(), self.canary.clone()),
            ProxyOptions::default(),
        ))
    }
}
