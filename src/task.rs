//! Task definitions and the context handed to task actions

use anyhow::Result;
use colored::Colorize;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::Config;
use crate::log;
use crate::runner::Runner;

/// Asynchronous body of a task.
///
/// The task counts as complete once the returned future resolves.
pub type Action = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure into an [`Action`].
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// A named unit of build work
#[derive(Clone)]
pub struct Task {
    pub name: String,
    pub prerequisites: Vec<String>,
    /// `None` for aggregator tasks that only group prerequisites
    pub action: Option<Action>,
    pub description: Option<String>,
}

impl Task {
    pub fn is_aggregator(&self) -> bool {
        self.action.is_none()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .field("action", &self.action.as_ref().map(|_| "<action>"))
            .field("description", &self.description)
            .finish()
    }
}

/// Result of executing a task
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u128,
    /// True when the task had no action of its own
    pub aggregator: bool,
}

/// Options that change how task actions behave for one invocation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Turn lint violations into task failures
    pub fail_on_lint: bool,
}

/// Everything an action may touch
#[derive(Clone)]
pub struct TaskContext {
    pub config: Arc<Config>,
    pub runner: Runner,
    pub services: Services,
    pub options: RunOptions,
}

struct Service {
    name: String,
    handle: JoinHandle<Result<()>>,
}

struct ServicesInner {
    jobs: Mutex<Vec<Service>>,
    reload: broadcast::Sender<()>,
}

/// Long-lived background jobs started by tasks (servers, watchers)
/// together with the live-reload channel they share.
#[derive(Clone)]
pub struct Services {
    inner: Arc<ServicesInner>,
}

impl Default for Services {
    fn default() -> Self {
        Self::new()
    }
}

impl Services {
    pub fn new() -> Self {
        let (reload, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(ServicesInner {
                jobs: Mutex::new(Vec::new()),
                reload,
            }),
        }
    }

    /// Run `job` in the background until it finishes or the process stops.
    pub fn spawn<F>(&self, name: &str, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        tracing::debug!(service = name, "starting background service");
        let handle = tokio::spawn(job);
        let mut jobs = self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.push(Service {
            name: name.to_string(),
            handle,
        });
    }

    pub fn len(&self) -> usize {
        self.inner.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to live-reload notifications.
    pub fn subscribe_reload(&self) -> broadcast::Receiver<()> {
        self.inner.reload.subscribe()
    }

    pub fn reload_sender(&self) -> broadcast::Sender<()> {
        self.inner.reload.clone()
    }

    /// Ask connected browsers to reload. No-op without subscribers.
    pub fn notify_reload(&self) {
        let _ = self.inner.reload.send(());
    }

    /// Block until every service has stopped, one of them fails, or Ctrl+C.
    pub async fn wait(&self) -> Result<()> {
        let jobs: Vec<Service> = {
            let mut jobs = self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *jobs)
        };

        if jobs.is_empty() {
            return Ok(());
        }

        let aborts: Vec<AbortHandle> = jobs.iter().map(|j| j.handle.abort_handle()).collect();
        let mut names: Vec<String> = jobs.iter().map(|j| j.name.clone()).collect();
        let mut handles: Vec<JoinHandle<Result<()>>> = jobs.into_iter().map(|j| j.handle).collect();

        log::line(format_args!("{}", "Press Ctrl+C to stop".dimmed()));

        let outcome = loop {
            if handles.is_empty() {
                break Ok(());
            }

            tokio::select! {
                (finished, index, rest) = futures::future::select_all(handles) => {
                    let name = names.remove(index);
                    handles = rest;
                    match finished {
                        Ok(Ok(())) => {
                            tracing::debug!(service = %name, "service stopped");
                        }
                        Ok(Err(e)) => break Err(e.context(format!("Service '{}' failed", name))),
                        Err(e) => break Err(anyhow::anyhow!("Service '{}' panicked: {}", name, e)),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    log::line("Stopped via Ctrl+C");
                    break Ok(());
                }
            }
        };

        for abort in aborts {
            abort.abort();
        }

        outcome
    }
}
