use colored::Colorize;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::error::RunError;
use crate::graph::TaskGraph;
use crate::log;
use crate::task::{RunOptions, Services, TaskContext, TaskResult};

/// Executes tasks of a [`TaskGraph`] in dependency order.
///
/// Cheap to clone; clones share the graph, config and services.
#[derive(Clone)]
pub struct Runner {
    graph: Arc<TaskGraph>,
    config: Arc<Config>,
    services: Services,
    options: RunOptions,
}

impl Runner {
    pub fn new(graph: TaskGraph, config: Config) -> Self {
        Self {
            graph: Arc::new(graph),
            config: Arc::new(config),
            services: Services::new(),
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Run a task with its dependencies.
    ///
    /// The whole execution order is resolved before any action runs. Each
    /// task runs once; the first failing action stops the run.
    pub async fn run(&self, task_name: &str) -> Result<Vec<TaskResult>, RunError> {
        let execution_order = self.graph.resolve(task_name)?;
        tracing::debug!(task = task_name, order = ?execution_order, "resolved execution order");
        self.execute_tasks(&execution_order).await
    }

    async fn execute_tasks(&self, task_names: &[String]) -> Result<Vec<TaskResult>, RunError> {
        let mut results = Vec::with_capacity(task_names.len());

        for name in task_names {
            let task = self
                .graph
                .task(name)
                .ok_or_else(|| crate::error::GraphError::UnknownTask(name.clone()))?;

            log::task_started(name);
            let started = Instant::now();

            let outcome = match task.action {
                Some(ref action) => action(self.context()).await,
                None => Ok(()),
            };
            let duration_ms = started.elapsed().as_millis();

            match outcome {
                Ok(()) => {
                    log::task_finished(name, duration_ms);
                    results.push(TaskResult {
                        name: name.clone(),
                        success: true,
                        duration_ms,
                        aggregator: task.is_aggregator(),
                    });
                }
                Err(source) => {
                    log::task_failed(name, duration_ms);
                    let skipped = task_names.len() - results.len() - 1;
                    if skipped > 0 {
                        println!("{} Skipping {} remaining task(s)", "!".yellow(), skipped);
                    }
                    return Err(RunError::Action {
                        task: name.clone(),
                        source,
                    });
                }
            }
        }

        Ok(results)
    }

    fn context(&self) -> TaskContext {
        TaskContext {
            config: Arc::clone(&self.config),
            runner: self.clone(),
            services: self.services.clone(),
            options: self.options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::task::action;
    use std::sync::Mutex;
    use std::time::Duration;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn recording(journal: &Journal, name: &'static str) -> Option<crate::task::Action> {
        let journal = Arc::clone(journal);
        Some(action(move |_ctx| {
            let journal = Arc::clone(&journal);
            async move {
                journal.lock().unwrap().push(name.to_string());
                Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn test_runs_each_task_once_in_order() {
        let journal: Journal = Arc::default();
        let mut graph = TaskGraph::new();
        graph.register("settings", &[], recording(&journal, "settings")).unwrap();
        graph.register("inject", &["settings"], recording(&journal, "inject")).unwrap();
        graph.register("bower", &["inject"], recording(&journal, "bower")).unwrap();
        graph
            .register("build", &["bower", "inject", "settings"], recording(&journal, "build"))
            .unwrap();

        let runner = Runner::new(graph, Config::default());
        let results = runner.run("build").await.unwrap();

        assert_eq!(*journal.lock().unwrap(), vec!["settings", "inject", "bower", "build"]);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_waits_for_future_to_settle() {
        let journal: Journal = Arc::default();
        let slow_journal = Arc::clone(&journal);
        let mut graph = TaskGraph::new();
        graph
            .register(
                "slow",
                &[],
                Some(action(move |_ctx| {
                    let journal = Arc::clone(&slow_journal);
                    async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        journal.lock().unwrap().push("slow".to_string());
                        Ok(())
                    }
                })),
            )
            .unwrap();
        graph.register("after", &["slow"], recording(&journal, "after")).unwrap();

        Runner::new(graph, Config::default()).run("after").await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["slow", "after"]);
    }

    #[tokio::test]
    async fn test_aggregator_has_no_action() {
        let journal: Journal = Arc::default();
        let mut graph = TaskGraph::new();
        graph.register("help", &[], recording(&journal, "help")).unwrap();
        graph.register("default", &["help"], None).unwrap();

        let results = Runner::new(graph, Config::default()).run("default").await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["help"]);
        assert!(results[1].aggregator);
    }

    #[tokio::test]
    async fn test_fails_fast_on_action_error() {
        let journal: Journal = Arc::default();
        let mut graph = TaskGraph::new();
        graph.register("first", &[], recording(&journal, "first")).unwrap();
        graph
            .register(
                "broken",
                &["first"],
                Some(action(|_ctx| async { anyhow::bail!("cannot read manifest") })),
            )
            .unwrap();
        graph.register("last", &["broken"], recording(&journal, "last")).unwrap();

        let err = Runner::new(graph, Config::default()).run("last").await.unwrap_err();
        assert_eq!(err.task(), Some("broken"));
        assert!(err.to_string().contains("cannot read manifest"));
        assert_eq!(*journal.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_configuration_error_before_any_action() {
        let journal: Journal = Arc::default();
        let mut graph = TaskGraph::new();
        graph.register("first", &[], recording(&journal, "first")).unwrap();
        graph.register("serve", &["first", "missing"], recording(&journal, "serve")).unwrap();

        let err = Runner::new(graph, Config::default()).run("serve").await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Configuration(GraphError::UnknownPrerequisite { .. })
        ));
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_actions_can_run_other_tasks() {
        let journal: Journal = Arc::default();
        let mut graph = TaskGraph::new();
        graph.register("inject", &[], recording(&journal, "inject")).unwrap();
        graph
            .register(
                "outer",
                &[],
                Some(action(|ctx| async move {
                    ctx.runner.run("inject").await?;
                    Ok(())
                })),
            )
            .unwrap();

        Runner::new(graph, Config::default()).run("outer").await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["inject"]);
    }
}
