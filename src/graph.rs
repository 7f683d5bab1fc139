use std::collections::{HashMap, HashSet};

use crate::error::GraphError;
use crate::task::{Action, Task};

/// Characters that mark a task name as a subtask in the listing
const SUBTASK_MARKERS: &[char] = &['-', '_', ':'];

/// Registry of named tasks and their prerequisite edges.
///
/// Tasks are kept in registration order. The graph is always acyclic:
/// registrations that would close a cycle are rejected.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

/// Task names split the way `help` presents them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskListing {
    pub main: Vec<String>,
    pub sub: Vec<String>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, or replace the existing task with the same name.
    ///
    /// Prerequisites do not need to be registered yet; unknown names are
    /// reported by [`TaskGraph::resolve`].
    pub fn register(
        &mut self,
        name: &str,
        prerequisites: &[&str],
        action: Option<Action>,
    ) -> Result<(), GraphError> {
        self.insert(Task {
            name: name.to_string(),
            prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
            action,
            description: None,
        })
    }

    /// Like [`TaskGraph::register`] with a description for the listing.
    pub fn register_described(
        &mut self,
        name: &str,
        description: &str,
        prerequisites: &[&str],
        action: Option<Action>,
    ) -> Result<(), GraphError> {
        self.insert(Task {
            name: name.to_string(),
            prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
            action,
            description: Some(description.to_string()),
        })
    }

    fn insert(&mut self, task: Task) -> Result<(), GraphError> {
        if task.name.trim().is_empty() {
            return Err(GraphError::EmptyName);
        }

        if let Some(path) = self.find_path(&task.prerequisites, &task.name) {
            let mut cycle = vec![task.name.clone()];
            cycle.extend(path);
            return Err(GraphError::Cycle(cycle));
        }

        match self.index.get(&task.name) {
            Some(&position) => self.tasks[position] = task,
            None => {
                self.index.insert(task.name.clone(), self.tasks.len());
                self.tasks.push(task);
            }
        }

        Ok(())
    }

    /// Path from one of `starts` to `target` through registered edges.
    fn find_path(&self, starts: &[String], target: &str) -> Option<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, Vec<String>)> = starts
            .iter()
            .rev()
            .map(|s| (s.as_str(), vec![s.clone()]))
            .collect();

        while let Some((current, path)) = stack.pop() {
            if current == target {
                return Some(path);
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(task) = self.task(current) {
                for dep in task.prerequisites.iter().rev() {
                    let mut next = path.clone();
                    next.push(dep.clone());
                    stack.push((dep.as_str(), next));
                }
            }
        }

        None
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Task names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Execution order for `name`: every task in its prerequisite closure,
    /// each listed once and after all of its prerequisites.
    ///
    /// Prerequisites are visited depth-first in their declared order, so
    /// independent prerequisites run left to right.
    pub fn resolve(&self, name: &str) -> Result<Vec<String>, GraphError> {
        if !self.contains(name) {
            return Err(GraphError::UnknownTask(name.to_string()));
        }

        let mut order = Vec::new();
        let mut done: HashSet<&str> = HashSet::new();
        let mut visiting: Vec<&str> = Vec::new();
        self.visit(name, &mut visiting, &mut done, &mut order)?;

        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        visiting: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        if done.contains(name) {
            return Ok(());
        }

        if let Some(start) = visiting.iter().position(|&v| v == name) {
            let mut cycle: Vec<String> = visiting[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(name.to_string());
            return Err(GraphError::Cycle(cycle));
        }

        let task = self
            .task(name)
            .ok_or_else(|| GraphError::UnknownTask(name.to_string()))?;

        visiting.push(name);
        for dep in &task.prerequisites {
            if !self.contains(dep) {
                return Err(GraphError::UnknownPrerequisite {
                    task: name.to_string(),
                    prerequisite: dep.clone(),
                });
            }
            self.visit(dep, visiting, done, order)?;
        }
        visiting.pop();

        done.insert(name);
        order.push(name.to_string());

        Ok(())
    }

    /// Split task names into main tasks and subtasks, each sorted.
    pub fn listing(&self) -> TaskListing {
        let (mut sub, mut main): (Vec<String>, Vec<String>) = self
            .names()
            .map(str::to_string)
            .partition(|name| is_subtask(name));
        main.sort();
        sub.sort();
        TaskListing { main, sub }
    }
}

pub fn is_subtask(name: &str) -> bool {
    name.contains(SUBTASK_MARKERS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::action;

    fn noop() -> Option<Action> {
        Some(action(|_ctx| async { Ok(()) }))
    }

    fn create_test_graph() -> TaskGraph {
        let mut graph = TaskGraph::new();
        graph.register("build", &["compile", "assets"], noop()).unwrap();
        graph.register("compile", &["settings"], noop()).unwrap();
        graph.register("assets", &["settings"], noop()).unwrap();
        graph.register("settings", &[], noop()).unwrap();
        graph.register("lint", &[], noop()).unwrap();
        graph.register("all", &["lint", "build"], None).unwrap();
        graph
    }

    fn assert_topological(graph: &TaskGraph, order: &[String]) {
        for (pos, name) in order.iter().enumerate() {
            for dep in &graph.task(name).unwrap().prerequisites {
                let dep_pos = order.iter().position(|x| x == dep).unwrap();
                assert!(dep_pos < pos, "{} must run before {}", dep, name);
            }
        }
    }

    #[test]
    fn test_resolve_orders_prerequisites_left_to_right() {
        let graph = create_test_graph();
        let order = graph.resolve("build").unwrap();
        assert_eq!(order, vec!["settings", "compile", "assets", "build"]);
    }

    #[test]
    fn test_resolve_is_topological_for_every_task() {
        let graph = create_test_graph();
        for name in graph.names() {
            let order = graph.resolve(name).unwrap();
            assert_eq!(order.last().map(String::as_str), Some(name));
            assert_topological(&graph, &order);

            let unique: HashSet<&String> = order.iter().collect();
            assert_eq!(unique.len(), order.len());
        }
    }

    #[test]
    fn test_resolve_only_includes_closure() {
        let graph = create_test_graph();
        let order = graph.resolve("compile").unwrap();
        assert_eq!(order, vec!["settings", "compile"]);
    }

    #[test]
    fn test_resolve_unknown_task() {
        let graph = create_test_graph();
        assert_eq!(
            graph.resolve("deploy"),
            Err(GraphError::UnknownTask("deploy".to_string()))
        );
    }

    #[test]
    fn test_resolve_unknown_prerequisite() {
        let mut graph = TaskGraph::new();
        graph.register("serve", &["webserver"], noop()).unwrap();
        assert_eq!(
            graph.resolve("serve"),
            Err(GraphError::UnknownPrerequisite {
                task: "serve".to_string(),
                prerequisite: "webserver".to_string(),
            })
        );
    }

    #[test]
    fn test_register_rejects_empty_name() {
        let mut graph = TaskGraph::new();
        assert_eq!(graph.register("", &[], noop()), Err(GraphError::EmptyName));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_register_rejects_self_dependency() {
        let mut graph = TaskGraph::new();
        let err = graph.register("loop", &["loop"], noop()).unwrap_err();
        assert_eq!(err, GraphError::Cycle(vec!["loop".into(), "loop".into()]));
    }

    #[test]
    fn test_register_rejects_cycle_and_keeps_graph() {
        let mut graph = TaskGraph::new();
        graph.register("a", &["b"], noop()).unwrap();
        graph.register("b", &["c"], noop()).unwrap();

        let err = graph.register("c", &["a"], noop()).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle(vec!["c".into(), "a".into(), "b".into(), "c".into()])
        );
        assert!(!graph.contains("c"));
    }

    #[test]
    fn test_replacing_task_cannot_close_cycle() {
        let mut graph = create_test_graph();
        let err = graph.register("settings", &["build"], noop()).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
        assert!(graph.task("settings").unwrap().prerequisites.is_empty());
    }

    #[test]
    fn test_replace_keeps_registration_position() {
        let mut graph = create_test_graph();
        graph.register("compile", &[], None).unwrap();

        let names: Vec<&str> = graph.names().collect();
        assert_eq!(names, vec!["build", "compile", "assets", "settings", "lint", "all"]);
        assert!(graph.task("compile").unwrap().is_aggregator());
    }

    #[test]
    fn test_listing_splits_subtasks() {
        let mut graph = TaskGraph::new();
        for name in ["serve", "html-inject", "build", "check_all", "ns:task", "default"] {
            graph.register(name, &[], None).unwrap();
        }

        let listing = graph.listing();
        assert_eq!(listing.main, vec!["build", "default", "serve"]);
        assert_eq!(listing.sub, vec!["check_all", "html-inject", "ns:task"]);
    }
}
