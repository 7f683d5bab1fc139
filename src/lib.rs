//! spabuild - build tasks for single-page apps
//!
//! A small task runner for an AngularJS-style project layout:
//! - Task graph with ordered, run-once prerequisites
//! - Source and bower dependency injection into the index page
//! - Production build: asset concatenation, DI annotation, minification
//! - Style checks, image compression, settings switching
//! - Development server with live reload and a source watcher

pub mod config;
pub mod error;
pub mod graph;
pub mod lint;
pub mod log;
pub mod pipeline;
pub mod runner;
pub mod server;
pub mod task;
pub mod tasks;
pub mod watcher;

pub use config::Config;
pub use error::{GraphError, RunError};
pub use graph::{TaskGraph, TaskListing};
pub use runner::Runner;
pub use task::{action, Action, RunOptions, Services, Task, TaskContext, TaskResult};
pub use tasks::catalog;
