//! Source watcher
//!
//! Watches the static roots of the JS and CSS globs and re-runs
//! `html-inject` when a matching file is created, changed or removed.
//! Runs never overlap: changes arriving during a run collapse into a
//! single follow-up run.

use anyhow::{Context, Result};
use colored::Colorize;
use glob::{MatchOptions, Pattern};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::log;
use crate::pipeline::{glob_base, normalize};
use crate::task::TaskContext;

const DEBOUNCE_MS: u64 = 300;
pub const EXCLUDED_DIRS: &[&str] = &["node_modules", "bower_components", "build", "dist", ".git"];

/// Task re-run on every relevant change
const RERUN_TASK: &str = "html-inject";

/// Serializes runs of a job.
///
/// A trigger while the job is idle starts it. Triggers while it runs queue
/// one follow-up run; any beyond that are folded into the queued one.
pub struct Coalescer {
    tx: mpsc::Sender<()>,
}

impl Coalescer {
    pub fn spawn<F, Fut>(mut job: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let worker = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                job().await;
            }
        });
        (Self { tx }, worker)
    }

    /// Request a run. Returns `false` when a run was already queued.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Directories to watch and the globs deciding which changes count
#[derive(Debug)]
pub struct WatchSet {
    base_dir: PathBuf,
    roots: Vec<PathBuf>,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl WatchSet {
    pub fn new(base_dir: &Path, globs: &[String]) -> Result<Self> {
        let base_dir = base_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", base_dir.display()))?;

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        let mut roots = Vec::new();

        for glob in globs {
            if let Some(negated) = glob.strip_prefix('!') {
                exclude.push(compile(negated)?);
                continue;
            }
            let glob = glob.trim_start_matches("./");
            include.push(compile(glob)?);

            let root = normalize(&base_dir.join(glob_base(glob)));
            if root.is_dir() {
                roots.push(root);
            } else {
                tracing::warn!(root = %root.display(), glob, "watch root does not exist, skipped");
            }
        }

        Ok(Self {
            base_dir,
            roots: collapse_roots(roots),
            include,
            exclude,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Whether a change to `path` is relevant. Relative paths are taken
    /// relative to the base directory.
    pub fn matches(&self, path: &Path) -> bool {
        let relative = match path.strip_prefix(&self.base_dir) {
            Ok(rel) => rel,
            Err(_) if path.is_relative() => path,
            Err(_) => return false,
        };

        let excluded_dir = relative.components().any(|c| match c {
            Component::Normal(name) => EXCLUDED_DIRS.iter().any(|dir| name == *dir),
            _ => false,
        });
        if excluded_dir {
            return false;
        }

        let relative = relative.to_string_lossy().replace('\\', "/");
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };
        self.include.iter().any(|p| p.matches_with(&relative, options))
            && !self.exclude.iter().any(|p| p.matches_with(&relative, options))
    }

    fn relevant<'a>(&self, event: &'a Event) -> Vec<&'a Path> {
        if event.kind.is_access() {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| self.matches(p))
            .collect()
    }

    fn display<'a>(&self, path: &'a Path) -> std::borrow::Cow<'a, str> {
        path.strip_prefix(&self.base_dir).unwrap_or(path).to_string_lossy()
    }
}

fn compile(glob: &str) -> Result<Pattern> {
    Pattern::new(glob).with_context(|| format!("Invalid glob pattern '{}'", glob))
}

/// Drop roots nested inside another root; watches are recursive.
fn collapse_roots(mut roots: Vec<PathBuf>) -> Vec<PathBuf> {
    roots.sort();
    let mut collapsed: Vec<PathBuf> = Vec::new();
    for root in roots {
        if collapsed.last().map(|last| root.starts_with(last)).unwrap_or(false) {
            continue;
        }
        collapsed.push(root);
    }
    collapsed
}

/// Start watching sources as a background service.
pub fn start(ctx: &TaskContext) -> Result<()> {
    let set = WatchSet::new(ctx.config.base_dir(), &ctx.config.source_globs())?;
    if set.roots().is_empty() {
        anyhow::bail!("Nothing to watch: no source directory exists");
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        },
        notify::Config::default(),
    )
    .context("Failed to create file watcher")?;

    for root in set.roots() {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        log::line(format_args!("{} {}", "Watching".cyan(), set.display(root)));
    }

    let runner = ctx.runner.clone();
    let services = ctx.services.clone();
    let (coalescer, worker) = Coalescer::spawn(move || {
        let runner = runner.clone();
        let services = services.clone();
        async move {
            match runner.run(RERUN_TASK).await {
                Ok(_) => services.notify_reload(),
                Err(e) => {
                    tracing::warn!(task = RERUN_TASK, error = %e, "re-run after change failed");
                    log::line(format_args!("{} {}", "Error:".red().bold(), e));
                }
            }
        }
    });

    ctx.services.spawn("watchers", async move {
        // dropping the watcher would end the event stream
        let _watcher = watcher;

        while let Some(event) = rx.recv().await {
            let changed = set.relevant(&event);
            if changed.is_empty() {
                continue;
            }
            for path in changed {
                log::line(format_args!("{} {}", "Changed".yellow(), set.display(path)));
            }

            tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
            while rx.try_recv().is_ok() {}

            if !coalescer.trigger() {
                tracing::debug!(task = RERUN_TASK, "run already queued");
            }
        }

        worker.abort();
        Ok(())
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    async fn wait_for(counter: &AtomicUsize, value: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < value {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_triggers_during_run_collapse_into_one() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));

        let (coalescer, worker) = {
            let runs = Arc::clone(&runs);
            let gate = Arc::clone(&gate);
            Coalescer::spawn(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                let gate = Arc::clone(&gate);
                async move {
                    gate.acquire().await.unwrap().forget();
                }
            })
        };

        assert!(coalescer.trigger());
        wait_for(&runs, 1).await;

        // the first run is blocked on the gate
        assert!(coalescer.trigger());
        assert!(!coalescer.trigger());
        assert!(!coalescer.trigger());

        gate.add_permits(2);
        wait_for(&runs, 2).await;

        drop(coalescer);
        worker.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_triggers_each_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (coalescer, worker) = {
            let runs = Arc::clone(&runs);
            Coalescer::spawn(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                async {}
            })
        };

        assert!(coalescer.trigger());
        wait_for(&runs, 1).await;
        // wait for the worker to pick up the queued message
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coalescer.trigger());
        wait_for(&runs, 2).await;

        drop(coalescer);
        worker.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_watch_set_roots_and_matching() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app/accounts")).unwrap();

        let globs = vec![
            "app/**/*.module.js".to_string(),
            "app/**/*.js".to_string(),
            "app/*.css".to_string(),
            "!app/**/*.spec.js".to_string(),
        ];
        let set = WatchSet::new(dir.path(), &globs).unwrap();
        let base = dir.path().canonicalize().unwrap();

        assert_eq!(set.roots(), &[base.join("app")]);
        assert!(set.matches(&base.join("app/accounts/accounts.factory.js")));
        assert!(set.matches(&base.join("app/app.css")));
        assert!(set.matches(Path::new("app/app.module.js")));
        assert!(!set.matches(&base.join("app/accounts/theme.css")));
        assert!(!set.matches(&base.join("app/accounts/accounts.spec.js")));
        assert!(!set.matches(&base.join("app/node_modules/lib/index.js")));
        assert!(!set.matches(Path::new("/elsewhere/app/app.js")));
    }

    #[test]
    fn test_missing_roots_are_skipped() {
        let dir = TempDir::new().unwrap();
        let set = WatchSet::new(dir.path(), &["src/**/*.js".to_string()]).unwrap();
        assert!(set.roots().is_empty());
    }

    #[test]
    fn test_collapse_roots() {
        let roots = vec![PathBuf::from("/p/app/a"), PathBuf::from("/p/app"), PathBuf::from("/p/lib")];
        assert_eq!(collapse_roots(roots), vec![PathBuf::from("/p/app"), PathBuf::from("/p/lib")]);
    }
}
