//! File pipelines
//!
//! Provides:
//! - File records read from globs (`src`) and written to a directory (`dest`)
//! - Explicit stage composition (`Pipeline`, `map`, `when`)
//! - The transforms used by the build tasks: source injection, bower
//!   injection, asset block concatenation, DI annotation, minification

pub mod annotate;
pub mod inject;
pub mod minify;
pub mod scan;
pub mod useref;
pub mod wiredep;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A file flowing through a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Location of the file
    pub path: PathBuf,
    /// Static prefix of the glob that matched the file
    pub base: PathBuf,
    /// `None` when the file was matched without reading it
    pub contents: Option<Vec<u8>>,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, base: impl Into<PathBuf>, contents: Option<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            base: base.into(),
            contents,
        }
    }

    /// Path below the glob base, which is where `dest` writes the file.
    pub fn relative(&self) -> &Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }

    pub fn text(&self) -> Result<&str> {
        let bytes = self
            .contents
            .as_deref()
            .with_context(|| format!("{} was matched without contents", self.path.display()))?;
        std::str::from_utf8(bytes).with_context(|| format!("{} is not valid UTF-8", self.path.display()))
    }

    pub fn set_text(&mut self, text: String) {
        self.contents = Some(text.into_bytes());
    }
}

/// Static directory prefix of a glob, the part before the first wildcard.
///
/// A pattern without wildcards has its parent directory as base.
pub fn glob_base(pattern: &str) -> PathBuf {
    let path = Path::new(pattern);
    let components: Vec<Component> = path.components().collect();
    let wildcard = components.iter().position(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.contains(['*', '?', '[', '{']))
            .unwrap_or(false)
    });

    match wildcard {
        Some(index) => components[..index].iter().collect(),
        None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
    }
}

/// Expand globs relative to `base_dir`, in list order.
///
/// Every file appears once, at its first match. Patterns starting with `!`
/// exclude files matched by earlier or later patterns. With `read == false`
/// only paths are collected.
pub fn src(base_dir: &Path, globs: &[String], read: bool) -> Result<Vec<FileRecord>> {
    let mut excludes = Vec::new();
    for pattern in globs.iter().filter_map(|g| g.strip_prefix('!')) {
        excludes.push(
            glob::Pattern::new(pattern).with_context(|| format!("Invalid glob pattern '!{}'", pattern))?,
        );
    }

    let root = normalize(base_dir);
    let prefix = if root.as_os_str().is_empty() {
        String::new()
    } else {
        format!("{}/", glob::Pattern::escape(root.to_string_lossy().trim_end_matches('/')))
    };
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut records = Vec::new();

    for pattern in globs.iter().filter(|g| !g.starts_with('!')) {
        let pattern = pattern.trim_start_matches("./");
        let full_pattern = format!("{}{}", prefix, pattern);
        let base = root.join(glob_base(pattern));

        let matches = glob::glob(&full_pattern).with_context(|| format!("Invalid glob pattern '{}'", pattern))?;
        for entry in matches {
            let path = entry.with_context(|| format!("Failed to read match of '{}'", pattern))?;
            if !path.is_file() {
                continue;
            }

            let rel = path.strip_prefix(&root).unwrap_or(&path);
            if excludes.iter().any(|p| p.matches_path(rel)) {
                continue;
            }

            if !seen.insert(path.clone()) {
                continue;
            }

            let contents = if read {
                Some(fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?)
            } else {
                None
            };
            records.push(FileRecord::new(path, base.clone(), contents));
        }
    }

    tracing::debug!(count = records.len(), globs = ?globs, "matched files");
    Ok(records)
}

/// Write records below `out_dir`, keeping their path relative to the glob base.
pub fn dest(records: &[FileRecord], out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(records.len());

    for record in records {
        let target = out_dir.join(record.relative());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        match record.contents {
            Some(ref bytes) => fs::write(&target, bytes),
            None => fs::copy(&record.path, &target).map(|_| ()),
        }
        .with_context(|| format!("Failed to write {}", target.display()))?;

        written.push(target);
    }

    Ok(written)
}

/// One pipeline step: a function from file records to file records.
pub type Stage = Box<dyn Fn(Vec<FileRecord>) -> Result<Vec<FileRecord>> + Send + Sync>;

/// Ordered composition of stages
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<(String, Stage)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, name: &str, stage: Stage) -> Self {
        self.stages.push((name.to_string(), stage));
        self
    }

    pub fn run(&self, mut files: Vec<FileRecord>) -> Result<Vec<FileRecord>> {
        for (name, stage) in &self.stages {
            files = stage(files).with_context(|| format!("Pipeline stage '{}' failed", name))?;
        }
        Ok(files)
    }
}

/// Stage applying `f` to every record.
pub fn map<F>(f: F) -> Stage
where
    F: Fn(FileRecord) -> Result<FileRecord> + Send + Sync + 'static,
{
    Box::new(move |files| files.into_iter().map(&f).collect())
}

/// Stage applying `f` only to records whose file name matches `pattern`.
pub fn when<F>(pattern: &str, f: F) -> Stage
where
    F: Fn(FileRecord) -> Result<FileRecord> + Send + Sync + 'static,
{
    let pattern = glob::Pattern::new(pattern).map_err(|e| format!("Invalid pattern '{}': {}", pattern, e));
    Box::new(move |files| {
        let pattern = pattern.as_ref().map_err(|e| anyhow::anyhow!("{}", e))?;
        files
            .into_iter()
            .map(|file| if pattern.matches(file.file_name()) { f(file) } else { Ok(file) })
            .collect()
    })
}

/// Path of `target` relative to directory `from`, with `/` separators.
///
/// Both paths must be relative to the same root, or both absolute.
pub fn relative_url(from: &Path, target: &Path) -> String {
    let from_norm = normalize(from);
    let from: Vec<Component> = from_norm.components().collect();
    let target_norm = normalize(target);
    let target: Vec<Component> = target_norm.components().collect();

    let common = from.iter().zip(&target).take_while(|(a, b)| a == b).count();
    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for component in &target[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}

/// Lexically drop `.` components and fold `..` where possible.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
