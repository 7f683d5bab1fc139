//! Style checks for JavaScript sources
//!
//! Two rule sets modelled on the usual front-end checkers:
//! - `jshint`: code-quality rules (`eqeqeq`, `debug`, `maxlen`)
//! - `jscs`: formatting rules (quotes, whitespace, line length)
//!
//! Findings are reported, not raised: a run with violations still succeeds
//! unless the caller decides otherwise.

mod jscs;
mod jshint;

pub use jscs::{Jscs, JscsOptions, QuoteMark};
pub use jshint::{JsHint, JsHintOptions};

use anyhow::{Context, Result};
use colored::Colorize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::scan::segments;
use crate::pipeline::FileRecord;

/// One style-check finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintViolation {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub rule: String,
    pub message: String,
}

impl LintViolation {
    pub fn new(file: &Path, line: usize, column: usize, rule: &str, message: impl Into<String>) -> Self {
        Self {
            file: file.to_path_buf(),
            line,
            column,
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

pub trait Linter {
    fn name(&self) -> &'static str;
    fn check(&self, path: &Path, source: &str) -> Vec<LintViolation>;
}

/// Check every file, reading contents from disk for path-only records.
pub fn lint_files(linter: &dyn Linter, files: &[FileRecord]) -> Result<Vec<LintViolation>> {
    let mut violations = Vec::new();

    for file in files {
        let source = match file.contents {
            Some(_) => file.text()?.to_string(),
            None => fs::read_to_string(&file.path).with_context(|| format!("Failed to read {}", file.path.display()))?,
        };
        violations.extend(linter.check(&file.path, &source));
    }

    violations.sort_by(|a, b| (&a.file, a.line, a.column).cmp(&(&b.file, b.line, b.column)));
    Ok(violations)
}

/// Load a JSON rc file; `//` and `/* */` comments are allowed.
pub fn load_rc<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let json = strip_comments(&content);
    let options = serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(options))
}

fn strip_comments(source: &str) -> String {
    segments(source)
        .into_iter()
        .filter(|s| !s.region.is_comment())
        .map(|s| s.text)
        .collect()
}

/// Print violations grouped by file, with paths shown relative to `base_dir`.
pub fn report(linter: &str, violations: &[LintViolation], files_checked: usize, base_dir: &Path) {
    let mut current: Option<&Path> = None;

    for v in violations {
        if current != Some(v.file.as_path()) {
            current = Some(v.file.as_path());
            let shown = v.file.strip_prefix(base_dir).unwrap_or(&v.file);
            println!("\n{}", shown.display().to_string().underline());
        }
        println!(
            "  {} {}  {}  {}",
            format!("line {}", v.line).dimmed(),
            format!("col {}", v.column).dimmed(),
            v.message,
            format!("({})", v.rule).dimmed()
        );
    }

    if violations.is_empty() {
        println!("{} {}: {} file(s) checked, no problems", "✓".green(), linter, files_checked);
    } else {
        println!(
            "\n{} {}: {} problem(s) in {} file(s) checked",
            "⚠".yellow(),
            linter,
            violations.len().to_string().yellow(),
            files_checked
        );
    }
}

/// Iterate lines with their 1-based number.
fn numbered_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source.lines().enumerate().map(|(i, line)| (i + 1, line))
}
