use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

use super::{numbered_lines, LintViolation, Linter};
use crate::pipeline::scan::{code_mask, line_col};

/// Options read from `.jshintrc`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JsHintOptions {
    /// Require `===` and `!==`
    pub eqeqeq: bool,
    /// Allow `debugger` statements
    pub debug: bool,
    pub maxlen: Option<usize>,
}

impl Default for JsHintOptions {
    fn default() -> Self {
        Self {
            eqeqeq: true,
            debug: false,
            maxlen: None,
        }
    }
}

pub struct JsHint {
    options: JsHintOptions,
}

impl JsHint {
    pub fn new(options: JsHintOptions) -> Self {
        Self { options }
    }
}

fn debugger_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bdebugger\b").expect("debugger pattern is valid"))
}

impl Linter for JsHint {
    fn name(&self) -> &'static str {
        "jshint"
    }

    fn check(&self, path: &Path, source: &str) -> Vec<LintViolation> {
        let mask = code_mask(source);
        let mut violations = Vec::new();

        if self.options.eqeqeq {
            let bytes = mask.as_bytes();
            let mut i = 0;
            while i + 1 < bytes.len() {
                let rest = &mask[i..];
                if rest.starts_with("===") || rest.starts_with("!==") {
                    i += 3;
                    continue;
                }
                let found = if rest.starts_with("==") {
                    Some(("==", "==="))
                } else if rest.starts_with("!=") {
                    Some(("!=", "!=="))
                } else {
                    None
                };
                if let Some((saw, expected)) = found {
                    let (line, column) = line_col(source, i);
                    violations.push(LintViolation::new(
                        path,
                        line,
                        column,
                        "eqeqeq",
                        format!("Expected '{}' and instead saw '{}'.", expected, saw),
                    ));
                    i += 2;
                    continue;
                }
                // step over a whole character
                i += rest.chars().next().map(char::len_utf8).unwrap_or(1);
            }
        }

        if !self.options.debug {
            for m in debugger_regex().find_iter(&mask) {
                let (line, column) = line_col(source, m.start());
                violations.push(LintViolation::new(path, line, column, "debug", "Forgotten 'debugger' statement?"));
            }
        }

        if let Some(max) = self.options.maxlen {
            for (number, line) in numbered_lines(source) {
                if line.chars().count() > max {
                    violations.push(LintViolation::new(path, number, max + 1, "maxlen", "Line is too long."));
                }
            }
        }

        violations.sort_by_key(|v| (v.line, v.column));
        violations
    }
}
