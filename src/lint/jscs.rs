use serde::{Deserialize, Deserializer};
use std::path::Path;

use super::{numbered_lines, LintViolation, Linter};
use crate::pipeline::scan::{line_col, segments, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteMark {
    Single,
    Double,
    /// Whatever the first string literal in the file uses
    Consistent,
}

impl QuoteMark {
    fn char(self) -> Option<char> {
        match self {
            Self::Single => Some('\''),
            Self::Double => Some('"'),
            Self::Consistent => None,
        }
    }
}

/// Options read from `.jscsrc`; rules not named in the file are off.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JscsOptions {
    pub disallow_trailing_whitespace: bool,
    #[serde(deserialize_with = "quote_mark")]
    pub validate_quote_marks: Option<QuoteMark>,
    pub maximum_line_length: Option<usize>,
    pub disallow_multiple_line_breaks: bool,
    pub disallow_mixed_spaces_and_tabs: bool,
}

impl JscsOptions {
    /// Rules applied when the project has no `.jscsrc`
    pub fn preset() -> Self {
        Self {
            disallow_trailing_whitespace: true,
            validate_quote_marks: Some(QuoteMark::Single),
            maximum_line_length: None,
            disallow_multiple_line_breaks: true,
            disallow_mixed_spaces_and_tabs: true,
        }
    }
}

/// Accepts `"'"`, `"\""`, `true`, `false` or `{ "mark": ... }`.
fn quote_mark<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<QuoteMark>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    let mark = match value {
        serde_json::Value::Object(ref map) => map.get("mark").cloned().unwrap_or(serde_json::Value::Null),
        other => other,
    };
    match mark {
        serde_json::Value::Null | serde_json::Value::Bool(false) => Ok(None),
        serde_json::Value::Bool(true) => Ok(Some(QuoteMark::Consistent)),
        serde_json::Value::String(ref s) if s == "'" => Ok(Some(QuoteMark::Single)),
        serde_json::Value::String(ref s) if s == "\"" => Ok(Some(QuoteMark::Double)),
        other => Err(serde::de::Error::custom(format!("invalid validateQuoteMarks value: {}", other))),
    }
}

pub struct Jscs {
    options: JscsOptions,
}

impl Jscs {
    pub fn new(options: JscsOptions) -> Self {
        Self { options }
    }

    fn check_quotes(&self, path: &Path, source: &str, mode: QuoteMark, out: &mut Vec<LintViolation>) {
        let mut expected = mode.char();

        for seg in segments(source) {
            if seg.region != Region::String {
                continue;
            }
            let Some(quote) = seg.text.chars().next() else {
                continue;
            };
            let wanted = *expected.get_or_insert(quote);
            // a string holding the preferred quote may keep the other one
            if quote != wanted && !seg.text.contains(wanted) {
                let (line, column) = line_col(source, seg.start);
                out.push(LintViolation::new(path, line, column, "validateQuoteMarks", "Invalid quote mark found"));
            }
        }
    }
}

impl Linter for Jscs {
    fn name(&self) -> &'static str {
        "jscs"
    }

    fn check(&self, path: &Path, source: &str) -> Vec<LintViolation> {
        let options = &self.options;
        let mut violations = Vec::new();
        let mut blank_run = 0usize;

        for (number, line) in numbered_lines(source) {
            let line = line.strip_suffix('\r').unwrap_or(line);

            if options.disallow_trailing_whitespace {
                let trimmed = line.trim_end_matches([' ', '\t']);
                if trimmed.len() < line.len() {
                    violations.push(LintViolation::new(
                        path,
                        number,
                        trimmed.chars().count() + 1,
                        "disallowTrailingWhitespace",
                        "Illegal trailing whitespace",
                    ));
                }
            }

            if let Some(max) = options.maximum_line_length {
                if line.chars().count() > max {
                    violations.push(LintViolation::new(
                        path,
                        number,
                        max + 1,
                        "maximumLineLength",
                        format!("Line must be at most {} characters", max),
                    ));
                }
            }

            if options.disallow_mixed_spaces_and_tabs {
                let indent: &str = &line[..line.len() - line.trim_start_matches([' ', '\t']).len()];
                if indent.contains(' ') && indent.contains('\t') {
                    violations.push(LintViolation::new(
                        path,
                        number,
                        1,
                        "disallowMixedSpacesAndTabs",
                        "Mixed spaces and tabs found",
                    ));
                }
            }

            if line.trim().is_empty() {
                blank_run += 1;
                if options.disallow_multiple_line_breaks && blank_run == 2 {
                    violations.push(LintViolation::new(
                        path,
                        number,
                        1,
                        "disallowMultipleLineBreaks",
                        "Multiple line breaks are not allowed",
                    ));
                }
            } else {
                blank_run = 0;
            }
        }

        if let Some(mode) = options.validate_quote_marks {
            self.check_quotes(path, source, mode, &mut violations);
        }

        violations.sort_by_key(|v| (v.line, v.column));
        violations
    }
}
