//! Dependency injection annotations for AngularJS sources
//!
//! Minification renames function parameters, which breaks AngularJS's
//! inference of injected services from parameter names. Two forms are
//! rewritten so the names survive:
//!
//! - functions passed inline to module registration methods become the
//!   array form: `.factory('X', ['$http', function ($http) { … }])`
//! - declarations marked `/* @ngInject */` get an explicit
//!   `name.$inject = ['$http'];` unless one is already assigned.

use regex::Regex;
use std::sync::OnceLock;

use super::scan::{code_mask, segments, Region};

fn registration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\.(?:controller|factory|service|directive|filter|provider|config|run|decorator|component)\s*\(\s*(?:(?:'[^']*'|"[^"]*")\s*,\s*)?(function\s*[\w$]*\s*\(([^)]*)\)\s*\{)"#,
        )
        .expect("registration pattern is valid")
    })
}

fn declaration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*function\s+([\w$]+)\s*\(([^)]*)\)").expect("declaration pattern is valid"))
}

/// Add injection annotations to `source`.
pub fn annotate(source: &str) -> String {
    let mask = code_mask(source);
    let mut edits: Vec<(usize, String)> = Vec::new();

    for caps in registration_regex().captures_iter(&mask) {
        let function = caps.get(1).map(|m| (m.start(), m.end())).unwrap_or_default();
        let params = parse_params(caps.get(2).map(|m| m.as_str()).unwrap_or(""));
        if params.is_empty() {
            continue;
        }
        // the opening brace is the last byte of the match
        let Some(close) = matching_brace(&mask, function.1 - 1) else {
            continue;
        };
        edits.push((function.0, format!("[{}, ", quote_list(&params))));
        edits.push((close + 1, "]".to_string()));
    }

    for seg in segments(source) {
        if seg.region != Region::BlockComment || !seg.text.contains("@ngInject") {
            continue;
        }
        let after = seg.start + seg.text.len();
        let Some(caps) = declaration_regex().captures(&mask[after..]) else {
            continue;
        };
        let name = &caps[1];
        if mask.contains(&format!("{}.$inject", name)) {
            continue;
        }
        let params = parse_params(&caps[2]);
        let line_start = source[..seg.start].rfind('\n').map(|p| p + 1).unwrap_or(0);
        let indent = &source[line_start..seg.start];
        let indent = if indent.trim().is_empty() { indent } else { "" };
        edits.push((
            seg.start,
            format!("{}.$inject = [{}];\n{}", name, quote_list(&params), indent),
        ));
    }

    // later offsets first so earlier ones stay valid; stable for equal offsets
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out = source.to_string();
    for (pos, text) in edits {
        out.insert_str(pos, &text);
    }
    out
}

fn parse_params(params: &str) -> Vec<String> {
    params
        .split(',')
        .map(|p| p.split('=').next().unwrap_or("").trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn quote_list(params: &[String]) -> String {
    params.iter().map(|p| format!("'{}'", p)).collect::<Vec<_>>().join(", ")
}

/// Offset of the `}` closing the `{` at `open`, looking only at code.
fn matching_brace(mask: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, byte) in mask.bytes().enumerate().skip(open) {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}
