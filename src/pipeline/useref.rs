//! Asset block concatenation
//!
//! HTML files group references into build blocks:
//!
//! ```html
//! <!-- build:js scripts/app.js -->
//! <script src="app.module.js"></script>
//! <script src="accounts/accounts.factory.js"></script>
//! <!-- endbuild -->
//! ```
//!
//! Each block becomes one concatenated asset, and the block is replaced by
//! a single reference to it. `build:remove` blocks are dropped. An optional
//! search directory may follow the type: `build:js(../lib) out.js`.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::inject::AssetKind;
use super::{normalize, FileRecord, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBlock {
    /// `js`, `css` or `remove`
    pub kind: String,
    pub search_path: Option<String>,
    /// Output path relative to the HTML file
    pub output: Option<String>,
    /// Referenced URLs in document order
    pub sources: Vec<String>,
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)([ \t]*)<!--\s*build:(\w+)(?:\(([^)]*)\))?(?:\s+(\S+?))?\s*-->(.*?)<!--\s*endbuild\s*-->(\r?\n)?")
            .expect("build block pattern is valid")
    })
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<(?:script[^>]*?\bsrc|link[^>]*?\bhref)\s*=\s*["']([^"']+)["']"#)
            .expect("reference pattern is valid")
    })
}

fn block_from(caps: &Captures) -> AssetBlock {
    AssetBlock {
        kind: caps[2].to_string(),
        search_path: caps.get(3).map(|m| m.as_str().to_string()),
        output: caps.get(4).map(|m| m.as_str().to_string()),
        sources: reference_regex()
            .captures_iter(&caps[5])
            .map(|r| r[1].to_string())
            .collect(),
    }
}

pub fn parse_blocks(html: &str) -> Vec<AssetBlock> {
    block_regex().captures_iter(html).map(|caps| block_from(&caps)).collect()
}

/// Split one HTML file into the rewritten HTML and one asset per block.
///
/// `root` resolves root-absolute URLs such as `/app/app.js`.
pub fn process(html: &FileRecord, root: &Path) -> Result<Vec<FileRecord>> {
    let text = html.text()?;
    let html_dir = html.path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let mut assets: Vec<FileRecord> = Vec::new();
    let mut failure: Option<anyhow::Error> = None;

    let rewritten = block_regex().replace_all(text, |caps: &Captures| {
        let block = block_from(caps);
        let indent = &caps[1];
        let newline = caps.get(6).map(|m| m.as_str()).unwrap_or("");

        let kind = match block.kind.as_str() {
            "js" => AssetKind::Js,
            "css" => AssetKind::Css,
            "remove" => return String::new(),
            other => {
                tracing::warn!(kind = other, file = %html.path.display(), "unknown build block type, left as is");
                return caps[0].to_string();
            }
        };

        let Some(output) = block.output.as_deref() else {
            failure.get_or_insert_with(|| anyhow::anyhow!("build:{} block without an output path", kind.name()));
            return caps[0].to_string();
        };

        match concatenate(&block, &html_dir, root) {
            Ok(contents) => {
                assets.push(FileRecord::new(
                    normalize(&html_dir.join(output)),
                    html.base.clone(),
                    Some(contents.into_bytes()),
                ));
                format!("{}{}{}", indent, kind.tag(output), newline)
            }
            Err(e) => {
                failure.get_or_insert(e);
                caps[0].to_string()
            }
        }
    });

    if let Some(e) = failure {
        return Err(e.context(format!("Failed to process build blocks of {}", html.path.display())));
    }

    let mut page = html.clone();
    page.set_text(rewritten.into_owned());

    let mut out = vec![page];
    out.extend(assets);
    Ok(out)
}

fn concatenate(block: &AssetBlock, html_dir: &Path, root: &Path) -> Result<String> {
    let search_dir = match block.search_path {
        Some(ref dir) => html_dir.join(dir),
        None => html_dir.to_path_buf(),
    };

    let mut parts = Vec::with_capacity(block.sources.len());
    for url in &block.sources {
        let path = resolve_url(url, &search_dir, root);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Asset '{}' referenced in build block not found at {}", url, path.display()))?;
        parts.push(content.trim_end().to_string());
    }

    let mut joined = parts.join("\n");
    joined.push('\n');
    Ok(joined)
}

fn resolve_url(url: &str, search_dir: &Path, root: &Path) -> PathBuf {
    let clean = url.split(['?', '#']).next().unwrap_or(url);
    match clean.strip_prefix('/') {
        Some(rooted) => normalize(&root.join(rooted)),
        None => normalize(&search_dir.join(clean)),
    }
}

/// Pipeline stage running [`process`] on every HTML file.
///
/// Assets produced by several pages under the same name are emitted once.
pub fn stage(root: PathBuf) -> Stage {
    Box::new(move |files| {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut out = Vec::new();
        for file in files {
            if file.path.extension().and_then(|e| e.to_str()) != Some("html") {
                out.push(file);
                continue;
            }
            for record in process(&file, &root)? {
                if seen.insert(record.path.clone()) {
                    out.push(record);
                }
            }
        }
        Ok(out)
    })
}
