//! Reference injection into HTML between comment markers
//!
//! ```html
//! <!-- inject:js -->
//! <script src="app.module.js"></script>
//! <!-- endinject -->
//! ```

use regex::Regex;
use std::path::Path;

use super::{relative_url, FileRecord};

/// Kind of asset reference an HTML tag points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Js,
    Css,
}

impl AssetKind {
    pub fn of(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("js") => Some(AssetKind::Js),
            Some("css") => Some(AssetKind::Css),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AssetKind::Js => "js",
            AssetKind::Css => "css",
        }
    }

    pub fn tag(self, url: &str) -> String {
        match self {
            AssetKind::Js => format!("<script src=\"{}\"></script>", url),
            AssetKind::Css => format!("<link rel=\"stylesheet\" href=\"{}\">", url),
        }
    }
}

/// Replace the contents of every `<!-- {start} -->` … `<!-- {end} -->` block.
///
/// Lines are placed one per line, indented like the start marker. Returns
/// `None` when the document has no such block.
pub fn replace_block(html: &str, start: &str, end: &str, lines: &[String]) -> Option<String> {
    let pattern = format!(
        r"(?s)([ \t]*)(<!--\s*{}\s*-->)(.*?)(<!--\s*{}\s*-->)",
        regex::escape(start),
        regex::escape(end)
    );
    let re = Regex::new(&pattern).ok()?;
    if !re.is_match(html) {
        return None;
    }

    let replaced = re.replace_all(html, |caps: &regex::Captures| {
        let indent = &caps[1];
        let mut block = format!("{}{}\n", indent, &caps[2]);
        for line in lines {
            block.push_str(indent);
            block.push_str(line);
            block.push('\n');
        }
        block.push_str(indent);
        block.push_str(&caps[4]);
        block
    });

    Some(replaced.into_owned())
}

/// Insert an empty `start`/`end` block on its own line before `closing_tag`,
/// or at the end of the document when the tag is missing.
pub fn insert_block(html: &str, start: &str, end: &str, closing_tag: &str) -> String {
    let Some(tag_pos) = html.find(closing_tag) else {
        let sep = if html.ends_with('\n') || html.is_empty() { "" } else { "\n" };
        return format!("{}{}<!-- {} -->\n<!-- {} -->\n", html, sep, start, end);
    };

    let line_start = html[..tag_pos].rfind('\n').map(|p| p + 1).unwrap_or(0);
    let leading = &html[line_start..tag_pos];
    let (insert_at, indent, prefix) = if leading.trim().is_empty() {
        (line_start, format!("{}    ", leading), "")
    } else {
        // closing tag shares its line with other markup
        (tag_pos, String::new(), "\n")
    };

    let block = format!("{}{}<!-- {} -->\n{}<!-- {} -->\n", prefix, indent, start, indent, end);
    let mut out = String::with_capacity(html.len() + block.len());
    out.push_str(&html[..insert_at]);
    out.push_str(&block);
    out.push_str(&html[insert_at..]);
    out
}

/// URL an injected file is referenced by.
///
/// Relative URLs are computed from the index file's directory; otherwise the
/// path is absolute from the served root.
pub fn reference_url(file: &Path, index_path: &Path, root: &Path, relative: bool) -> String {
    if relative {
        let index_dir = index_path.parent().unwrap_or_else(|| Path::new(""));
        relative_url(index_dir, file)
    } else {
        format!("/{}", relative_url(root, file))
    }
}

/// Inject `<script>` and `<link>` tags for `files` into `html`.
///
/// Files are referenced in the order given. Missing `inject:css` and
/// `inject:js` blocks are created before `</head>` and `</body>`.
pub fn inject_sources(html: &str, files: &[FileRecord], index_path: &Path, root: &Path, relative: bool) -> String {
    let mut out = html.to_string();

    for (kind, closing_tag) in [(AssetKind::Css, "</head>"), (AssetKind::Js, "</body>")] {
        let start = format!("inject:{}", kind.name());
        let lines: Vec<String> = files
            .iter()
            .filter(|f| AssetKind::of(&f.path) == Some(kind))
            .map(|f| kind.tag(&reference_url(&f.path, index_path, root, relative)))
            .collect();

        out = match replace_block(&out, &start, "endinject", &lines) {
            Some(replaced) => replaced,
            None => {
                tracing::debug!(block = %start, "adding missing inject block");
                let with_block = insert_block(&out, &start, "endinject", closing_tag);
                replace_block(&with_block, &start, "endinject", &lines).unwrap_or(with_block)
            }
        };
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const INDEX: &str = "<html>\n  <head>\n    <title>App</title>\n  </head>\n  <body>\n    <div ng-view></div>\n  </body>\n</html>\n";

    fn record(path: &str) -> FileRecord {
        FileRecord::new(path, "app", None)
    }

    #[test]
    fn test_replace_block_uses_marker_indent() {
        let html = "<body>\n  <!-- inject:js -->\n  <script src=\"old.js\"></script>\n  <!-- endinject -->\n</body>";
        let out = replace_block(html, "inject:js", "endinject", &["<script src=\"new.js\"></script>".to_string()]).unwrap();
        assert_eq!(
            out,
            "<body>\n  <!-- inject:js -->\n  <script src=\"new.js\"></script>\n  <!-- endinject -->\n</body>"
        );
    }

    #[test]
    fn test_replace_block_missing_markers() {
        assert!(replace_block("<body></body>", "inject:js", "endinject", &[]).is_none());
    }

    #[test]
    fn test_inject_creates_blocks_and_relative_paths() {
        let files = vec![record("app/app.module.js"), record("app/accounts/accounts.factory.js")];
        let out = inject_sources(INDEX, &files, Path::new("app/index.html"), Path::new(""), true);

        assert_eq!(out.matches("<script src=").count(), 2);
        let first = out.find("<script src=\"app.module.js\"></script>").unwrap();
        let second = out.find("<script src=\"accounts/accounts.factory.js\"></script>").unwrap();
        assert!(first < second);
        assert!(out.find("<!-- inject:css -->").unwrap() < out.find("</head>").unwrap());
        assert!(out.find("<!-- endinject -->").is_some());
    }

    #[test]
    fn test_inject_is_idempotent() {
        let files = vec![record("app/app.module.js"), record("app/app.css")];
        let index = Path::new("app/index.html");
        let once = inject_sources(INDEX, &files, index, Path::new(""), true);
        let twice = inject_sources(&once, &files, index, Path::new(""), true);
        assert_eq!(once, twice);
        assert_eq!(once.matches("<link rel=\"stylesheet\" href=\"app.css\">").count(), 1);
    }

    #[test]
    fn test_root_absolute_urls() {
        let url = reference_url(
            &PathBuf::from("/srv/site/app/app.js"),
            Path::new("/srv/site/app/index.html"),
            Path::new("/srv/site"),
            false,
        );
        assert_eq!(url, "/app/app.js");
    }

    #[test]
    fn test_insert_block_without_closing_tag() {
        let out = insert_block("<div></div>", "inject:js", "endinject", "</body>");
        assert_eq!(out, "<div></div>\n<!-- inject:js -->\n<!-- endinject -->\n");
    }
}
