//! Bower dependency injection
//!
//! Reads `bower.json`, walks the installed packages under the library
//! directory and fills the `<!-- bower:js -->` / `<!-- bower:css -->` blocks
//! of an HTML file, dependencies before their dependents.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::inject::{replace_block, AssetKind};
use super::{normalize, relative_url};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    dependencies: Map<String, Value>,
    #[serde(default)]
    main: Option<MainField>,
    #[serde(default)]
    overrides: Map<String, Value>,
}

/// `main` is either a single path or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MainField {
    One(String),
    Many(Vec<String>),
}

impl MainField {
    fn paths(&self) -> Vec<String> {
        match self {
            MainField::One(path) => vec![path.clone()],
            MainField::Many(paths) => paths.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Override {
    #[serde(default)]
    main: Option<MainField>,
    #[serde(default)]
    dependencies: Option<Map<String, Value>>,
}

/// Library files to reference, in injection order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BowerFiles {
    pub js: Vec<PathBuf>,
    pub css: Vec<PathBuf>,
    /// Declared packages that are not installed
    pub missing: Vec<String>,
}

struct Resolver<'a> {
    libs_dir: &'a Path,
    overrides: Map<String, Value>,
    visited: HashSet<String>,
    files: BowerFiles,
}

/// Collect the main files of every dependency declared in `bower_json`.
pub fn resolve(bower_json: &Path, libs_dir: &Path) -> Result<BowerFiles> {
    let manifest = read_manifest(bower_json)?
        .with_context(|| format!("Dependency manifest not found: {}", bower_json.display()))?;

    let mut resolver = Resolver {
        libs_dir,
        overrides: manifest.overrides,
        visited: HashSet::new(),
        files: BowerFiles::default(),
    };

    for name in manifest.dependencies.keys() {
        resolver.visit(name)?;
    }

    Ok(resolver.files)
}

impl Resolver<'_> {
    fn visit(&mut self, name: &str) -> Result<()> {
        if !self.visited.insert(name.to_string()) {
            return Ok(());
        }

        let package_dir = self.libs_dir.join(name);
        let manifest = match read_manifest(&package_dir.join(".bower.json"))? {
            Some(m) => m,
            None => match read_manifest(&package_dir.join("bower.json"))? {
                Some(m) => m,
                None => {
                    tracing::warn!(package = name, "bower package is not installed");
                    self.files.missing.push(name.to_string());
                    return Ok(());
                }
            },
        };

        let override_entry: Override = match self.overrides.get(name) {
            Some(value) => serde_json::from_value(value.clone())
                .with_context(|| format!("Invalid override for bower package '{}'", name))?,
            None => Override::default(),
        };

        let dependencies = override_entry.dependencies.unwrap_or(manifest.dependencies);
        for dep in dependencies.keys() {
            self.visit(dep)?;
        }

        let mains = override_entry.main.or(manifest.main).map(|m| m.paths()).unwrap_or_default();
        for main in mains {
            for path in expand_main(&package_dir, &main)? {
                match AssetKind::of(&path) {
                    Some(AssetKind::Js) => self.files.js.push(path),
                    Some(AssetKind::Css) => self.files.css.push(path),
                    None => {}
                }
            }
        }

        Ok(())
    }
}

fn read_manifest(path: &Path) -> Result<Option<Manifest>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let manifest = serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(manifest))
}

fn expand_main(package_dir: &Path, main: &str) -> Result<Vec<PathBuf>> {
    let joined = normalize(&package_dir.join(main.trim_start_matches("./")));
    if !main.contains(['*', '?', '[']) {
        return Ok(vec![joined]);
    }

    let pattern = joined.to_string_lossy().into_owned();
    let mut paths = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("Invalid main pattern '{}'", main))? {
        paths.push(entry?);
    }
    Ok(paths)
}

/// Fill the bower blocks of `html`.
///
/// Returns the new document and the names of blocks that had files to
/// inject but were not present.
pub fn inject_bower(html: &str, files: &BowerFiles, index_path: &Path) -> (String, Vec<&'static str>) {
    let index_dir = index_path.parent().unwrap_or_else(|| Path::new(""));
    let mut out = html.to_string();
    let mut missing_blocks = Vec::new();

    for (kind, paths) in [(AssetKind::Css, &files.css), (AssetKind::Js, &files.js)] {
        let lines: Vec<String> = paths.iter().map(|p| kind.tag(&relative_url(index_dir, p))).collect();
        let start = format!("bower:{}", kind.name());
        match replace_block(&out, &start, "endbower", &lines) {
            Some(replaced) => out = replaced,
            None if !lines.is_empty() => missing_blocks.push(kind.name()),
            None => {}
        }
    }

    (out, missing_blocks)
}
