use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Project layout and tool settings, read once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Index file that receives injected references
    pub index: String,
    /// Directory served by the development server
    pub root: String,
    /// Application root, destination of the rewritten index
    pub app: String,
    /// Output directory of the production build
    pub build: String,
    /// Directory bower installs packages into
    pub libs: String,
    pub images: String,
    pub js_files: Vec<String>,
    pub css_files: Vec<String>,
    pub html_files: Vec<String>,
    pub bower_json: String,
    pub dev_settings: String,
    pub production_settings: String,
    pub inject: InjectConfig,
    pub server: ServerConfig,
    pub lint: LintConfig,
    pub tools: ToolsConfig,

    /// Directory every relative path is resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InjectConfig {
    /// Reference injected files relative to the index file instead of
    /// absolutely from the served root
    pub relative: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub open: bool,
    pub livereload: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LintConfig {
    pub fail_on_violation: bool,
    pub jshintrc: String,
    pub jscsrc: String,
}

/// External commands used instead of the built-in transforms.
///
/// Each command reads the file on stdin and writes the result to stdout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub uglify: Option<Vec<String>>,
    pub cleancss: Option<Vec<String>>,
    pub imagemin: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index: "app/index.html".to_string(),
            root: "./".to_string(),
            app: "app/".to_string(),
            build: "build/app/".to_string(),
            libs: "bower_components/".to_string(),
            images: "app/images/*.*".to_string(),
            js_files: vec!["app/**/*.module.js".to_string(), "app/**/*.js".to_string()],
            css_files: vec!["app/*.css".to_string()],
            html_files: vec!["app/**/*.html".to_string()],
            bower_json: "./bower.json".to_string(),
            dev_settings: "dist/angular/development/app.settings.js".to_string(),
            production_settings: "dist/angular/production/app.settings.js".to_string(),
            inject: InjectConfig::default(),
            server: ServerConfig::default(),
            lint: LintConfig::default(),
            tools: ToolsConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self { relative: true }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            open: true,
            livereload: true,
        }
    }
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            fail_on_violation: false,
            jshintrc: ".jshintrc".to_string(),
            jscsrc: ".jscsrc".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let config = config.with_base_dir(base_dir).expand_paths()?;

        config.validate()?;

        Ok(config)
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Expand `~` and `$VAR` in every configured path and glob.
    pub fn expand_paths(mut self) -> Result<Self> {
        for value in [
            &mut self.index,
            &mut self.root,
            &mut self.app,
            &mut self.build,
            &mut self.libs,
            &mut self.images,
            &mut self.bower_json,
            &mut self.dev_settings,
            &mut self.production_settings,
            &mut self.lint.jshintrc,
            &mut self.lint.jscsrc,
        ] {
            *value = expand(value)?;
        }
        for value in self.js_files.iter_mut().chain(&mut self.css_files).chain(&mut self.html_files) {
            *value = expand(value)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.js_files.is_empty() {
            anyhow::bail!("js_files must list at least one glob");
        }

        let globs = self
            .js_files
            .iter()
            .chain(&self.css_files)
            .chain(&self.html_files)
            .chain(std::iter::once(&self.images));
        for pattern in globs {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid glob pattern '{}'", pattern))?;
        }

        for (name, tool) in [
            ("uglify", &self.tools.uglify),
            ("cleancss", &self.tools.cleancss),
            ("imagemin", &self.tools.imagemin),
        ] {
            if matches!(tool, Some(cmd) if cmd.is_empty()) {
                anyhow::bail!("tools.{} must name a command", name);
            }
        }

        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a configured path against the base directory.
    pub fn path(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.path(&self.index)
    }

    pub fn app_dir(&self) -> PathBuf {
        self.path(&self.app)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.path(&self.build)
    }

    pub fn root_dir(&self) -> PathBuf {
        self.path(&self.root)
    }

    pub fn libs_dir(&self) -> PathBuf {
        self.path(&self.libs)
    }

    pub fn bower_json_path(&self) -> PathBuf {
        self.path(&self.bower_json)
    }

    /// JS globs followed by CSS globs, the set html-inject and the watcher use.
    pub fn source_globs(&self) -> Vec<String> {
        self.js_files.iter().chain(&self.css_files).cloned().collect()
    }

    /// Expand `~` and `$VAR` in a configured tool command line.
    pub fn expand_command(command: &[String]) -> Result<Vec<String>> {
        command.iter().map(|arg| expand(arg)).collect()
    }
}

fn expand(value: &str) -> Result<String> {
    shellexpand::full(value)
        .map(|s| s.into_owned())
        .with_context(|| format!("Failed to expand '{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_project_layout() {
        let config = Config::default();
        assert_eq!(config.index, "app/index.html");
        assert_eq!(config.build, "build/app/");
        assert_eq!(
            config.source_globs(),
            vec!["app/**/*.module.js", "app/**/*.js", "app/*.css"]
        );
        assert!(config.inject.relative);
        assert!(!config.lint.fail_on_violation);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
index = "src/index.html"
js_files = ["src/**/*.js"]

[server]
port = 9000
open = false

[tools]
uglify = ["uglifyjs", "--compress"]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.index, "src/index.html");
        assert_eq!(config.js_files, vec!["src/**/*.js"]);
        assert_eq!(config.css_files, vec!["app/*.css"]);
        assert_eq!(config.server.port, 9000);
        assert!(!config.server.open);
        assert!(config.server.livereload);
        assert_eq!(
            config.tools.uglify,
            Some(vec!["uglifyjs".to_string(), "--compress".to_string()])
        );
    }

    #[test]
    fn test_load_resolves_against_config_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spabuild.toml");
        fs::write(&path, "build = \"out/\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.build_dir(), dir.path().join("out/"));
        assert_eq!(config.index_path(), dir.path().join("app/index.html"));
    }

    #[test]
    fn test_load_expands_variables_in_paths_and_globs() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("SPABUILD_TEST_OUT", "dist/web");
        let path = dir.path().join("spabuild.toml");
        fs::write(
            &path,
            "build = \"$SPABUILD_TEST_OUT/\"\njs_files = [\"${SPABUILD_TEST_OUT}/**/*.js\"]\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.build_dir(), dir.path().join("dist/web/"));
        assert_eq!(config.js_files, vec!["dist/web/**/*.js"]);
    }

    #[test]
    fn test_load_rejects_undefined_variable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spabuild.toml");
        fs::write(&path, "index = \"$SPABUILD_TEST_UNSET_VARIABLE/index.html\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to expand"));
    }

    #[test]
    fn test_rejects_invalid_glob() {
        let config = Config {
            css_files: vec!["app/[*.css".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("indx = \"typo.html\"").is_err());
    }
}
