//! The task catalog
//!
//! Every build task and its prerequisites. Prerequisites run in the order
//! listed; see [`TaskGraph::resolve`].

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::error::GraphError;
use crate::graph::TaskGraph;
use crate::lint::{self, JsHint, JsHintOptions, Jscs, JscsOptions, Linter};
use crate::log;
use crate::pipeline::annotate::annotate;
use crate::pipeline::inject::inject_sources;
use crate::pipeline::minify::{compress_image, minify_css, minify_js, text_transform};
use crate::pipeline::{dest, map, src, useref, when, wiredep, FileRecord, Pipeline};
use crate::server::{self, ServerOptions};
use crate::task::{action, TaskContext};
use crate::watcher;

/// Build the graph of all tasks.
pub fn catalog() -> Result<TaskGraph, GraphError> {
    let mut graph = TaskGraph::new();

    graph.register_described(
        "serve",
        "Inject sources, start the development server and watch for changes",
        &["bower-html-inject", "webserver", "watchers"],
        Some(action(serve)),
    )?;
    graph.register_described(
        "webserver",
        "Serve the project root with live reload",
        &["dev-settings"],
        Some(action(webserver)),
    )?;
    graph.register_described(
        "serve-production",
        "Build, then serve the build directory",
        &["build"],
        Some(action(serve_production)),
    )?;
    graph.register_described(
        "watchers",
        "Re-run html-inject when sources change",
        &[],
        Some(action(watchers)),
    )?;
    graph.register_described(
        "html-inject",
        "Reference project scripts and stylesheets in the index",
        &[],
        Some(action(html_inject)),
    )?;
    graph.register_described(
        "bower-html-inject",
        "Reference bower dependencies in the index",
        &["html-inject"],
        Some(action(bower_html_inject)),
    )?;
    graph.register_described("check", "Run both style checkers", &["check-jscs"], None)?;
    graph.register_described(
        "check-jshint",
        "Check scripts for code-quality problems",
        &[],
        Some(action(check_jshint)),
    )?;
    graph.register_described(
        "check-jscs",
        "Check scripts for code-style problems",
        &["check-jshint"],
        Some(action(check_jscs)),
    )?;
    graph.register_described(
        "build",
        "Concatenate, annotate and minify the app into the build directory",
        &["bower-html-inject", "html-inject", "images", "production-settings"],
        Some(action(build)),
    )?;
    graph.register_described(
        "images",
        "Compress images into the build directory",
        &[],
        Some(action(images)),
    )?;
    graph.register_described(
        "dev-settings",
        "Copy the development settings file into the app",
        &[],
        Some(action(dev_settings)),
    )?;
    graph.register_described(
        "production-settings",
        "Copy the production settings file into the app",
        &[],
        Some(action(production_settings)),
    )?;
    graph.register_described("help", "List the available tasks", &[], Some(action(help)))?;
    graph.register_described("default", "Same as help", &["help"], None)?;

    Ok(graph)
}

/// Run blocking file work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.context("Worker thread panicked")?
}

async fn serve(_ctx: TaskContext) -> Result<()> {
    log::banner("Serving Development");
    Ok(())
}

async fn webserver(ctx: TaskContext) -> Result<()> {
    let config = &ctx.config;
    let options = ServerOptions::from_config("webserver", config, config.root_dir(), config.index_path());
    server::start(options, &ctx.services).await?;
    Ok(())
}

async fn serve_production(ctx: TaskContext) -> Result<()> {
    log::banner("Serving Production Build");
    let config = &ctx.config;
    let build_dir = config.build_dir();
    let fallback = build_dir.join("index.html");
    let options = ServerOptions::from_config("serve-production", config, build_dir, fallback);
    server::start(options, &ctx.services).await?;
    Ok(())
}

async fn watchers(ctx: TaskContext) -> Result<()> {
    log::banner("Setting Up Watchers");
    watcher::start(&ctx)
}

/// Read the index file(s) named by the config.
fn read_index(config: &Config) -> Result<Vec<FileRecord>> {
    let pages = src(config.base_dir(), std::slice::from_ref(&config.index), true)?;
    if pages.is_empty() {
        anyhow::bail!("Index file not found: {}", config.index_path().display());
    }
    Ok(pages)
}

async fn html_inject(ctx: TaskContext) -> Result<()> {
    log::banner("Custom Code HTML Inject");
    let config = Arc::clone(&ctx.config);

    blocking(move || {
        let sources = src(config.base_dir(), &config.source_globs(), false)?;
        let root = config.root_dir();

        let mut pages = read_index(&config)?;
        for page in &mut pages {
            let html = inject_sources(page.text()?, &sources, &page.path, &root, config.inject.relative);
            page.set_text(html);
            log::line(format_args!(
                "Injected {} file(s) into {}",
                sources.len().to_string().magenta(),
                page.file_name()
            ));
        }

        dest(&pages, &config.app_dir())?;
        Ok(())
    })
    .await
}

async fn bower_html_inject(ctx: TaskContext) -> Result<()> {
    log::banner("Bower Dependencies HTML Inject");
    let config = Arc::clone(&ctx.config);

    blocking(move || {
        let files = wiredep::resolve(&config.bower_json_path(), &config.libs_dir())?;
        for package in &files.missing {
            log::line(format_args!(
                "{} package '{}' is not installed in {}",
                "Warning:".yellow(),
                package,
                config.libs
            ));
        }

        let mut pages = read_index(&config)?;
        for page in &mut pages {
            let (html, missing_blocks) = wiredep::inject_bower(page.text()?, &files, &page.path);
            for block in missing_blocks {
                log::line(format_args!(
                    "{} {} has no <!-- bower:{} --> block, {} references not injected",
                    "Warning:".yellow(),
                    page.file_name(),
                    block,
                    block
                ));
            }
            page.set_text(html);
        }

        dest(&pages, &config.app_dir())?;
        Ok(())
    })
    .await
}

/// Lint the configured scripts and report what was found.
fn run_linter(config: &Config, linter: &dyn Linter, fail: bool) -> Result<()> {
    let files = src(config.base_dir(), &config.js_files, true)?;
    let violations = lint::lint_files(linter, &files)?;
    lint::report(linter.name(), &violations, files.len(), config.base_dir());

    if fail && !violations.is_empty() {
        anyhow::bail!("{} found {} problem(s)", linter.name(), violations.len());
    }
    Ok(())
}

fn fails_on_lint(ctx: &TaskContext) -> bool {
    ctx.options.fail_on_lint || ctx.config.lint.fail_on_violation
}

async fn check_jshint(ctx: TaskContext) -> Result<()> {
    let config = Arc::clone(&ctx.config);
    let fail = fails_on_lint(&ctx);

    blocking(move || {
        let options: JsHintOptions = lint::load_rc(&config.path(&config.lint.jshintrc))?.unwrap_or_default();
        run_linter(&config, &JsHint::new(options), fail)
    })
    .await
}

async fn check_jscs(ctx: TaskContext) -> Result<()> {
    log::banner("Code check using JSHint and JSCS");
    let config = Arc::clone(&ctx.config);
    let fail = fails_on_lint(&ctx);

    blocking(move || {
        let options = lint::load_rc(&config.path(&config.lint.jscsrc))?.unwrap_or_else(JscsOptions::preset);
        run_linter(&config, &Jscs::new(options), fail)
    })
    .await
}

/// Configured tool command with `~` and variables expanded.
fn tool(command: &Option<Vec<String>>) -> Result<Option<Vec<String>>> {
    command.as_deref().map(Config::expand_command).transpose()
}

async fn build(ctx: TaskContext) -> Result<()> {
    log::banner("Building App for Production");
    let config = Arc::clone(&ctx.config);

    blocking(move || {
        let uglify = tool(&config.tools.uglify)?;
        let cleancss = tool(&config.tools.cleancss)?;

        let pipeline = Pipeline::new()
            .stage("useref", useref::stage(config.root_dir()))
            .stage(
                "annotate",
                when("*.js", |mut file: FileRecord| {
                    let annotated = annotate(file.text()?);
                    file.set_text(annotated);
                    Ok(file)
                }),
            )
            .stage("uglify", when("*.js", text_transform(uglify, |source| Ok(minify_js(source)))))
            .stage("minify-css", when("*.css", text_transform(cleancss, minify_css)));

        let pages = src(config.base_dir(), &config.html_files, true)?;
        let output = pipeline.run(pages)?;
        let build_dir = config.build_dir();
        let written = dest(&output, &build_dir)?;

        log::line(format_args!(
            "Wrote {} file(s) to {}",
            written.len().to_string().magenta(),
            config.build
        ));
        Ok(())
    })
    .await
}

async fn images(ctx: TaskContext) -> Result<()> {
    log::banner("Compressing and Copying Images to Build Folder");
    let config = Arc::clone(&ctx.config);

    blocking(move || {
        let imagemin = tool(&config.tools.imagemin)?;
        let files = src(config.base_dir(), std::slice::from_ref(&config.images), true)?;

        let compress = map(move |file| compress_image(imagemin.as_deref(), file));
        let output = Pipeline::new().stage("imagemin", compress).run(files)?;
        let written = dest(&output, &config.build_dir().join("images"))?;

        log::line(format_args!("Copied {} image(s)", written.len().to_string().magenta()));
        Ok(())
    })
    .await
}

/// Copy a settings file into the app directory.
fn copy_settings(config: &Config, settings: &str) -> Result<PathBuf> {
    let files = src(config.base_dir(), &[settings.to_string()], false)?;
    if files.is_empty() {
        anyhow::bail!("Settings file not found: {}", config.path(settings).display());
    }
    let written = dest(&files, &config.app_dir())?;
    written.into_iter().next().context("Settings file was not written")
}

async fn dev_settings(ctx: TaskContext) -> Result<()> {
    log::banner("Copying Development Settings File");
    let config = Arc::clone(&ctx.config);
    blocking(move || copy_settings(&config, &config.dev_settings).map(|_| ())).await
}

async fn production_settings(ctx: TaskContext) -> Result<()> {
    log::banner("Copying Production Settings File");
    let config = Arc::clone(&ctx.config);
    blocking(move || copy_settings(&config, &config.production_settings).map(|_| ())).await
}

async fn help(ctx: TaskContext) -> Result<()> {
    print_listing(ctx.runner.graph());
    Ok(())
}

/// Print main tasks and subtasks with their descriptions.
pub fn print_listing(graph: &TaskGraph) {
    let listing = graph.listing();

    for (title, names) in [("Main Tasks", &listing.main), ("Sub Tasks", &listing.sub)] {
        println!("\n{}", title.bold());
        println!("{}", "-".repeat(30).dimmed());
        for name in names {
            let description = graph
                .task(name)
                .and_then(|t| t.description.as_deref())
                .unwrap_or("");
            println!("    {}{}", format!("{:<22}", name).cyan(), description.dimmed());
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_prerequisites() {
        let graph = catalog().unwrap();
        let expected: &[(&str, &[&str])] = &[
            ("serve", &["bower-html-inject", "webserver", "watchers"]),
            ("webserver", &["dev-settings"]),
            ("serve-production", &["build"]),
            ("watchers", &[]),
            ("html-inject", &[]),
            ("bower-html-inject", &["html-inject"]),
            ("check", &["check-jscs"]),
            ("check-jshint", &[]),
            ("check-jscs", &["check-jshint"]),
            ("build", &["bower-html-inject", "html-inject", "images", "production-settings"]),
            ("images", &[]),
            ("dev-settings", &[]),
            ("production-settings", &[]),
            ("help", &[]),
            ("default", &["help"]),
        ];

        assert_eq!(graph.len(), expected.len());
        for (name, prerequisites) in expected {
            let task = graph.task(name).unwrap();
            assert_eq!(task.prerequisites, *prerequisites, "prerequisites of {}", name);
        }
        assert!(graph.task("check").unwrap().is_aggregator());
        assert!(graph.task("default").unwrap().is_aggregator());
    }

    #[test]
    fn test_catalog_resolution_orders() {
        let graph = catalog().unwrap();
        assert_eq!(
            graph.resolve("serve").unwrap(),
            vec!["html-inject", "bower-html-inject", "dev-settings", "webserver", "watchers", "serve"]
        );
        assert_eq!(
            graph.resolve("build").unwrap(),
            vec!["html-inject", "bower-html-inject", "images", "production-settings", "build"]
        );
        assert_eq!(graph.resolve("check").unwrap(), vec!["check-jshint", "check-jscs", "check"]);
        assert_eq!(graph.resolve("default").unwrap(), vec!["help", "default"]);
    }

    #[test]
    fn test_listing_splits_subtasks() {
        let listing = catalog().unwrap().listing();
        assert_eq!(listing.main, vec!["build", "check", "default", "help", "images", "serve", "watchers", "webserver"]);
        assert!(listing.sub.contains(&"html-inject".to_string()));
        assert!(listing.sub.contains(&"serve-production".to_string()));
    }
}
