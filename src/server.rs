//! Static file server with live reload
//!
//! Serves a directory, then the fallback page's own directory, answering
//! unknown paths with the fallback page so client-side routes work on reload. With live reload on, served HTML gets
//! a small client script that listens on a websocket and reloads the page
//! when the server announces a change.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use colored::Colorize;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tower_http::services::{ServeDir, ServeFile};

use crate::config::Config;
use crate::log;
use crate::task::Services;
use crate::watcher::EXCLUDED_DIRS;

const LIVERELOAD_PATH: &str = "/__livereload";
const CLIENT_PATH: &str = "/__livereload.js";
const RELOAD_DEBOUNCE_MS: u64 = 200;
/// Largest HTML document the script is injected into
const MAX_HTML_BYTES: usize = 16 * 1024 * 1024;

const CLIENT_SCRIPT: &str = r#"(function () {
  var protocol = location.protocol === 'https:' ? 'wss:' : 'ws:';
  function connect() {
    var socket = new WebSocket(protocol + '//' + location.host + '/__livereload');
    socket.onmessage = function (event) {
      if (event.data === 'reload') {
        location.reload();
      }
    };
    socket.onclose = function () {
      setTimeout(connect, 1000);
    };
  }
  connect();
})();
"#;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Service name, used in logs
    pub name: String,
    pub root: PathBuf,
    /// Served for paths that match no file
    pub fallback: PathBuf,
    pub host: String,
    pub port: u16,
    pub livereload: bool,
    pub open: bool,
}

impl ServerOptions {
    /// Options for serving `root` with the server settings of `config`.
    pub fn from_config(name: &str, config: &Config, root: PathBuf, fallback: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            root,
            fallback,
            host: config.server.host.clone(),
            port: config.server.port,
            livereload: config.server.livereload,
            open: config.server.open,
        }
    }
}

struct LiveReload {
    tx: broadcast::Sender<()>,
}

fn router(options: &ServerOptions, reload: broadcast::Sender<()>) -> Router {
    // files beside the fallback page are also served from `/`
    let page_dir = options.fallback.parent().unwrap_or(options.root.as_path());
    let files = ServeDir::new(&options.root)
        .fallback(ServeDir::new(page_dir).fallback(ServeFile::new(&options.fallback)));

    if !options.livereload {
        return Router::new().fallback_service(files);
    }

    Router::new()
        .route(LIVERELOAD_PATH, get(livereload_socket))
        .route(CLIENT_PATH, get(client_script))
        .fallback_service(files)
        .layer(middleware::from_fn(inject_client))
        .with_state(Arc::new(LiveReload { tx: reload }))
}

/// Bind and start serving in the background.
///
/// Returns the bound address once the socket accepts connections.
pub async fn start(options: ServerOptions, services: &Services) -> Result<SocketAddr> {
    if !options.root.is_dir() {
        anyhow::bail!("Server root {} is not a directory", options.root.display());
    }
    if !options.fallback.is_file() {
        tracing::warn!(fallback = %options.fallback.display(), "fallback page does not exist");
    }

    let listener = tokio::net::TcpListener::bind((options.host.as_str(), options.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", options.host, options.port))?;
    let address = listener.local_addr()?;
    let url = format!("http://{}:{}/", options.host, address.port());

    let app = router(&options, services.reload_sender());
    services.spawn(&options.name, async move {
        axum::serve(listener, app).await.context("Server stopped unexpectedly")
    });

    if options.livereload {
        watch_root(&options, services)?;
    }

    log::line(format_args!(
        "{} {} {}",
        "Server started".green(),
        url.cyan(),
        format!("({})", options.root.display()).dimmed()
    ));

    if options.open {
        if let Err(e) = open_browser(&url) {
            tracing::warn!(error = %e, url = %url, "could not open a browser");
        }
    }

    Ok(address)
}

/// Broadcast a reload whenever something under the served root changes.
fn watch_root(options: &ServerOptions, services: &Services) -> Result<()> {
    let root = options
        .root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", options.root.display()))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    )
    .context("Failed to create file watcher")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", root.display()))?;

    let reload = services.reload_sender();
    services.spawn(&format!("{}-livereload", options.name), async move {
        let _watcher = watcher;

        while let Some(event) = rx.recv().await {
            if event.kind.is_access() || !event.paths.iter().any(|p| is_served_change(&root, p)) {
                continue;
            }
            tokio::time::sleep(Duration::from_millis(RELOAD_DEBOUNCE_MS)).await;
            while rx.try_recv().is_ok() {}

            tracing::debug!("served files changed, reloading browsers");
            let _ = reload.send(());
        }
        Ok(())
    });

    Ok(())
}

fn is_served_change(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    !relative.components().any(|c| match c {
        Component::Normal(name) => EXCLUDED_DIRS.iter().any(|dir| name == *dir),
        _ => false,
    })
}

async fn client_script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], CLIENT_SCRIPT)
}

async fn livereload_socket(State(state): State<Arc<LiveReload>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let rx = state.tx.subscribe();
    ws.on_upgrade(move |socket| forward_reloads(socket, rx))
}

async fn forward_reloads(mut socket: WebSocket, mut rx: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if socket.send(Message::Text("reload".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
}

/// Add the client script to successful HTML responses.
async fn inject_client(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/html"))
        .unwrap_or(false);
    if response.status() != StatusCode::OK || !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_HTML_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let html = with_client_script(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

/// Insert the client script tag before the closing `</body>`, or append it.
pub fn with_client_script(html: &str) -> String {
    let tag = format!("<script src=\"{}\"></script>", CLIENT_PATH);
    if html.contains(&tag) {
        return html.to_string();
    }

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => format!("{}{}\n{}", &html[..pos], tag, &html[pos..]),
        None => format!("{}{}\n", html, tag),
    }
}

fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    let mut command = Command::new("open");
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut command = Command::new("xdg-open");

    command
        .arg(url)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to open {}", url))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn http_get(address: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn options(dir: &TempDir, livereload: bool) -> ServerOptions {
        ServerOptions {
            name: "test-server".to_string(),
            root: dir.path().to_path_buf(),
            fallback: dir.path().join("index.html"),
            host: "127.0.0.1".to_string(),
            port: 0,
            livereload,
            open: false,
        }
    }

    #[test]
    fn test_with_client_script() {
        assert_eq!(
            with_client_script("<html><body><p>hi</p></BODY></html>"),
            "<html><body><p>hi</p><script src=\"/__livereload.js\"></script>\n</BODY></html>"
        );
        assert_eq!(
            with_client_script("<p>fragment</p>"),
            "<p>fragment</p><script src=\"/__livereload.js\"></script>\n"
        );
        let once = with_client_script("<body></body>");
        assert_eq!(with_client_script(&once), once);
    }

    #[test]
    fn test_is_served_change_skips_excluded_dirs() {
        let root = Path::new("/srv/site");
        assert!(is_served_change(root, Path::new("/srv/site/app/app.js")));
        assert!(!is_served_change(root, Path::new("/srv/site/node_modules/x/index.js")));
        assert!(!is_served_change(root, Path::new("/other/app.js")));
    }

    #[tokio::test]
    async fn test_serves_files_and_falls_back_to_index() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<html><body>home</body></html>").unwrap();
        fs::write(dir.path().join("app.js"), "var a = 1;").unwrap();

        let services = Services::new();
        let address = start(options(&dir, true), &services).await.unwrap();

        let js = http_get(address, "/app.js").await;
        assert!(js.starts_with("HTTP/1.1 200"));
        assert!(js.ends_with("var a = 1;"));

        let page = http_get(address, "/accounts/42").await;
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains("home<script src=\"/__livereload.js\"></script>"));

        let client = http_get(address, CLIENT_PATH).await;
        assert!(client.contains("new WebSocket"));
    }

    #[tokio::test]
    async fn test_serves_files_next_to_the_fallback_page() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::create_dir_all(dir.path().join("bower_components/angular")).unwrap();
        fs::write(dir.path().join("app/index.html"), "<html><body>home</body></html>").unwrap();
        fs::write(dir.path().join("app/app.module.js"), "angular.module('app', []);").unwrap();
        fs::write(dir.path().join("bower_components/angular/angular.js"), "window.angular = {};").unwrap();

        let mut opts = options(&dir, false);
        opts.fallback = dir.path().join("app/index.html");
        let address = start(opts, &Services::new()).await.unwrap();

        let page = http_get(address, "/").await;
        assert!(page.ends_with("<html><body>home</body></html>"));
        let module = http_get(address, "/app.module.js").await;
        assert!(module.ends_with("angular.module('app', []);"));
        let rooted = http_get(address, "/app/app.module.js").await;
        assert!(rooted.ends_with("angular.module('app', []);"));
        let vendor = http_get(address, "/bower_components/angular/angular.js").await;
        assert!(vendor.ends_with("window.angular = {};"));
    }

    #[tokio::test]
    async fn test_livereload_off_serves_html_untouched() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<html><body>home</body></html>").unwrap();

        let services = Services::new();
        let address = start(options(&dir, false), &services).await.unwrap();

        let page = http_get(address, "/").await;
        assert!(page.ends_with("<html><body>home</body></html>"));
        assert!(!page.contains("__livereload"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_an_error() {
        let dir = TempDir::new().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

        let mut opts = options(&dir, false);
        opts.port = taken.local_addr().unwrap().port();

        let err = start(opts, &Services::new()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to bind"));
    }
}
