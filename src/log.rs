//! Console output and tracing setup
//!
//! Progress lines follow the familiar `[HH:MM:SS] message` layout of
//! front-end build tools; diagnostics go through `tracing`.

use chrono::Local;
use colored::Colorize;
use std::fmt::Display;
use tracing_subscriber::EnvFilter;

/// Install the tracing subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let default_level = if verbose { "spabuild=debug" } else { "spabuild=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

fn timestamp() -> String {
    format!("[{}]", Local::now().format("%H:%M:%S")).dimmed().to_string()
}

/// Print a timestamped line.
pub fn line(message: impl Display) {
    println!("{} {}", timestamp(), message);
}

/// Print a highlighted heading, used by task actions to announce themselves.
pub fn banner(message: &str) {
    line(message.white().on_blue());
}

pub fn task_started(name: &str) {
    line(format_args!("Starting '{}'...", name.cyan()));
}

pub fn task_finished(name: &str, duration_ms: u128) {
    line(format_args!(
        "Finished '{}' after {}",
        name.cyan(),
        format_duration(duration_ms).magenta()
    ));
}

pub fn task_failed(name: &str, duration_ms: u128) {
    line(format_args!(
        "'{}' {} after {}",
        name.cyan(),
        "errored".red(),
        format_duration(duration_ms).magenta()
    ));
}

pub fn format_duration(duration_ms: u128) -> String {
    if duration_ms < 1000 {
        format!("{} ms", duration_ms)
    } else {
        format!("{:.2} s", duration_ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(12), "12 ms");
        assert_eq!(format_duration(1500), "1.50 s");
    }
}
