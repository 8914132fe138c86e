//! Tracing subscriber setup

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a numeric level (0-7, syslog order) to a tracing level; other input
/// is returned unchanged as a filter directive
pub fn filter_directive(log_level: &str) -> String {
    let level = match log_level.trim().parse::<u8>() {
        Ok(0..=3) => "error",
        Ok(4) => "warn",
        Ok(5) => "info",
        Ok(6) => "debug",
        Ok(_) => "trace",
        Err(_) => return log_level.trim().to_string(),
    };
    level.to_string()
}

fn build_filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(log_level)))
        .context("Failed to initialize logging filter")
}

/// Install the global subscriber: stdout when `debug`, otherwise append to
/// `log_path`
pub fn init(log_level: &str, debug: bool, log_path: &Path) -> Result<()> {
    let filter = build_filter(log_level)?;

    if debug {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(());
    }

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();

    Ok(())
}
