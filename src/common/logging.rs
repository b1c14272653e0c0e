//! Logging and tracing configuration
//!
//! Logs are controlled by the `RUST_LOG` environment variable. Without it the
//! crate logs at INFO (DEBUG when the debug toggle is set) and dependencies
//! at WARN.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

fn default_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("story_bridge=debug,info")
        } else {
            EnvFilter::new("story_bridge=info,warn")
        }
    })
}

/// Initialize tracing to stderr
pub fn init(debug: bool) {
    tracing_subscriber::registry()
        .with(default_filter(debug))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing to stderr plus an appended log file
///
/// The file lives at `<data dir>/logs/story-bridge.log`. Falls back to
/// stderr-only logging if the file cannot be opened.
pub fn init_with_file(debug: bool) -> Option<PathBuf> {
    let log_file = paths::log_dir().and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        Some(dir.join("story-bridge.log"))
    });

    let Some(log_path) = log_file else {
        init(debug);
        return None;
    };

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => {
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            let stderr_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact();

            tracing_subscriber::registry()
                .with(default_filter(debug))
                .with(file_layer)
                .with(stderr_layer)
                .init();

            Some(log_path)
        }
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            init(debug);
            None
        }
    }
}
