//! JSON-lines lifecycle tracing for the capture and playback threads.

use crate::config::AppConfig;
use crate::log_debug;
use std::env;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;

const TRACE_LOG_ENV: &str = "COVAS_VOICE_TRACE_LOG";
const TRACE_LOG_FILE: &str = "covas_voice_trace.jsonl";

static TRACING_INIT: OnceLock<Option<PathBuf>> = OnceLock::new();

pub(crate) fn tracing_log_path() -> PathBuf {
    resolve_trace_path(env::var(TRACE_LOG_ENV).ok())
}

fn resolve_trace_path(override_path: Option<String>) -> PathBuf {
    match override_path.map(|raw| raw.trim().to_string()) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => env::temp_dir().join(TRACE_LOG_FILE),
    }
}

/// Content logging lowers the cap to DEBUG so per-chunk events are kept too.
fn max_level(config: &AppConfig) -> Level {
    if config.log_content {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

fn open_trace_file(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            log_debug(&format!(
                "trace log {} unavailable: {err}",
                path.display()
            ));
            None
        }
    }
}

/// Install the JSON subscriber once. A no-op unless file logging is enabled.
pub(crate) fn init_tracing(config: &AppConfig) {
    if !config.logs || config.no_logs {
        return;
    }

    let installed = TRACING_INIT.get_or_init(|| {
        let path = tracing_log_path();
        let file = open_trace_file(&path)?;
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_max_level(max_level(config))
            .with_target(true)
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok()?;
        Some(path)
    });

    if let Some(path) = installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            trace_log = %path.display(),
            "tracing initialized"
        );
    }
}
