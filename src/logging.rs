//! Opt-in debug log for the capture and playback threads.
//!
//! Writes to a size-capped temp file so nothing ever lands on the assistant's
//! stdout. Transcripts and spoken text only reach the file with `--log-content`.

use crate::config::AppConfig;
use std::{
    env, fs,
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_STATE: OnceLock<Mutex<LogState>> = OnceLock::new();

/// Path to the debug log; `COVAS_VOICE_LOG_FILE` overrides the temp-dir default.
pub fn log_file_path() -> PathBuf {
    env::var("COVAS_VOICE_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("covas_voice.log"))
}

struct LogWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: u64,
    bytes_written: u64,
}

impl LogWriter {
    fn new(path: PathBuf, max_bytes: u64) -> Option<Self> {
        let mut bytes_written = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if bytes_written > max_bytes {
            let _ = fs::remove_file(&path);
            bytes_written = 0;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        Some(Self {
            path,
            file,
            max_bytes,
            bytes_written,
        })
    }

    fn rotate_if_needed(&mut self, next_len: usize) {
        if self.bytes_written.saturating_add(next_len as u64) <= self.max_bytes {
            return;
        }
        if let Ok(file) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = file;
            self.bytes_written = 0;
        }
    }

    fn write_line(&mut self, line: &str) {
        self.rotate_if_needed(line.len());
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.bytes_written = self.bytes_written.saturating_add(line.len() as u64);
        }
    }
}

#[derive(Default)]
struct LogState {
    writer: Option<LogWriter>,
}

fn log_state() -> &'static Mutex<LogState> {
    LOG_STATE.get_or_init(|| Mutex::new(LogState::default()))
}

/// Configure logging from CLI flags. Also installs the JSON tracing subscriber.
pub fn init_logging(config: &AppConfig) {
    let enabled = config.logs && !config.no_logs;
    set_logging(enabled, enabled && config.log_content);
    crate::telemetry::init_tracing(config);
}

fn set_logging(enabled: bool, content_enabled: bool) {
    LOG_ENABLED.store(enabled, Ordering::Relaxed);
    LOG_CONTENT_ENABLED.store(content_enabled, Ordering::Relaxed);

    let mut state = log_state()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    state.writer = if enabled {
        LogWriter::new(log_file_path(), LOG_MAX_BYTES)
    } else {
        None
    };
}

pub fn log_debug(msg: &str) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let line = format!("[{timestamp}] {msg}\n");
    let mut state = log_state()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(writer) = state.writer.as_mut() {
        writer.write_line(&line);
    }
}

/// Write logs that may contain user content (transcripts, spoken replies).
pub fn log_debug_content(msg: &str) {
    if !LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    log_debug(msg);
}

#[cfg(test)]
pub(crate) fn set_logging_for_tests(enabled: bool, content_enabled: bool) {
    set_logging(enabled, content_enabled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    static LOG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn with_log_file<R>(f: impl FnOnce(&std::path::Path) -> R) -> R {
        let _guard = LOG_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let path = log_file_path();
        let _ = fs::remove_file(&path);
        let result = f(&path);
        set_logging_for_tests(false, false);
        result
    }

    #[test]
    fn logging_disabled_by_default() {
        with_log_file(|path| {
            let config = AppConfig::parse_from(["covas-voice-tests"]);
            init_logging(&config);
            log_debug("should-not-write");
            let contents = fs::read_to_string(path).unwrap_or_default();
            assert!(!contents.contains("should-not-write"));
        });
    }

    #[test]
    fn logging_enabled_writes_log() {
        with_log_file(|path| {
            set_logging_for_tests(true, false);
            log_debug("log-enabled");
            let contents = fs::read_to_string(path).expect("log file should be created");
            assert!(contents.contains("log-enabled"));
        });
    }

    #[test]
    fn log_content_requires_flag() {
        with_log_file(|path| {
            set_logging_for_tests(true, false);
            log_debug_content("open the cargo hatch");
            let contents = fs::read_to_string(path).unwrap_or_default();
            assert!(
                !contents.contains("cargo hatch"),
                "content should not be logged without --log-content"
            );
        });
    }

    #[test]
    fn no_logs_overrides_logs() {
        with_log_file(|path| {
            let config = AppConfig::parse_from(["covas-voice-tests", "--logs", "--no-logs"]);
            init_logging(&config);
            log_debug("suppressed");
            let contents = fs::read_to_string(path).unwrap_or_default();
            assert!(!contents.contains("suppressed"));
        });
    }
}
