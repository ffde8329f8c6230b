//! Session logger. Every bake, decode and load failure lands in one log file.
//!
//! The file is truncated at each launch so it only holds the latest session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\SkinStack\skinstack.log`
//!   Linux:    `~/.local/share/SkinStack/skinstack.log`
//!   macOS:    `~/Library/Application Support/SkinStack/skinstack.log`
//!
//! Use the `log_info!` / `log_warn!` / `log_err!` / `log_debug!` macros
//! anywhere in the crate. Before [`init`] (or [`init_at`]) is called they are
//! no-ops, which keeps library consumers and unit tests free of file I/O.
//! `log_debug!` lines are only written when verbose mode is on.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Path of the current session log, if one was opened.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Enable or disable `log_debug!` output. Verbose lines are also echoed to stderr.
pub fn set_verbose(on: bool) {
    VERBOSE.store(on, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Append a raw line. I/O errors are swallowed: logging never fails a bake.
pub fn write_line(line: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Append a timestamped, level-tagged line.
pub fn write(level: &str, msg: &str) {
    if level == "DEBUG" && !is_verbose() {
        return;
    }
    let line = format!("[{}] [{}] {}", timestamp(), level, msg);
    if is_verbose() {
        eprintln!("{}", line);
    }
    write_line(&line);
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write("INFO", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write("WARN", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write("ERROR", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logger::write("DEBUG", &format!($($arg)*));
    };
}

/// Open the session log at the platform default location.
pub fn init() {
    init_at(&default_log_path());
}

/// Open (truncating) the session log at `path` and install the panic hook.
/// Only the first successful call takes effect.
pub fn init_at(path: &Path) {
    if LOG_FILE.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path);

    match file {
        Ok(f) => {
            let _ = LOG_PATH.set(path.to_path_buf());
            let _ = LOG_FILE.set(Mutex::new(f));
        }
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            return;
        }
    }

    write_line(&format!(
        "=== SkinStack session started (unix {}) ===",
        unix_seconds()
    ));
    write_line(&format!("Log file: {}", path.display()));
    write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
        prev(info);
    }));
}

fn default_log_path() -> PathBuf {
    data_dir().join("SkinStack").join("skinstack.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// HH:MM:SS.mmm within the current UTC day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            let h = (secs % 86400) / 3600;
            let m = (secs % 3600) / 60;
            let s = secs % 60;
            format!("{:02}:{:02}:{:02}.{:03}", h, m, s, d.subsec_millis())
        }
        Err(_) => "??:??:??.???".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_before_init_is_a_no_op() {
        // Must not panic or create files when no log has been opened.
        write("INFO", "nothing to see");
        log_warn!("still nothing {}", 42);
    }

    #[test]
    fn default_path_ends_in_app_folder() {
        let path = default_log_path();
        assert!(path.ends_with(Path::new("SkinStack").join("skinstack.log")));
    }

    #[test]
    fn timestamp_has_millisecond_precision() {
        let ts = timestamp();
        assert_eq!(ts.len(), "00:00:00.000".len());
    }
}
