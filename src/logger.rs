//! Session logger: routes `tracing` events into a single file in the OS data
//! directory.
//!
//! The file is **truncated (overwritten) at each launch**, so it only ever
//! contains output from the most-recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\Staxie\staxie.log`
//!   Linux:    `~/.local/share/Staxie/staxie.log`
//!   macOS:    `~/Library/Application Support/Staxie/staxie.log`
//!
//! `RUST_LOG` overrides the default filter.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Install the subscriber and panic hook. `verbose` mirrors events to
/// stderr at debug level. Safe to call more than once; later calls do
/// nothing.
pub fn init(verbose: bool) {
    let default_level = if verbose { "staxie=debug" } else { "staxie=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let path = log_file_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file_layer = match OpenOptions::new().create(true).write(true).truncate(true).open(&path) {
        Ok(file) => {
            let _ = LOG_PATH.set(path.clone());
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        Err(e) => {
            // Not fatal: run without a session file.
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            None
        }
    };
    let stderr_layer = verbose.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    if tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_err()
    {
        return;
    }

    info!(version = env!("CARGO_PKG_VERSION"), log = %path.display(), "session started");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        error!("PANIC: {}", panic);
        prev(panic);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("Staxie").join("staxie.log")
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
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort: current working directory
    PathBuf::from(".")
}
