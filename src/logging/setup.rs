// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Name of the log file written when file logging is enabled
pub const LOG_FILE_NAME: &str = "extension-sync.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Reloadable slot holding the optional file layer
pub type FileLayer = reload::Layer<Option<BoxedLayer>, Registry>;

/// Runtime switch for the file layer installed by [`setup_logging`]
#[derive(Clone)]
pub struct FileLogging {
    handle: reload::Handle<Option<BoxedLayer>, Registry>,
    current: Arc<Mutex<Option<PathBuf>>>,
}

impl FileLogging {
    /// Append to `log_dir`, or stop writing the log file with `None`.
    /// Returns `Ok(false)` when the target is unchanged.
    pub fn apply(&self, log_dir: Option<&Path>) -> anyhow::Result<bool> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() == log_dir {
            return Ok(false);
        }

        let layer = log_dir.map(open_file_layer).transpose()?;
        self.handle
            .reload(layer)
            .context("Logging subscriber is no longer installed")?;
        *current = log_dir.map(Path::to_path_buf);
        Ok(true)
    }

    /// Directory currently receiving the log file, if any
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Build the reloadable file layer, initially writing to `log_dir` if given
pub fn file_logging(log_dir: Option<&Path>) -> anyhow::Result<(FileLayer, FileLogging)> {
    let (layer, handle) = reload::Layer::new(None);
    let file_logging = FileLogging {
        handle,
        current: Arc::new(Mutex::new(None)),
    };
    file_logging.apply(log_dir)?;
    Ok((layer, file_logging))
}

fn open_file_layer(dir: &Path) -> anyhow::Result<BoxedLayer> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
        .with_context(|| format!("Failed to open log file in {}", dir.display()))?;

    Ok(fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(Mutex::new(file))
        .boxed())
}

/// Initialize tracing subscriber with configuration
///
/// When `log_dir` is given, every event is also appended (without ANSI colours)
/// to `extension-sync.log` inside it. The returned handle moves or disables
/// that file at runtime.
pub fn setup_logging(log_level: &str, log_dir: Option<&Path>) -> anyhow::Result<FileLogging> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, handle) = file_logging(log_dir)?;

    tracing_subscriber::registry()
        .with(file_layer)
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
        )
        .try_init()?;

    Ok(handle)
}
