//! Logging setup
//!
//! JSON logs to stdout, plus an optional JSON file that is rotated once it
//! grows past a size limit (`pool.log`, `pool.log.1`, ... `pool.log.N`).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Rotate once the active file would exceed this many bytes
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Rotated files kept next to the active one
pub const DEFAULT_KEEP_FILES: usize = 5;

/// Size-rotated log file usable as a `tracing-subscriber` writer
///
/// Clones share the same file handle.
#[derive(Debug, Clone)]
pub struct RollingFileWriter {
    state: Arc<Mutex<RollingState>>,
}

#[derive(Debug)]
struct RollingState {
    path: PathBuf,
    file: File,
    written: u64,
    max_size: u64,
    keep: usize,
}

impl RollingFileWriter {
    /// Open (or create) `path` for appending
    ///
    /// `keep` is the number of rotated files retained; `0` truncates the log
    /// on every rotation.
    pub fn open(path: impl AsRef<Path>, max_size: u64, keep: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.file_name().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("log path has no file name: {}", path.display()),
            ));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let written = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let file = append_to(&path)?;

        Ok(Self {
            state: Arc::new(Mutex::new(RollingState {
                path,
                file,
                written,
                max_size,
                keep,
            })),
        })
    }

    pub fn with_defaults(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open(path, DEFAULT_MAX_FILE_SIZE, DEFAULT_KEEP_FILES)
    }

    fn lock(&self) -> MutexGuard<'_, RollingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn append_to(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl RollingState {
    fn numbered(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    /// Shift `log.N-1 -> log.N`, ..., `log -> log.1` and start a fresh file
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.keep == 0 {
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        let oldest = self.numbered(self.keep);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.keep).rev() {
            let from = self.numbered(n);
            if from.exists() {
                fs::rename(&from, self.numbered(n + 1))?;
            }
        }
        fs::rename(&self.path, self.numbered(1))?;

        self.file = append_to(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();

        // A single oversized record still goes into a fresh file
        if state.written > 0 && state.written + buf.len() as u64 > state.max_size {
            state.rotate()?;
        }

        let n = state.file.write(buf)?;
        state.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().file.flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for RollingFileWriter {
    type Writer = RollingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `log_level` when set. With `log_file`, every event is
/// also written as JSON to a size-rotated file.
pub fn init_tracing(log_level: &str, log_file: Option<&Path>) -> io::Result<()> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer().json().with_filter(filter());
    let registry = tracing_subscriber::registry().with(console_layer);

    match log_file {
        Some(path) => {
            let writer = RollingFileWriter::with_defaults(path)?;
            let file_layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            registry.with(file_layer).init();
            tracing::info!(path = %path.display(), "Logging to rotating file");
        }
        None => registry.init(),
    }

    Ok(())
}
