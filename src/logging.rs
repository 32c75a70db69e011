use chrono::Local;
use eyre::{Result, WrapErr};
use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over the defaults; without
/// it the crate logs at info, or debug in debug mode. With a log file, output
/// goes to both stderr and the file.
pub fn init(debug: bool, log_file: Option<&LogFile>) {
    let default_directive = if debug {
        "crypto_monitor=debug"
    } else {
        "crypto_monitor=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into());

    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(io::stderr.and(file.clone()))
            .init(),
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Append-only log file that can be rotated while the subscriber holds it.
#[derive(Clone)]
pub struct LogFile {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl LogFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the current file aside with a timestamp suffix and starts a
    /// fresh one at the original path. Returns the backup path.
    pub fn rotate(&self) -> Result<PathBuf> {
        let mut file = self.file.lock();
        file.flush().wrap_err("failed to flush log file")?;

        let backup = self.backup_path();
        std::fs::rename(&self.path, &backup)
            .wrap_err_with(|| format!("failed to move {} aside", self.path.display()))?;
        *file = open_append(&self.path)?;
        Ok(backup)
    }

    fn backup_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "monitor".into());
        let ext = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stamp = Local::now().format("%Y-%m-%dT%H-%M-%S%.3f");
        self.path.with_file_name(format!("{}-{}{}", stem, stamp, ext))
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("failed to open log file {}", path.display()))
}

pub struct LogFileWriter<'a>(MutexGuard<'a, File>);

impl Write for LogFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter(self.file.lock())
    }
}

/// Rotates `file` every time the process receives SIGHUP.
#[cfg(unix)]
pub fn rotate_on_hangup(file: LogFile) -> Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup()).wrap_err("failed to install SIGHUP handler")?;
    Ok(tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match file.rotate() {
                Ok(backup) => tracing::info!("log rotated, previous log at {}", backup.display()),
                Err(e) => tracing::error!("log rotation failed: {:#}", e),
            }
        }
    }))
}
