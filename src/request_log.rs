//! Append-only JSON-lines log of transcription requests with size based
//! rotation.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::config::RotationConfig;

/// Simple size-based rotating writer. Backups are `<path>.1` .. `<path>.<keep>`,
/// the newest optionally gzipped.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(path: &str, rotation: &RotationConfig) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes: rotation.max_bytes,
            keep: rotation.keep,
            compress: rotation.compress,
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            if self.exceeds_limit(limit) {
                match self.rotate_backups() {
                    Ok(()) => {
                        self.compress_latest_backup();
                        self.reopen_current()?;
                    }
                    // Keep appending to the live file rather than truncating it.
                    Err(e) => {
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            "request log rotation failed"
                        );
                    }
                }
            }
        }
        writeln!(self.file, "{}", line)
    }

    fn exceeds_limit(&self, limit: u64) -> bool {
        self.path
            .metadata()
            .map(|meta| meta.len() >= limit)
            .unwrap_or(false)
    }

    fn backup(&self, idx: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    fn gz_backup(&self, idx: usize) -> PathBuf {
        let mut name = self.backup(idx).into_os_string();
        name.push(".gz");
        PathBuf::from(name)
    }

    /// Shift `<path>.N[.gz]` up by one, dropping anything past `keep`, then
    /// move the live file to `<path>.1`. Only that last rename can fail the
    /// rotation.
    fn rotate_backups(&self) -> std::io::Result<()> {
        if self.keep == 0 {
            return Ok(());
        }
        for stale in [self.backup(self.keep), self.gz_backup(self.keep)] {
            if stale.exists() {
                if let Err(e) = fs::remove_file(&stale) {
                    tracing::warn!(path=%stale.display(), error=%e, "failed to drop old backup");
                }
            }
        }
        for idx in (2..=self.keep).rev() {
            for (from, to) in [
                (self.backup(idx - 1), self.backup(idx)),
                (self.gz_backup(idx - 1), self.gz_backup(idx)),
            ] {
                if from.exists() {
                    if let Err(e) = fs::rename(&from, &to) {
                        tracing::warn!(path=%from.display(), error=%e, "failed to shift backup");
                    }
                }
            }
        }
        fs::rename(&self.path, self.backup(1))
    }

    fn compress_latest_backup(&self) {
        if !self.compress || self.keep == 0 {
            return;
        }
        let rotated = self.backup(1);
        if let Ok(data) = fs::read(&rotated) {
            let mut gz = GzEncoder::new(Vec::new(), Compression::default());
            if gz.write_all(&data).is_ok() {
                if let Ok(buf) = gz.finish() {
                    if fs::write(self.gz_backup(1), buf).is_ok() {
                        let _ = fs::remove_file(&rotated);
                    }
                }
            }
        }
    }

    fn reopen_current(&mut self) -> std::io::Result<()> {
        self.file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

/// One line of the request log.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord<'a> {
    pub ts: String,
    pub outcome: &'static str,
    pub status: u16,
    pub duration_ms: f64,
    pub user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<&'a str>,
}

#[derive(Clone, Default)]
pub struct RequestLog {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
}

impl RequestLog {
    /// Log that drops every record.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn open(path: Option<&str>, rotation: &RotationConfig) -> Self {
        let writer = match path {
            Some(path) => match RotatingWriter::open(path, rotation) {
                Ok(w) => Some(Arc::new(Mutex::new(w))),
                Err(e) => {
                    tracing::warn!(path=%path, error=%e, "Failed to open LOG_FILE; request log disabled");
                    None
                }
            },
            None => {
                tracing::debug!("request log disabled: LOG_FILE not set");
                None
            }
        };
        Self {
            writer,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn emit(&self, record: &RequestRecord<'_>) {
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error=%e, "Failed to serialise request record");
                return;
            }
        };
        if let Ok(mut guard) = writer.lock() {
            match guard.write_line(&line) {
                Ok(()) => {
                    self.lines_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!(error=%e, "Failed to write request log line");
                    self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }
}
