//! Transcription port and the command-line backend adapter.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::config::BackendConfig;

#[derive(Debug, thiserror::Error)]
pub enum TranscriberError {
    #[error("required dependency missing: {0}")]
    Dependency(String),
    #[error("transcriber not initialized")]
    NotInitialized,
    #[error("transcription failed: {0}")]
    Failed(String),
    #[error("transcription i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability that turns an uploaded media file into text.
///
/// `initialize` must be idempotent; the request path calls it before every
/// job and relies on repeat calls being free.
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn initialize(&self) -> Result<(), TranscriberError>;
    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, TranscriberError>;
}

/// Extensions handed to the backend as-is; anything else is written as `.wav`.
const BACKEND_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "flac", "ogg", "mp4", "webm"];

/// Runs an external speech-to-text program (whisper.cpp's `whisper-cli` by
/// default) on a temporary copy of the upload, optionally normalising it to
/// 16 kHz mono PCM with ffmpeg first. The program's stdout is the transcript.
pub struct CommandTranscriber {
    config: BackendConfig,
    ready: OnceCell<()>,
}

impl CommandTranscriber {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            ready: OnceCell::new(),
        }
    }

    fn render_args(&self, input: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{model}", &self.config.model)
            })
            .collect()
    }

    async fn normalise(
        &self,
        ffmpeg: &str,
        input: &Path,
        dir: &Path,
    ) -> Result<PathBuf, TranscriberError> {
        let output = dir.join("normalized.wav");
        let args: Vec<String> = vec![
            "-nostdin".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-ar".into(),
            "16000".into(),
            "-ac".into(),
            "1".into(),
            "-c:a".into(),
            "pcm_s16le".into(),
            output.to_string_lossy().into_owned(),
        ];
        run_checked(ffmpeg, &args).await?;
        Ok(output)
    }
}

#[async_trait::async_trait]
impl Transcriber for CommandTranscriber {
    async fn initialize(&self) -> Result<(), TranscriberError> {
        self.ready
            .get_or_try_init(|| async {
                if find_on_path(&self.config.command).is_none() {
                    return Err(TranscriberError::Dependency(format!(
                        "{} is required but not found",
                        self.config.command
                    )));
                }
                if let Some(ffmpeg) = &self.config.ffmpeg {
                    if find_on_path(ffmpeg).is_none() {
                        return Err(TranscriberError::Dependency(format!(
                            "{} is required but not found",
                            ffmpeg
                        )));
                    }
                }
                tracing::info!(
                    command = %self.config.command,
                    model = %self.config.model,
                    ffmpeg = ?self.config.ffmpeg,
                    "transcriber initialized"
                );
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, TranscriberError> {
        if !self.ready.initialized() {
            return Err(TranscriberError::NotInitialized);
        }

        let mut suffix = crate::guards::extension_of(filename);
        if !BACKEND_EXTENSIONS.contains(&suffix.as_str()) {
            tracing::warn!(extension = %suffix, "unusual audio extension, defaulting to wav");
            suffix = "wav".to_string();
        }

        // Removed with everything in it when dropped, on every path.
        let workdir = tempfile::Builder::new().prefix("whisper_").tempdir()?;
        let input = workdir.path().join(format!("input.{}", suffix));
        tokio::fs::write(&input, audio).await?;

        let source = match &self.config.ffmpeg {
            Some(ffmpeg) => self.normalise(ffmpeg, &input, workdir.path()).await?,
            None => input,
        };

        let output = run_checked(&self.config.command, &self.render_args(&source)).await?;
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::info!(
            size_kb = audio.len() as f64 / 1024.0,
            extension = %suffix,
            chars = text.len(),
            "transcribed upload"
        );
        Ok(text)
    }
}

async fn run_checked(
    program: &str,
    args: &[String],
) -> Result<std::process::Output, TranscriberError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TranscriberError::Dependency(format!("{} not found", program))
            } else {
                TranscriberError::Io(e)
            }
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let tail: String = stderr
            .char_indices()
            .rev()
            .nth(500)
            .map(|(idx, _)| stderr[idx..].to_string())
            .unwrap_or_else(|| stderr.to_string());
        return Err(TranscriberError::Failed(format!(
            "{} exited with {}: {}",
            program, output.status, tail
        )));
    }
    Ok(output)
}

/// Resolve a program the way the shell would: paths are checked directly,
/// bare names are searched on `PATH`.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
