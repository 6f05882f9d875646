use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

pub const DEFAULT_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac", "webm", "mp4", "avi", "mov"];

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_bytes: None,
            keep: 1,
            compress: false,
        }
    }
}

/// Settings for the command-line transcription backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub command: String,
    pub args: Vec<String>,
    pub model: String,
    /// `None` hands the upload to the backend untouched.
    pub ffmpeg: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: "whisper-cli".to_string(),
            args: split_args("-m {model} -f {input} -nt -np"),
            model: "models/ggml-large-v3.bin".to_string(),
            ffmpeg: Some("ffmpeg".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub max_concurrent_jobs: usize,
    pub admission_timeout: Duration,
    pub max_file_size_bytes: usize,
    pub allowed_extensions: BTreeSet<String>,
    pub max_memory_threshold: f64,
    pub transcribe_timeout: Duration,
    pub retry_after_secs: u64,
    pub proxy_secret: Option<String>,
    pub host: String,
    pub port: u16,
    pub backend: BackendConfig,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            admission_timeout: Duration::from_secs(1),
            max_file_size_bytes: 200 * 1024 * 1024,
            allowed_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            max_memory_threshold: 85.0,
            transcribe_timeout: Duration::from_secs(600),
            retry_after_secs: 30,
            proxy_secret: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            backend: BackendConfig::default(),
            log_file: None,
            rotation: RotationConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let max_concurrent_jobs = parse_ranged_u64("MAX_CONCURRENT_JOBS", 1, 16)?
            .map(|v| v as usize)
            .unwrap_or(defaults.max_concurrent_jobs);
        let admission_timeout = parse_ranged_f64("SEMAPHORE_TIMEOUT", 0.1, 10.0)?
            .map(Duration::from_secs_f64)
            .unwrap_or(defaults.admission_timeout);
        let max_file_size_bytes = parse_ranged_u64("MAX_FILE_SIZE_BYTES", 1024, u64::MAX)?
            .map(|v| v as usize)
            .unwrap_or(defaults.max_file_size_bytes);
        let allowed_extensions = match non_empty_var("ALLOWED_EXTENSIONS")? {
            Some(raw) => {
                let set = parse_extensions(&raw);
                if set.is_empty() {
                    return Err(anyhow!("ALLOWED_EXTENSIONS must list at least one extension"));
                }
                set
            }
            None => defaults.allowed_extensions,
        };
        let max_memory_threshold = parse_ranged_f64("MAX_MEMORY_THRESHOLD", 50.0, 95.0)?
            .unwrap_or(defaults.max_memory_threshold);
        let transcribe_timeout = parse_ranged_f64("TRANSCRIBE_TIMEOUT", 1.0, 3600.0)?
            .map(Duration::from_secs_f64)
            .unwrap_or(defaults.transcribe_timeout);
        let retry_after_secs =
            parse_ranged_u64("RETRY_AFTER_SECS", 1, 3600)?.unwrap_or(defaults.retry_after_secs);
        let proxy_secret = non_empty_var("RAPIDAPI_PROXY_SECRET")?;
        let host = non_empty_var("HOST")?.unwrap_or(defaults.host);
        let port = parse_ranged_u64("PORT", 1024, 65535)?
            .map(|v| v as u16)
            .unwrap_or(defaults.port);

        let backend = BackendConfig {
            command: non_empty_var("TRANSCRIBER_COMMAND")?.unwrap_or(defaults.backend.command),
            args: non_empty_var("TRANSCRIBER_ARGS")?
                .map(|raw| split_args(&raw))
                .unwrap_or(defaults.backend.args),
            model: non_empty_var("MODEL_NAME")?.unwrap_or(defaults.backend.model),
            // Set but empty disables conversion.
            ffmpeg: match env::var("FFMPEG_PATH") {
                Ok(value) if value.trim().is_empty() => None,
                Ok(value) => Some(value.trim().to_string()),
                Err(env::VarError::NotPresent) => defaults.backend.ffmpeg,
                Err(err) => return Err(err.into()),
            },
        };

        let log_file = non_empty_var("LOG_FILE")?;
        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            max_concurrent_jobs,
            admission_timeout,
            max_file_size_bytes,
            allowed_extensions,
            max_memory_threshold,
            transcribe_timeout,
            retry_after_secs,
            proxy_secret,
            host,
            port,
            backend,
            log_file,
            rotation,
        })
    }

    pub fn auth_enabled(&self) -> bool {
        self.proxy_secret.is_some()
    }
}

/// Normalise a comma separated extension list: trims, drops a leading dot
/// and lower-cases each entry.
pub fn parse_extensions(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(|s| s.to_string()).collect()
}

fn non_empty_var(var: &str) -> Result<Option<String>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match non_empty_var(var)? {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        None => Ok(None),
    }
}

fn parse_ranged_u64(var: &str, min: u64, max: u64) -> Result<Option<u64>> {
    match parse_optional_u64(var)? {
        Some(v) if v < min || v > max => {
            Err(anyhow!("{} must be between {} and {} (got {})", var, min, max, v))
        }
        other => Ok(other),
    }
}

fn parse_ranged_f64(var: &str, min: f64, max: f64) -> Result<Option<f64>> {
    let Some(value) = non_empty_var(var)? else {
        return Ok(None);
    };
    let parsed = value
        .parse::<f64>()
        .map_err(|_| anyhow!("{} must be a number", var))?;
    if !parsed.is_finite() || parsed < min || parsed > max {
        return Err(anyhow!(
            "{} must be between {} and {} (got {})",
            var,
            min,
            max,
            value
        ));
    }
    Ok(Some(parsed))
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match non_empty_var(var)? {
        Some(value) => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
