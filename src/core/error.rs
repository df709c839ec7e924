use std::error::Error as StdError;
use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Failure to obtain a playable stream URL and its metadata.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid resolution preference '{0}'")]
    InvalidResolution(String),
    #[error("no playable format with a video height for {stream}")]
    NoMatchingFormat { stream: String },
    #[error("unexpected metadata for {stream}: {message}")]
    Metadata { stream: String, message: String },
    #[error("resolve aborted")]
    Aborted,
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl ResolveError {
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Failure of the external frame-capture tool.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("could not prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("capture tool failed: {0}")]
    Tool(#[from] ToolError),
    #[error("capture tool reported success but {0} is missing")]
    MissingOutput(PathBuf),
    #[error("{0}")]
    Message(String),
}

impl CaptureError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Failure running an external command-line tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} timed out after {seconds}s")]
    TimedOut { program: String, seconds: u64 },
    #[error("{program} was killed on abort")]
    Aborted { program: String },
    #[error("waiting on {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure starting or stopping a single worker during reconciliation.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker thread for {stream}: {source}")]
    Spawn {
        stream: String,
        #[source]
        source: std::io::Error,
    },
}

/// Sun-time computation failures. The window policy turns all of these
/// into "capture allowed".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolarError {
    #[error("coordinates out of range: {latitude}, {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
    #[error("sun does not rise or set on {date} at latitude {latitude}")]
    NoEvent { date: NaiveDate, latitude: f64 },
    #[error("date {0} is outside the supported range")]
    OutOfRange(NaiveDate),
}

/// Failure loading or persisting the settings document.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("settings document must be a JSON object")]
    NotAnObject,
    #[error("invalid value for '{key}': {source}")]
    Value {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Rejected user input or a settings write that failed.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not a YouTube URL: {0}")]
    InvalidUrl(String),
    #[error("invalid {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
