use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;

use super::naming::{FRAME_EXTENSION, frame_stem, stream_dir, unique_path};
use super::{FrameCapture, StreamInfo};
use crate::core::{AbortFlag, CaptureError, run_tool};

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(90);

/// Grabs a single frame from the playable URL with `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegCapture {
    program: String,
    timeout: Duration,
}

impl FfmpegCapture {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: CAPTURE_TIMEOUT,
        }
    }

    fn args(&self, input: &str, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string(),
            "-vframes".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

impl Default for FfmpegCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCapture for FfmpegCapture {
    fn capture(
        &self,
        info: &StreamInfo,
        output_root: &Path,
        abort: &AbortFlag,
    ) -> Result<PathBuf, CaptureError> {
        let dir = stream_dir(output_root, &info.title);
        fs::create_dir_all(&dir).map_err(|source| CaptureError::OutputDir {
            path: dir.clone(),
            source,
        })?;

        let path = unique_path(&dir, &frame_stem(&Local::now()), FRAME_EXTENSION);
        log::debug!("[ffmpeg] {} → {}", info.format_id, path.display());

        run_tool(&self.program, &self.args(&info.playable_url, &path), abort, Some(self.timeout))?;

        if !path.exists() {
            return Err(CaptureError::MissingOutput(path));
        }
        Ok(path)
    }
}
