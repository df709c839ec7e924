use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use super::{StreamId, StreamInfo, StreamResolver};
use crate::core::{AbortFlag, ResolveError, run_tool};

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct VideoMetadata {
    title: Option<String>,
    #[serde(default)]
    formats: Vec<FormatEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct FormatEntry {
    format_id: String,
    url: Option<String>,
    height: Option<u32>,
    ext: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    filesize: Option<u64>,
}

impl FormatEntry {
    fn is_muxed_mp4(&self) -> bool {
        self.ext.as_deref() == Some("mp4")
            && self.acodec.as_deref().is_some_and(|c| c != "none")
            && self.vcodec.as_deref().is_some_and(|c| c != "none")
    }
}

/// Resolves streams by asking `yt-dlp` for the video's JSON metadata.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    program: String,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new() -> Self {
        Self::with_program("yt-dlp")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: RESOLVE_TIMEOUT,
        }
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamResolver for YtDlpResolver {
    fn resolve(
        &self,
        stream: &StreamId,
        resolution: &str,
        abort: &AbortFlag,
    ) -> Result<StreamInfo, ResolveError> {
        let target = parse_resolution(resolution)?;
        let args = vec![
            "-J".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            stream.as_str().to_string(),
        ];

        let output = run_tool(&self.program, &args, abort, Some(self.timeout)).map_err(|e| {
            if matches!(e, crate::core::ToolError::Aborted { .. }) {
                ResolveError::Aborted
            } else {
                ResolveError::with_context(format!("yt-dlp lookup for {}", stream), e)
            }
        })?;

        let metadata: VideoMetadata = serde_json::from_slice(&output.stdout)
            .map_err(|e| ResolveError::with_context(format!("parsing metadata for {}", stream), e))?;

        stream_info_from_metadata(stream, metadata, target)
    }
}

/// Parses `"1080p"` (or a bare `"1080"`) into a target height.
pub fn parse_resolution(resolution: &str) -> Result<u32, ResolveError> {
    resolution
        .trim()
        .trim_end_matches(['p', 'P'])
        .parse::<u32>()
        .map_err(|_| ResolveError::InvalidResolution(resolution.to_string()))
}

fn stream_info_from_metadata(
    stream: &StreamId,
    metadata: VideoMetadata,
    target_height: u32,
) -> Result<StreamInfo, ResolveError> {
    let best = select_format(&metadata.formats, target_height).ok_or_else(|| {
        ResolveError::NoMatchingFormat {
            stream: stream.to_string(),
        }
    })?;

    let playable_url = best.url.clone().ok_or_else(|| ResolveError::Metadata {
        stream: stream.to_string(),
        message: format!("format {} has no url", best.format_id),
    })?;

    let height = best.height.unwrap_or_default();
    if height != target_height {
        log::info!(
            "[yt-dlp] {}: selected {}p (wanted {}p)",
            stream,
            height,
            target_height
        );
    }

    Ok(StreamInfo {
        playable_url,
        title: metadata.title.unwrap_or_else(|| "Untitled".to_string()),
        resolution_label: format!("{}p", height),
        format_id: best.format_id.clone(),
        resolved_at: Utc::now(),
    })
}

/// Picks the format closest to `target_height`.
///
/// Muxed mp4 formats win when any exist. Ties go to the taller format,
/// then to the larger file.
fn select_format(formats: &[FormatEntry], target_height: u32) -> Option<&FormatEntry> {
    let with_height: Vec<&FormatEntry> = formats
        .iter()
        .filter(|f| f.height.is_some() && f.url.is_some())
        .collect();

    let muxed: Vec<&FormatEntry> = with_height
        .iter()
        .copied()
        .filter(|f| f.is_muxed_mp4())
        .collect();
    let candidates = if muxed.is_empty() { with_height } else { muxed };

    candidates.into_iter().min_by_key(|f| {
        let height = f.height.unwrap_or_default();
        (
            height.abs_diff(target_height),
            std::cmp::Reverse(height),
            std::cmp::Reverse(f.filesize.unwrap_or_default()),
        )
    })
}
