//! Post-window cleanup: turns the frames a window produced into a
//! timelapse clip per stream, then archives or deletes the frames.
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/<stream>/2024-06-21_20-05-00.jpg      frames from the window
//! <root>/<stream>/clips/2024-06-21_sunset.mp4  encoded clip
//! <root>/<stream>/frames/2024-06-21_sunset/    archived frames
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;

use crate::core::{AbortFlag, lock_read, lock_write, run_tool};
use crate::stream::naming::{FRAME_EXTENSION, unique_path};

const CLIPS_DIR: &str = "clips";
const FRAMES_DIR: &str = "frames";
const ENCODE_TIMEOUT: Duration = Duration::from_secs(600);
const MIN_FRAMES: usize = 2;

/// Called exactly once each time a capture window closes.
pub trait PostWindowCleanup: Send + Sync {
    fn convert_and_cleanup(&self, event_kind: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipSettings {
    pub enabled: bool,
    pub output_root: PathBuf,
    pub fps: u32,
    pub delete_frames: bool,
}

impl Default for ClipSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_root: PathBuf::from("screenshots"),
            fps: 30,
            delete_frames: false,
        }
    }
}

pub struct ClipConverter {
    settings: RwLock<ClipSettings>,
    program: String,
}

impl ClipConverter {
    pub fn new(settings: ClipSettings) -> Self {
        Self::with_program(settings, "ffmpeg")
    }

    pub fn with_program(settings: ClipSettings, program: impl Into<String>) -> Self {
        Self {
            settings: RwLock::new(settings),
            program: program.into(),
        }
    }

    pub fn update(&self, settings: ClipSettings) {
        *lock_write(&self.settings, "clips.update") = settings;
    }

    pub fn settings(&self) -> ClipSettings {
        lock_read(&self.settings, "clips.settings").clone()
    }

    /// Converts every stream directory under the output root. Returns the
    /// clips written; per-directory failures are logged and skipped.
    pub fn convert_all(&self, event_kind: &str) -> Vec<PathBuf> {
        let settings = self.settings();
        let entries = match fs::read_dir(&settings.output_root) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "[clips] cannot read {}: {}",
                    settings.output_root.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        let mut clips = Vec::new();
        for dir in dirs {
            match self.convert_dir(&dir, event_kind, &settings) {
                Ok(Some(clip)) => {
                    log::info!("[clips] wrote {}", clip.display());
                    clips.push(clip);
                }
                Ok(None) => {}
                Err(e) => log::error!("[clips] {}: {:#}", dir.display(), e),
            }
        }
        clips
    }

    fn convert_dir(
        &self,
        dir: &Path,
        event_kind: &str,
        settings: &ClipSettings,
    ) -> Result<Option<PathBuf>> {
        let frames = collect_frames(dir)?;
        if frames.len() < MIN_FRAMES {
            log::debug!(
                "[clips] {} has {} frame(s), skipping",
                dir.display(),
                frames.len()
            );
            return Ok(None);
        }

        let stem = clip_stem(event_kind);
        let clips_dir = dir.join(CLIPS_DIR);
        fs::create_dir_all(&clips_dir)
            .with_context(|| format!("failed to create {}", clips_dir.display()))?;
        let clip = unique_path(&clips_dir, &stem, "mp4");

        let list = clips_dir.join(format!(".{}.txt", stem));
        fs::write(&list, concat_list(&frames, settings.fps))
            .with_context(|| format!("failed to write {}", list.display()))?;

        let encoded = run_tool(
            &self.program,
            &encode_args(&list, &clip, settings.fps),
            &AbortFlag::new(),
            Some(ENCODE_TIMEOUT),
        );
        let _ = fs::remove_file(&list);
        encoded.context("clip encoding failed")?;

        if !clip.exists() {
            anyhow::bail!("encoder produced no output at {}", clip.display());
        }

        if settings.delete_frames {
            for frame in &frames {
                fs::remove_file(frame)
                    .with_context(|| format!("failed to delete {}", frame.display()))?;
            }
        } else {
            let archive = dir.join(FRAMES_DIR).join(&stem);
            fs::create_dir_all(&archive)
                .with_context(|| format!("failed to create {}", archive.display()))?;
            for frame in &frames {
                if let Some(name) = frame.file_name() {
                    fs::rename(frame, archive.join(name))
                        .with_context(|| format!("failed to move {}", frame.display()))?;
                }
            }
        }
        Ok(Some(clip))
    }
}

impl PostWindowCleanup for ClipConverter {
    fn convert_and_cleanup(&self, event_kind: &str) {
        if !lock_read(&self.settings, "clips.enabled").enabled {
            log::info!("[clips] clip conversion disabled");
            return;
        }
        let clips = self.convert_all(event_kind);
        log::info!("[clips] {} clip(s) created", clips.len());
    }
}

/// Top-level frames of a stream directory, oldest first.
fn collect_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION))
        })
        .collect();
    frames.sort();
    Ok(frames)
}

fn clip_stem(event_kind: &str) -> String {
    let event = if event_kind.is_empty() {
        "capture"
    } else {
        event_kind
    };
    format!("{}_{}", Local::now().format("%Y-%m-%d"), event)
}

/// ffmpeg concat-demuxer input holding each frame for one output frame.
fn concat_list(frames: &[PathBuf], fps: u32) -> String {
    let duration = 1.0 / f64::from(fps.max(1));
    let mut list = String::new();
    for frame in frames {
        list.push_str(&format!("file '{}'\n", escape_path(frame)));
        list.push_str(&format!("duration {:.6}\n", duration));
    }
    // The demuxer ignores the final duration unless the file is repeated.
    if let Some(last) = frames.last() {
        list.push_str(&format!("file '{}'\n", escape_path(last)));
    }
    list
}

fn escape_path(path: &Path) -> String {
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    absolute.to_string_lossy().replace('\'', "'\\''")
}

fn encode_args(list: &Path, clip: &Path, fps: u32) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-r".to_string(),
        fps.max(1).to_string(),
        clip.to_string_lossy().into_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(root: &Path, delete_frames: bool) -> ClipSettings {
        ClipSettings {
            enabled: true,
            output_root: root.to_path_buf(),
            fps: 30,
            delete_frames,
        }
    }

    fn touch(path: &Path) {
        fs::write(path, b"jpg").unwrap();
    }

    #[test]
    fn test_concat_list_repeats_last_frame() {
        let frames = vec![PathBuf::from("/x/a.jpg"), PathBuf::from("/x/b.jpg")];
        let list = concat_list(&frames, 25);

        assert_eq!(list.matches("file '").count(), 3);
        assert!(list.contains("duration 0.040000"));
        assert!(list.trim_end().ends_with("file '/x/b.jpg'"));
    }

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape_path(Path::new("/no/such/it's.jpg")), "/no/such/it'\\''s.jpg");
    }

    #[test]
    fn test_encode_args_use_h264() {
        let args = encode_args(Path::new("list.txt"), Path::new("out.mp4"), 30);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_skips_directories_with_too_few_frames() {
        let root = TempDir::new().unwrap();
        let stream = root.path().join("Harbour_Cam");
        fs::create_dir(&stream).unwrap();
        touch(&stream.join("2024-06-21_20-00-00.jpg"));

        let converter = ClipConverter::with_program(settings(root.path(), false), "false");
        assert!(converter.convert_all("sunset").is_empty());
        assert!(stream.join("2024-06-21_20-00-00.jpg").exists());
        assert!(!stream.join(CLIPS_DIR).exists());
    }

    #[test]
    fn test_missing_root_is_not_fatal() {
        let converter = ClipConverter::new(settings(Path::new("/definitely/not/here"), false));
        assert!(converter.convert_all("sunrise").is_empty());
    }

    #[cfg(unix)]
    fn fake_encoder(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ffmpeg.sh");
        fs::write(&script, "#!/bin/sh\nfor last; do :; done\ntouch \"$last\"\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn test_frames_are_archived_after_encoding() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let stream = root.path().join("Harbour_Cam");
        fs::create_dir(&stream).unwrap();
        touch(&stream.join("a.jpg"));
        touch(&stream.join("b.jpg"));
        touch(&stream.join("notes.txt"));

        let converter = ClipConverter::with_program(
            settings(root.path(), false),
            fake_encoder(tools.path()).to_string_lossy(),
        );
        let clips = converter.convert_all("sunset");

        assert_eq!(clips.len(), 1);
        assert!(clips[0].exists());
        assert!(clips[0].starts_with(stream.join(CLIPS_DIR)));

        let archive = stream.join(FRAMES_DIR).join(clip_stem("sunset"));
        assert!(archive.join("a.jpg").exists());
        assert!(archive.join("b.jpg").exists());
        assert!(!stream.join("a.jpg").exists());
        assert!(stream.join("notes.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_frames_are_deleted_when_configured() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let stream = root.path().join("Beach");
        fs::create_dir(&stream).unwrap();
        touch(&stream.join("a.jpg"));
        touch(&stream.join("b.jpg"));

        let converter = ClipConverter::with_program(
            settings(root.path(), true),
            fake_encoder(tools.path()).to_string_lossy(),
        );
        converter.convert_and_cleanup("");

        assert!(!stream.join("a.jpg").exists());
        assert!(!stream.join(FRAMES_DIR).exists());
        let clip = stream.join(CLIPS_DIR).join(format!("{}.mp4", clip_stem("")));
        assert!(clip.exists());
    }

    #[test]
    fn test_failed_encoding_keeps_frames() {
        let root = TempDir::new().unwrap();
        let stream = root.path().join("Beach");
        fs::create_dir(&stream).unwrap();
        touch(&stream.join("a.jpg"));
        touch(&stream.join("b.jpg"));

        let converter =
            ClipConverter::with_program(settings(root.path(), true), "definitely-not-ffmpeg");
        assert!(converter.convert_all("sunrise").is_empty());
        assert!(stream.join("a.jpg").exists());
    }
}
