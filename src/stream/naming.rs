//! On-disk layout for captured frames: one directory per stream, named
//! after the cleaned stream title, holding timestamped JPEG stills.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

const MAX_NAME_LEN: usize = 100;
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
pub const FRAME_EXTENSION: &str = "jpg";

/// Turns a stream title into a filesystem-safe directory name.
pub fn clean_title(title: &str) -> String {
    let mut cleaned = String::with_capacity(title.len());
    let mut last_was_sep = false;

    for c in title.chars() {
        if INVALID_CHARS.contains(&c) || !c.is_ascii() {
            continue;
        }
        if c.is_whitespace() || c == '_' {
            if !last_was_sep {
                cleaned.push('_');
            }
            last_was_sep = true;
        } else {
            cleaned.push(c);
            last_was_sep = false;
        }
    }

    let trimmed: String = cleaned
        .trim_matches(|c| c == '_' || c == '.')
        .chars()
        .take(MAX_NAME_LEN)
        .collect();

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

pub fn stream_dir(output_root: &Path, title: &str) -> PathBuf {
    output_root.join(clean_title(title))
}

pub fn frame_stem<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Returns `dir/<stem>.<ext>`, appending `_1`, `_2`, ... if it already exists.
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{ext}"));
    if !candidate.exists() {
        return candidate;
    }

    let mut counter = 1_u32;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn test_clean_title_strips_invalid_and_collapses_spaces() {
        assert_eq!(
            clean_title("Live: Bay  Cam | 24/7 *HD*"),
            "Live_Bay_Cam_247_HD"
        );
    }

    #[test]
    fn test_clean_title_drops_non_ascii_and_edges() {
        assert_eq!(clean_title("__ Café ☀ view ..."), "Caf_view");
    }

    #[test]
    fn test_clean_title_falls_back_when_empty() {
        assert_eq!(clean_title("☀☀☀"), "untitled");
    }

    #[test]
    fn test_clean_title_limits_length() {
        let long = "a".repeat(300);
        assert_eq!(clean_title(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_frame_stem_format() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let at = offset.with_ymd_and_hms(2024, 3, 9, 6, 5, 4).unwrap();
        assert_eq!(frame_stem(&at), "2024-03-09_06-05-04");
    }

    #[test]
    fn test_unique_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "shot", "jpg");
        std::fs::write(&first, b"x").unwrap();
        let second = unique_path(dir.path(), "shot", "jpg");

        assert_eq!(first.file_name().unwrap(), "shot.jpg");
        assert_eq!(second.file_name().unwrap(), "shot_1.jpg");
    }
}
