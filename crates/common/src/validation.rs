//! Input validation for values that end up in filesystem paths.

use anyhow::{anyhow, Result};
use std::path::{Component, Path};

/// Maximum length for uploaded file names
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Validate string length
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} characters (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

/// Reduce a client supplied file name to a single safe path component.
///
/// Directory parts are discarded, so `../../etc/passwd` becomes `passwd`. Names that
/// are empty, `.` or `..` after stripping are rejected.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("file name cannot be empty"));
    }

    // Windows clients may send backslash separated paths
    let normalized = trimmed.replace('\\', "/");
    let last = Path::new(&normalized)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .last()
        .ok_or_else(|| anyhow!("file name '{}' has no usable component", name))?;

    if last.chars().any(|c| c.is_control()) {
        return Err(anyhow!("file name contains control characters"));
    }

    validate_length(last, MAX_FILENAME_LENGTH, "file name")?;
    Ok(last.to_string())
}

/// File stem used to name run artifacts, e.g. `lobby` for `lobby.mp4`
pub fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("video")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_name() {
        assert_eq!(sanitize_filename("lobby.mp4").unwrap(), "lobby.mp4");
        assert_eq!(sanitize_filename("  door cam.mov ").unwrap(), "door cam.mov");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\videos\\entrance.mp4").unwrap(), "entrance.mp4");
        assert_eq!(sanitize_filename("/abs/path/clip.avi").unwrap(), "clip.avi");
    }

    #[test]
    fn test_sanitize_rejects_unusable_names() {
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("   ").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("/").is_err());
        assert!(sanitize_filename(&"a".repeat(300)).is_err());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("lobby.mp4"), "lobby");
        assert_eq!(file_stem("archive.tar.gz"), "archive.tar");
        assert_eq!(file_stem(""), "video");
    }
}
