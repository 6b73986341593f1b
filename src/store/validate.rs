//! Upload validation and filename sanitising.
//!
//! Validation failures are ordinary caller-facing state, so
//! [`validate_file`] hands back a [`FileValidation`] value instead of an
//! error. [`ContentStore::upload`](crate::store::ContentStore::upload) lifts a
//! failed validation into [`StoreError::InvalidUpload`](crate::store::StoreError::InvalidUpload).

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 10 MiB, inclusive
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// files above this go through the blob/tree/commit path
pub const SINGLE_WRITE_THRESHOLD: u64 = 1024 * 1024;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "bmp"];

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "bmp",
    // pages, themes, snippets
    "html", "htm", "css", "js", "json", "md", "txt", "csv", "xml", "yaml", "yml",
    // documents and media
    "pdf", "mp3", "mp4", "webm", "wav", "ogg",
    // fonts
    "woff", "woff2", "ttf", "otf",
];

/// longest base name kept by [`sanitize_filename`]
pub const MAX_BASE_NAME_LEN: usize = 50;

/// Limits applied to uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_file_size: u64,
    pub single_write_threshold: u64,
    pub allowed_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            single_write_threshold: SINGLE_WRITE_THRESHOLD,
            allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            image_extensions: IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UploadLimits {
    pub fn is_allowed(&self, filename: &str) -> bool {
        extension(filename).is_some_and(|ext| contains_ignore_case(&self.allowed_extensions, &ext))
    }

    pub fn is_image(&self, filename: &str) -> bool {
        extension(filename).is_some_and(|ext| contains_ignore_case(&self.image_extensions, &ext))
    }
}

fn contains_ignore_case(list: &[String], ext: &str) -> bool {
    list.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext))
}

/// Why an upload was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    TooLarge { size: u64, max: u64 },
    DisallowedExtension { extension: Option<String> },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { size, max } => {
                write!(f, "file is {} bytes, the limit is {} bytes", size, max)
            }
            Self::DisallowedExtension { extension: Some(ext) } => {
                write!(f, "file type '.{}' is not allowed", ext)
            }
            Self::DisallowedExtension { extension: None } => {
                write!(f, "files without an extension are not allowed")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Outcome of [`validate_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileValidation {
    pub valid: bool,
    pub error: Option<ValidationError>,
}

impl FileValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn rejected(error: ValidationError) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }

    /// `Err` carrying the validation error, for `?` chains
    pub fn into_result(self) -> Result<(), ValidationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Check an upload against `limits`.
///
/// The extension is checked before the size, so a disallowed type is
/// rejected whatever its size.
pub fn validate_file(filename: &str, size: u64, limits: &UploadLimits) -> FileValidation {
    if !limits.is_allowed(filename) {
        return FileValidation::rejected(ValidationError::DisallowedExtension {
            extension: extension(filename),
        });
    }
    if size > limits.max_file_size {
        return FileValidation::rejected(ValidationError::TooLarge {
            size,
            max: limits.max_file_size,
        });
    }
    FileValidation::ok()
}

/// lowercased extension, without the dot
pub fn extension(filename: &str) -> Option<String> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
        _ => None,
    }
}

/// Turn a user-supplied filename into a collision-resistant storage name.
///
/// `"My Photo (1).PNG"` becomes `"1718035200123-my-photo-1.png"`.
pub fn sanitize_filename(filename: &str) -> String {
    sanitize_with_timestamp(filename, Utc::now().timestamp_millis())
}

fn sanitize_with_timestamp(filename: &str, timestamp: i64) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (base, ext) = match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => (base, Some(ext)),
        _ => (name, None),
    };

    let mut slug = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(MAX_BASE_NAME_LEN).collect();
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "file" } else { slug };

    let ext: String = ext
        .map(|e| e.chars().filter(char::is_ascii_alphanumeric).collect::<String>())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if ext.is_empty() {
        format!("{}-{}", timestamp, slug)
    } else {
        format!("{}-{}.{}", timestamp, slug, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_ceiling_is_inclusive() {
        let limits = UploadLimits::default();

        let at_limit = validate_file("photo.png", MAX_FILE_SIZE, &limits);
        assert!(at_limit.valid);
        assert_eq!(at_limit.error, None);

        let over = validate_file("photo.png", MAX_FILE_SIZE + 1, &limits);
        assert!(!over.valid);
        assert!(matches!(over.error, Some(ValidationError::TooLarge { .. })));
    }

    #[test]
    fn disallowed_extension_rejected_regardless_of_size() {
        let limits = UploadLimits::default();
        for size in [0, 1, MAX_FILE_SIZE + 1] {
            let result = validate_file("payload.exe", size, &limits);
            assert!(!result.valid);
            assert_eq!(
                result.error,
                Some(ValidationError::DisallowedExtension {
                    extension: Some("exe".to_string())
                })
            );
        }
        assert!(!validate_file("Makefile", 10, &limits).valid);
    }

    #[test]
    fn extension_check_ignores_case() {
        let limits = UploadLimits::default();
        assert!(validate_file("SLIDE.PNG", 10, &limits).valid);
        assert!(limits.is_image("img/Logo.SVG"));
        assert!(!limits.is_image("index.html"));
    }

    #[test]
    fn custom_limits() {
        let limits = UploadLimits {
            max_file_size: 4,
            allowed_extensions: vec!["txt".to_string()],
            ..UploadLimits::default()
        };
        assert!(validate_file("a.txt", 4, &limits).valid);
        assert!(!validate_file("a.txt", 5, &limits).valid);
        assert!(!validate_file("a.png", 1, &limits).valid);
    }

    #[test]
    fn sanitize_lowercases_and_collapses() {
        assert_eq!(
            sanitize_with_timestamp("My  Photo (1).PNG", 42),
            "42-my-photo-1.png"
        );
        assert_eq!(sanitize_with_timestamp("__weird__.Tar", 7), "7-weird.tar");
        assert_eq!(sanitize_with_timestamp("???.png", 7), "7-file.png");
        assert_eq!(sanitize_with_timestamp("README", 7), "7-readme");
        assert_eq!(sanitize_with_timestamp("uploads/x/a b.css", 7), "7-a-b.css");
    }

    #[test]
    fn sanitize_truncates_base_name() {
        let long = format!("{}.jpg", "a".repeat(120));
        let name = sanitize_with_timestamp(&long, 1);
        assert_eq!(name, format!("1-{}.jpg", "a".repeat(MAX_BASE_NAME_LEN)));
    }

    #[test]
    fn sanitize_prefixes_timestamp() {
        let name = sanitize_filename("logo.png");
        let (prefix, rest) = name.split_once('-').unwrap();
        assert!(prefix.parse::<i64>().is_ok());
        assert_eq!(rest, "logo.png");
    }
}
