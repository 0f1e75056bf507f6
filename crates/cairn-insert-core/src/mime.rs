//! Content type guessing from file names.

use std::path::Path;

/// Type used when nothing better is known.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const EXTENSIONS: &[(&str, &str)] = &[
    ("7z", "application/x-7z-compressed"),
    ("avi", "video/x-msvideo"),
    ("bmp", "image/bmp"),
    ("bz2", "application/x-bzip2"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("flac", "audio/flac"),
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/vnd.microsoft.icon"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("md", "text/markdown"),
    ("mkv", "video/x-matroska"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("ogg", "audio/ogg"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("svg", "image/svg+xml"),
    ("tar", "application/x-tar"),
    ("torrent", "application/x-bittorrent"),
    ("txt", "text/plain"),
    ("wasm", "application/wasm"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
    ("xhtml", "application/xhtml+xml"),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
];

/// Guess a content type from the extension of `name`.
#[must_use]
pub fn guess_content_type(name: &str) -> Option<&'static str> {
    let (_, extension) = name.rsplit_once('.')?;
    if extension.is_empty() || extension.contains(['/', '\\']) {
        return None;
    }
    let extension = extension.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, content_type)| *content_type)
}

/// Pick the content type for a fresh insert: the explicit value, else a
/// guess from the original file name, else a guess from the request
/// identifier, else [`DEFAULT_CONTENT_TYPE`].
#[must_use]
pub fn resolve_content_type(
    explicit: Option<&str>,
    original_filename: Option<&Path>,
    identifier: &str,
) -> String {
    if let Some(explicit) = explicit.filter(|value| !value.trim().is_empty()) {
        return explicit.to_string();
    }
    original_filename
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .and_then(guess_content_type)
        .or_else(|| guess_content_type(identifier))
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}
