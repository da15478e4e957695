use serde::Serialize;
use std::path::Path;

use super::part::normalize_path;

/// What the caller needs to know about a file before planning an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Inspect `path`; missing files and directories report `exists: false`
pub async fn file_info(path: &str) -> FileInfo {
    let path = normalize_path(path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {
            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase());
            FileInfo {
                name,
                exists: true,
                size: Some(meta.len()),
                mime_type: Some(detect_content_type(&path)),
                extension,
            }
        }
        _ => FileInfo {
            name,
            exists: false,
            size: None,
            extension: None,
            mime_type: None,
        },
    }
}

/// Detect Content-Type based on file extension
///
/// Falls back to "application/octet-stream" for unknown types.
pub fn detect_content_type(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    match ext.as_deref() {
        // Video
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("m4v") => "video/x-m4v",
        Some("3gp") => "video/3gpp",

        // Image
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",

        // Audio
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("aac") => "audio/aac",
        Some("m4a") => "audio/mp4",

        // Documents and archives
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("tar") => "application/x-tar",

        _ => "application/octet-stream",
    }
    .to_string()
}
