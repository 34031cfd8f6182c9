//! MIME type tags derived from file names

use std::path::Path;

/// Fallback tag for unknown or missing extensions
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// MIME type for a file name, as a browser would report it for a picked file
pub fn mime_type_for(filename: &str) -> &'static str {
    let ext = match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return DEFAULT_MIME_TYPE,
    };
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "ico" => "image/x-icon",
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        "7z" => "application/x-7z-compressed",
        "wasm" => "application/wasm",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// HTTP `Content-Type` value for serving a static asset
pub fn content_type_for(filename: &str) -> String {
    let mime = mime_type_for(filename);
    if mime.starts_with("text/") || mime == "application/json" {
        format!("{}; charset=utf-8", mime)
    } else {
        mime.to_string()
    }
}
