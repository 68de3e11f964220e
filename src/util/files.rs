//! File name and size helpers for media handling.
use std::path::Path;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "wmv", "flv", "webm", "mkv"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "rtf", "odt", "xls", "xlsx", "ppt", "pptx"];

/// Lower-cased extension without the dot; empty when there is none.
pub fn file_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

fn has_extension(name: &str, set: &[&str]) -> bool {
    set.contains(&file_extension(name).as_str())
}

pub fn is_image_file(name: &str) -> bool {
    has_extension(name, IMAGE_EXTENSIONS)
}

pub fn is_video_file(name: &str) -> bool {
    has_extension(name, VIDEO_EXTENSIONS)
}

pub fn is_audio_file(name: &str) -> bool {
    has_extension(name, AUDIO_EXTENSIONS)
}

pub fn is_document_file(name: &str) -> bool {
    has_extension(name, DOCUMENT_EXTENSIONS)
}

/// Human-readable size in B/KB/MB/GB with one decimal above bytes.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// `<stem>_<timestamp>_<8 hex chars>.<ext>`, keeping the original extension.
pub fn generate_unique_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("file");
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let short = uuid::Uuid::new_v4().simple().to_string();
    let short = &short[..8];
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{stamp}_{short}.{ext}"),
        None => format!("{stem}_{stamp}_{short}"),
    }
}
