use std::path::Path;

use crate::media::ContainerFormat;

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format an elapsed duration as `1m 30s`
pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    let total_seconds = elapsed.as_secs();
    let minutes = total_seconds / 60;
    let secs = total_seconds % 60;

    if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

/// Guess the declared content type of an upload from its file extension
pub fn guess_content_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "mp4" | "m4v" => Some(ContainerFormat::Mp4.mime_type()),
        "mov" | "qt" => Some(ContainerFormat::QuickTime.mime_type()),
        _ => None,
    }
}

/// Check that the media engine binaries are reachable
pub async fn check_dependencies(ffmpeg: &str, ffprobe: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(ffmpeg).await {
        missing.push(format!("{} - required for audio extraction and clip cutting", ffmpeg));
    }

    if !check_command_available(ffprobe).await {
        missing.push(format!("{} - used to check highlights against the video length", ffprobe));
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("-version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
