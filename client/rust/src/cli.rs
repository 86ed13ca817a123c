//! CLI helpers for the tempchat client
//!
//! Command parsing, display formatting, attachment loading, join link parsing
//! and async stdin reading for the in-room prompt.

use crate::error::{ClientError, Result};
use crate::ledger::LedgerEntry;
use crate::models::{Command, FileInfo};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Local, TimeZone, Utc};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

/// Parse a command from user input
pub fn parse_command(input: &str) -> Result<Command> {
    Command::parse(input).map_err(ClientError::InvalidCommand)
}

/// Short human form of a remaining lifetime: `45s`, `12m`, `3h`
pub fn format_remaining(remaining: chrono::Duration) -> String {
    let secs = remaining.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{}h", secs / 3600)
    }
}

/// Format a ledger entry for display
pub fn format_message(room_code: &str, entry: &LedgerEntry, now: DateTime<Utc>) -> String {
    let sent = Local
        .timestamp_millis_opt(entry.timestamp)
        .single()
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default();

    let mut text = entry.body.clone().unwrap_or_default();
    if let Some(file) = &entry.file {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&format!(
            "[file {} ({} bytes, {}) id={}]",
            file.original_name, file.size, file.mime_type, entry.id
        ));
    }

    format!(
        "#{} {} <{}> {} (expires in {})",
        room_code,
        sent,
        entry.author,
        text,
        format_remaining(entry.remaining_at(now))
    )
}

/// Format a control message for display
pub fn format_control(room_code: &str, action: &str) -> String {
    format!("#{} {}", room_code, action)
}

/// Best-effort MIME type from a file extension
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Load a file as an attachment with its payload inlined
pub fn read_attachment(path: &Path) -> Result<FileInfo> {
    let bytes = std::fs::read(path)?;
    let original_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ClientError::InvalidCommand(format!("Not a file: {}", path.display())))?
        .to_string();

    Ok(FileInfo {
        original_name,
        size: bytes.len() as u64,
        mime_type: guess_mime_type(path).to_string(),
        data: Some(STANDARD.encode(&bytes)),
    })
}

/// Write a stored base64 attachment payload to disk
pub fn write_attachment(data: &str, path: &Path) -> Result<usize> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| ClientError::RoomError(format!("Corrupt attachment payload: {}", e)))?;
    std::fs::write(path, &bytes)?;
    Ok(bytes.len())
}

/// Extract `(room_code, password)` from a QR join link
pub fn parse_join_url(link: &str) -> Result<(String, String)> {
    let url = Url::parse(link.trim()).map_err(|e| ClientError::InvalidJoinUrl(e.to_string()))?;

    let mut room = None;
    let mut password = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "room" => room = Some(value.trim().to_uppercase()),
            "password" => password = Some(value.trim().to_string()),
            _ => {}
        }
    }

    match (room, password) {
        (Some(room), Some(password)) if !room.is_empty() && !password.is_empty() => {
            Ok((room, password))
        }
        _ => Err(ClientError::InvalidJoinUrl(
            "link must carry both room and password".to_string(),
        )),
    }
}

/// Async stdin reader that yields one line at a time
///
/// Prints the prompt and flushes stdout before waiting on input.
///
/// # Returns
/// - `Ok(Some(line))` - User entered a line
/// - `Ok(None)` - EOF reached (Ctrl+D)
/// - `Err(e)` - I/O error
pub async fn read_line_async(reader: &mut BufReader<tokio::io::Stdin>) -> Result<Option<String>> {
    print!("> ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    match reader.read_line(&mut line).await? {
        0 => Ok(None),
        _ => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            Ok(Some(line))
        }
    }
}
