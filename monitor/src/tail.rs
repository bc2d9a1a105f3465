//! Incremental log file reading.
//!
//! Two entry points:
//!
//! - [`read_new_lines`] continues from a remembered byte offset and returns
//!   only the complete lines appended since, handling truncation/rotation by
//!   starting over at the beginning of the file.
//! - [`find_last_matching_line`] bootstraps state at startup by scanning the
//!   tail of a log for the most recent line matching a pattern, falling back
//!   to a full scan for files small enough to afford it.
//!
//! Offsets are raw byte positions; decoding goes through
//! [`LogEncoding`](crate::utils::encoding::LogEncoding) so UTF-16 chat logs and
//! UTF-8 game logs are read the same way.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::utils::encoding::{split_lines, LogEncoding};

/// Bytes scanned from the end of a file when looking for the latest match.
pub const DEFAULT_TAIL_SIZE_BYTES: u64 = 65_536;

/// Extra bytes read before the tail window so the first full line is intact.
const TAIL_SLACK_BYTES: u64 = 1024;

/// Largest file that may be fully rescanned when the tail window has no match.
pub const FULL_SCAN_LIMIT_BYTES: u64 = 5 * 1024 * 1024;

/// Errors that can occur while reading a log file.
#[derive(Error, Debug)]
pub enum TailError {
    /// The log file no longer exists.
    #[error("log file not found: {0}")]
    NotFound(PathBuf),

    /// The log file cannot be opened.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Any other I/O failure while reading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file tailing state.
///
/// `byte_offset` never exceeds the file size the last read observed; a file
/// that shrinks below it is treated as rotated and read again from 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileWatchState {
    /// Position after the last consumed line.
    pub byte_offset: u64,
    /// File size at the last change notification.
    pub last_size: u64,
    /// Modification time at the last change notification.
    pub last_modified: Option<SystemTime>,
    /// When the file was last tailed.
    pub last_processed: Option<Instant>,
}

impl FileWatchState {
    /// State for a file that should be tailed from its current end.
    ///
    /// # Errors
    ///
    /// Returns an error if the file's metadata cannot be read.
    pub fn at_end(path: &Path) -> Result<Self, TailError> {
        let metadata = fs::metadata(path).map_err(|e| classify_io_error(path, e))?;
        Ok(Self {
            byte_offset: metadata.len(),
            last_size: metadata.len(),
            last_modified: metadata.modified().ok(),
            last_processed: None,
        })
    }
}

/// The result of an incremental read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRead {
    /// Complete, non-empty lines appended since the previous offset.
    pub lines: Vec<String>,
    /// Offset to persist for the next read.
    pub new_offset: u64,
}

/// Reads the lines appended to `path` since `state.byte_offset`.
///
/// A trailing line with no terminator yet is left for the next read, and the
/// returned offset points at its first byte.
///
/// # Errors
///
/// Returns an error if the file has vanished or cannot be read. The caller is
/// expected to drop its watch on the file rather than retry.
pub fn read_new_lines(path: &Path, state: &FileWatchState) -> Result<TailRead, TailError> {
    let mut file = open_log(path)?;
    let file_size = file.metadata()?.len();
    let (encoding, bom_len) = LogEncoding::sniff(&mut file)?;

    let start = if state.byte_offset > 0 && file_size >= state.byte_offset {
        state.byte_offset
    } else {
        if state.byte_offset > file_size {
            info!(
                path = %path.display(),
                old_pos = state.byte_offset,
                new_size = file_size,
                "File truncated, resetting position to 0"
            );
        }
        0
    };
    let start = encoding.align_down(start).max(bom_len as u64);

    if start >= file_size {
        trace!(path = %path.display(), "No new bytes to read");
        return Ok(TailRead {
            lines: Vec::new(),
            new_offset: start.max(state.byte_offset.min(file_size)),
        });
    }

    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity(usize::try_from(file_size - start).unwrap_or(0));
    file.read_to_end(&mut buf)?;

    let complete = encoding.complete_len(&buf);
    let text = encoding.decode(&buf[..complete]);
    let lines: Vec<String> = split_lines(&text)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    debug!(
        path = %path.display(),
        start,
        line_count = lines.len(),
        "Read new lines from file"
    );

    Ok(TailRead {
        lines,
        new_offset: start + complete as u64,
    })
}

/// Finds the most recent line in `path` matching `pattern`.
///
/// Only the last `tail_size` bytes (plus a small slack) are scanned at first;
/// if nothing matches there and the file is at most
/// [`FULL_SCAN_LIMIT_BYTES`], the whole file is scanned instead.
///
/// # Errors
///
/// Returns an error if the file has vanished or cannot be read.
pub fn find_last_matching_line(
    path: &Path,
    pattern: &Regex,
    tail_size: u64,
) -> Result<Option<String>, TailError> {
    let mut file = open_log(path)?;
    let file_size = file.metadata()?.len();
    let (encoding, bom_len) = LogEncoding::sniff(&mut file)?;
    let body_start = bom_len as u64;

    let seek_point = encoding
        .align_down(file_size.saturating_sub(tail_size + TAIL_SLACK_BYTES))
        .max(body_start);

    let found = last_match_from(&mut file, encoding, seek_point, seek_point > body_start, pattern)?;
    if found.is_some() || seek_point == body_start {
        return Ok(found);
    }

    if file_size > FULL_SCAN_LIMIT_BYTES {
        debug!(
            path = %path.display(),
            file_size,
            "No match in tail window, file too large for full scan"
        );
        return Ok(None);
    }

    debug!(path = %path.display(), "No match in tail window, scanning whole file");
    last_match_from(&mut file, encoding, body_start, false, pattern)
}

/// Scans from `start` to EOF and returns the last line matching `pattern`.
fn last_match_from(
    file: &mut File,
    encoding: LogEncoding,
    start: u64,
    skip_first_line: bool,
    pattern: &Regex,
) -> Result<Option<String>, TailError> {
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let text = encoding.decode(&buf);
    let found = split_lines(&text)
        .skip(usize::from(skip_first_line))
        .filter(|line| pattern.is_match(line))
        .last()
        .map(str::to_string);

    Ok(found)
}

/// Opens a log file, mapping common failures to specific variants.
fn open_log(path: &Path) -> Result<File, TailError> {
    File::open(path).map_err(|e| classify_io_error(path, e))
}

fn classify_io_error(path: &Path, error: std::io::Error) -> TailError {
    match error.kind() {
        std::io::ErrorKind::NotFound => TailError::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => TailError::PermissionDenied(path.to_path_buf()),
        _ => TailError::Io(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::encoding::utf16le_with_bom;
    use std::io::Write;
    use tempfile::TempDir;

    /// Creates a temporary directory with a test structure.
    fn create_test_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp dir")
    }

    /// Creates a log file with initial content.
    fn create_log_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).expect("Failed to create file");
        file.write_all(content).expect("Failed to write content");
        path
    }

    fn append(path: &Path, content: &[u8]) {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(path)
            .expect("Failed to open file");
        file.write_all(content).expect("Failed to append");
    }

    fn state_at(offset: u64) -> FileWatchState {
        FileWatchState {
            byte_offset: offset,
            ..FileWatchState::default()
        }
    }

    fn jump_pattern() -> Regex {
        Regex::new(r"Jumping from (.+?) to (.+)").unwrap()
    }

    #[test]
    fn test_reads_only_appended_lines() {
        let temp_dir = create_test_dir();
        let initial = b"[ 2024.01.01 10:00:00 ] (None) first\n";
        let path = create_log_file(temp_dir.path(), "game.txt", initial);

        append(&path, b"[ 2024.01.01 10:00:01 ] (None) second\n");
        append(&path, b"[ 2024.01.01 10:00:02 ] (None) third\n");

        let read = read_new_lines(&path, &state_at(initial.len() as u64)).unwrap();
        assert_eq!(
            read.lines,
            vec![
                "[ 2024.01.01 10:00:01 ] (None) second",
                "[ 2024.01.01 10:00:02 ] (None) third"
            ]
        );
        assert_eq!(read.new_offset, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_second_read_without_writes_is_empty() {
        let temp_dir = create_test_dir();
        let path = create_log_file(temp_dir.path(), "game.txt", b"line one\nline two\n");

        let first = read_new_lines(&path, &FileWatchState::default()).unwrap();
        assert_eq!(first.lines.len(), 2);

        let second = read_new_lines(&path, &state_at(first.new_offset)).unwrap();
        assert!(second.lines.is_empty());
        assert_eq!(second.new_offset, first.new_offset);
    }

    #[test]
    fn test_truncation_restarts_from_zero() {
        let temp_dir = create_test_dir();
        let initial = b"line one\nline two\nline three\n";
        let path = create_log_file(temp_dir.path(), "game.txt", initial);

        fs::write(&path, b"rotated\n").expect("Failed to truncate");

        let read = read_new_lines(&path, &state_at(initial.len() as u64)).unwrap();
        assert_eq!(read.lines, vec!["rotated"]);
        assert_eq!(read.new_offset, 8);
    }

    #[test]
    fn test_partial_line_left_for_next_read() {
        let temp_dir = create_test_dir();
        let path = create_log_file(temp_dir.path(), "game.txt", b"complete\npart");

        let read = read_new_lines(&path, &FileWatchState::default()).unwrap();
        assert_eq!(read.lines, vec!["complete"]);
        assert_eq!(read.new_offset, 9);

        append(&path, b"ial\n");
        let read = read_new_lines(&path, &state_at(read.new_offset)).unwrap();
        assert_eq!(read.lines, vec!["partial"]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let temp_dir = create_test_dir();
        let path = create_log_file(temp_dir.path(), "game.txt", b"one\r\n\r\ntwo\r\n");

        let read = read_new_lines(&path, &FileWatchState::default()).unwrap();
        assert_eq!(read.lines, vec!["one", "two"]);
    }

    #[test]
    fn test_utf16_chat_log_incremental() {
        let temp_dir = create_test_dir();
        let initial = utf16le_with_bom("header\r\n");
        let path = create_log_file(temp_dir.path(), "Local_1.txt", &initial);

        let first = read_new_lines(&path, &FileWatchState::default()).unwrap();
        assert_eq!(first.lines, vec!["header"]);
        assert_eq!(first.new_offset, initial.len() as u64);

        let body: Vec<u8> = "[ 2024.01.01 10:00:00 ] EVE System > Channel changed to Local : Jita\r\n"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        append(&path, &body);

        let second = read_new_lines(&path, &state_at(first.new_offset)).unwrap();
        assert_eq!(
            second.lines,
            vec!["[ 2024.01.01 10:00:00 ] EVE System > Channel changed to Local : Jita"]
        );
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = read_new_lines(Path::new("/nonexistent/game.txt"), &FileWatchState::default())
            .unwrap_err();
        assert!(matches!(err, TailError::NotFound(_)));
    }

    #[test]
    fn test_find_last_returns_most_recent_match() {
        let temp_dir = create_test_dir();
        let content = b"[ 2024.01.01 10:00:00 ] (None) Jumping from Jita to Perimeter\n\
[ 2024.01.01 10:01:00 ] (notify) something else happened here\n\
[ 2024.01.01 10:02:00 ] (None) Jumping from Perimeter to Urlen\n\
[ 2024.01.01 10:03:00 ] (combat) 120 from Hostile\n";
        let path = create_log_file(temp_dir.path(), "game.txt", content);

        let found = find_last_matching_line(&path, &jump_pattern(), DEFAULT_TAIL_SIZE_BYTES)
            .unwrap()
            .unwrap();
        assert!(found.ends_with("Jumping from Perimeter to Urlen"));
    }

    #[test]
    fn test_find_last_falls_back_to_full_scan() {
        let temp_dir = create_test_dir();
        let mut content = b"[ 2024.01.01 10:00:00 ] (None) Jumping from Jita to Perimeter\n".to_vec();
        for i in 0..200 {
            content.extend_from_slice(format!("[ 2024.01.01 10:00:01 ] (combat) filler line {i}\n").as_bytes());
        }
        let path = create_log_file(temp_dir.path(), "game.txt", &content);

        // A tail window far smaller than the file misses the only match
        let found = find_last_matching_line(&path, &jump_pattern(), 64).unwrap();
        assert!(found.unwrap().ends_with("Jumping from Jita to Perimeter"));
    }

    #[test]
    fn test_find_last_discards_partial_first_line() {
        let temp_dir = create_test_dir();
        let mut content = Vec::new();
        for _ in 0..100 {
            content.extend_from_slice(b"[ 2024.01.01 10:00:01 ] (combat) filler filler filler filler\n");
        }
        content.extend_from_slice(b"[ 2024.01.01 10:05:00 ] (None) Jumping from Amarr to Ashab\n");
        let path = create_log_file(temp_dir.path(), "game.txt", &content);

        let pattern = Regex::new(r"filler").unwrap();
        let found = find_last_matching_line(&path, &pattern, 128).unwrap().unwrap();
        assert_eq!(found, "[ 2024.01.01 10:00:01 ] (combat) filler filler filler filler");
    }

    #[test]
    fn test_find_last_in_utf16_chat_log() {
        let temp_dir = create_test_dir();
        let content = utf16le_with_bom(
            "\r\n[ 2024.01.01 09:00:00 ] EVE System > Channel changed to Local : Amarr\r\n\
[ 2024.01.01 10:00:00 ] EVE System > Channel changed to Local : Jita\r\n\
[ 2024.01.01 10:00:05 ] Jane Doe > o7\r\n",
        );
        let path = create_log_file(temp_dir.path(), "Local_1.txt", &content);

        let pattern = Regex::new(r"Channel changed to Local\s*:\s*(.+)").unwrap();
        let found = find_last_matching_line(&path, &pattern, DEFAULT_TAIL_SIZE_BYTES)
            .unwrap()
            .unwrap();
        assert!(found.ends_with("Local : Jita"));
    }

    #[test]
    fn test_find_last_no_match() {
        let temp_dir = create_test_dir();
        let path = create_log_file(temp_dir.path(), "game.txt", b"nothing to see\n");

        let found = find_last_matching_line(&path, &jump_pattern(), DEFAULT_TAIL_SIZE_BYTES).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_state_at_end() {
        let temp_dir = create_test_dir();
        let path = create_log_file(temp_dir.path(), "game.txt", b"0123456789\n");

        let state = FileWatchState::at_end(&path).unwrap();
        assert_eq!(state.byte_offset, 11);
        assert_eq!(state.last_size, 11);
        assert!(state.last_modified.is_some());
        assert!(state.last_processed.is_none());
    }

    #[test]
    fn test_tail_error_display() {
        let err = TailError::NotFound(PathBuf::from("/logs/game.txt"));
        assert_eq!(err.to_string(), "log file not found: /logs/game.txt");
    }
}
