//! Text encoding detection for EVE log files.
//!
//! The EVE client writes chat logs as UTF-16LE with a byte-order mark and game
//! logs as UTF-8. Everything that tails a log works on raw byte offsets, so
//! this module knows how wide a code unit is, where the last complete line of
//! a buffer ends, and how to decode a byte range into text.

use std::io::{self, Read, Seek, SeekFrom};

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// Bytes inspected when sniffing the encoding of a file.
const SNIFF_BYTES: usize = 64;

/// An encoding the monitor can tail, plus the length of its byte-order mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl LogEncoding {
    /// Detects the encoding of a file from its first bytes.
    ///
    /// Returns the encoding and the length of the byte-order mark (0 when
    /// none is present). Without a BOM, UTF-16 is recognized by the NUL byte
    /// in every other position that mostly-ASCII text produces.
    #[must_use]
    pub fn detect(head: &[u8]) -> (Self, usize) {
        if let Some((encoding, bom_len)) = Encoding::for_bom(head) {
            let detected = if encoding == UTF_16LE {
                Self::Utf16Le
            } else if encoding == UTF_16BE {
                Self::Utf16Be
            } else {
                Self::Utf8
            };
            return (detected, bom_len);
        }

        let units = head.len() / 2;
        if units >= 2 {
            let odd_nuls = head.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
            let even_nuls = head.iter().step_by(2).filter(|b| **b == 0).count();
            if odd_nuls * 2 > units {
                return (Self::Utf16Le, 0);
            }
            if even_nuls * 2 > units {
                return (Self::Utf16Be, 0);
            }
        }

        (Self::Utf8, 0)
    }

    /// Sniffs the encoding of an open file, leaving the cursor at the start.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or seeked.
    pub fn sniff<R: Read + Seek>(reader: &mut R) -> io::Result<(Self, usize)> {
        reader.seek(SeekFrom::Start(0))?;
        let mut head = Vec::with_capacity(SNIFF_BYTES);
        reader.by_ref().take(SNIFF_BYTES as u64).read_to_end(&mut head)?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self::detect(&head))
    }

    /// Width of one code unit in bytes.
    #[must_use]
    pub const fn unit_size(self) -> u64 {
        match self {
            Self::Utf8 => 1,
            Self::Utf16Le | Self::Utf16Be => 2,
        }
    }

    /// Rounds a byte position down to a code-unit boundary.
    #[must_use]
    pub const fn align_down(self, position: u64) -> u64 {
        position - position % self.unit_size()
    }

    /// Length of `bytes` up to and including the last line terminator.
    ///
    /// Returns 0 when the buffer holds no complete line.
    #[must_use]
    pub fn complete_len(self, bytes: &[u8]) -> usize {
        match self {
            Self::Utf8 => bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1),
            Self::Utf16Le | Self::Utf16Be => {
                let newline = match self {
                    Self::Utf16Le => [b'\n', 0],
                    _ => [0, b'\n'],
                };
                let aligned = bytes.len() - bytes.len() % 2;
                bytes[..aligned]
                    .chunks_exact(2)
                    .rposition(|unit| unit == newline)
                    .map_or(0, |i| (i + 1) * 2)
            }
        }
    }

    /// Decodes a byte range that does not start with a byte-order mark.
    ///
    /// Malformed sequences are replaced rather than rejected; log files are
    /// occasionally caught mid-write.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> String {
        let (text, _) = self.encoding().decode_without_bom_handling(bytes);
        text.into_owned()
    }

    fn encoding(self) -> &'static Encoding {
        match self {
            Self::Utf8 => UTF_8,
            Self::Utf16Le => UTF_16LE,
            Self::Utf16Be => UTF_16BE,
        }
    }
}

/// Splits decoded text on `\n`, stripping a trailing `\r` from each line.
///
/// Empty lines are kept: header parsing counts them.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(move |_| !text.is_empty())
}

/// Encodes text as UTF-16LE with a byte-order mark, the chat log format.
#[cfg(test)]
pub(crate) fn utf16le_with_bom(text: &str) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn detects_utf16le_bom() {
        let bytes = utf16le_with_bom("Listener: Jane Doe\n");
        assert_eq!(LogEncoding::detect(&bytes), (LogEncoding::Utf16Le, 2));
    }

    #[test]
    fn detects_utf8_bom() {
        let bytes = b"\xEF\xBB\xBF[ 2024.01.01 10:00:00 ] (None) hello";
        assert_eq!(LogEncoding::detect(bytes), (LogEncoding::Utf8, 3));
    }

    #[test]
    fn detects_utf16le_without_bom() {
        let bytes: Vec<u8> = "Gamelog header".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(LogEncoding::detect(&bytes), (LogEncoding::Utf16Le, 0));
    }

    #[test]
    fn plain_ascii_is_utf8() {
        assert_eq!(
            LogEncoding::detect(b"------------------------------"),
            (LogEncoding::Utf8, 0)
        );
        assert_eq!(LogEncoding::detect(b""), (LogEncoding::Utf8, 0));
    }

    #[test]
    fn sniff_rewinds_reader() {
        let mut cursor = Cursor::new(utf16le_with_bom("abc\n"));
        let (encoding, bom_len) = LogEncoding::sniff(&mut cursor).unwrap();
        assert_eq!(encoding, LogEncoding::Utf16Le);
        assert_eq!(bom_len, 2);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn complete_len_utf8_stops_after_last_newline() {
        assert_eq!(LogEncoding::Utf8.complete_len(b"one\ntwo\nthr"), 8);
        assert_eq!(LogEncoding::Utf8.complete_len(b"partial"), 0);
    }

    #[test]
    fn complete_len_utf16le_respects_unit_boundaries() {
        let bytes = utf16le_with_bom("ab\ncd");
        // BOM (2) + "ab\n" (6)
        assert_eq!(LogEncoding::Utf16Le.complete_len(&bytes), 8);

        // A lone trailing byte never counts as part of a line
        let mut odd = utf16le_with_bom("ab\n");
        odd.push(b'x');
        assert_eq!(LogEncoding::Utf16Le.complete_len(&odd), 8);
    }

    #[test]
    fn align_down_to_code_units() {
        assert_eq!(LogEncoding::Utf16Le.align_down(65_537), 65_536);
        assert_eq!(LogEncoding::Utf8.align_down(65_537), 65_537);
    }

    #[test]
    fn decode_utf16le_body() {
        let bytes = utf16le_with_bom("Jita\r\n");
        assert_eq!(LogEncoding::Utf16Le.decode(&bytes[2..]), "Jita\r\n");
    }

    #[test]
    fn split_lines_keeps_blank_lines_and_strips_cr() {
        let lines: Vec<&str> = split_lines("\r\n\r\n  Listener: Jane\r\n").collect();
        assert_eq!(lines, vec!["", "", "  Listener: Jane"]);
    }

    #[test]
    fn split_lines_of_empty_text_is_empty() {
        assert_eq!(split_lines("").count(), 0);
        assert_eq!(split_lines("last").collect::<Vec<_>>(), vec!["last"]);
    }
}
