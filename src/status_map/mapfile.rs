//! The mapfile text format: a comment-stripped, line-oriented encoding of a
//! [`super::StatusMap`]'s sblock vector plus its current position/pass state.
//!
//! ```text
//! # Rescue Logfile. Created by ... version ...
//! # Command line: ...
//! # current_pos  current_status
//! 0x00000000     ?
//! #      pos        size  status
//! 0x00000000  0x00001000  +
//! 0x00001000  0x00000400  -
//! 0x00001400  0xFFFFFFFF  ?
//! ```
//!
//! A `#` begins a comment that runs to end of line, even mid-line. Blank
//! lines (after comment stripping) are ignored. Numbers accept a `0x`/`0X`
//! hex prefix, a bare leading `0` for octal, or plain decimal. A `size` of
//! `-1` means "to the largest representable position" ([`crate::block::MAX`]).

use std::fs;
use std::io;
use std::path::Path;

use chrono::Utc;
use thiserror::Error;

use crate::block::{PassState, Sblock, Status};

#[derive(Debug, Error)]
pub enum MapfileError {
    #[error("I/O error reading/writing mapfile: {0}")]
    Io(#[from] io::Error),
    #[error("mapfile line {0}: missing or malformed status line")]
    BadStatusLine(usize),
    #[error("mapfile line {0}: malformed sblock line")]
    BadSblockLine(usize),
    #[error("mapfile line {0}: sblock does not follow the previous one (non-adjacent or overlapping)")]
    NotAdjacent(usize),
}

/// Parsed contents of a mapfile.
pub struct MapfileContents {
    pub sblocks: Vec<Sblock>,
    pub current_pos: i64,
    pub current_status: PassState,
}

/// Strip a `#`-to-end-of-line comment and leading/trailing whitespace.
/// Returns `None` for a line that is blank after stripping.
fn strip_comment(raw: &str) -> Option<&str> {
    let uncommented = match raw.find('#') {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    let trimmed = uncommented.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Read and parse a mapfile. Returns `Ok(None)` if the file does not exist
/// (mirrors the original's "no logfile yet" case, which is not an error).
pub fn read_mapfile(path: &Path) -> Result<Option<MapfileContents>, MapfileError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut lines = text
        .lines()
        .enumerate()
        .filter_map(|(i, l)| strip_comment(l).map(|s| (i + 1, s)));

    let (status_lineno, status_line) = match lines.next() {
        Some(pair) => pair,
        None => {
            return Ok(Some(MapfileContents {
                sblocks: Vec::new(),
                current_pos: 0,
                current_status: PassState::Copying,
            }))
        }
    };

    let mut fields = status_line.split_whitespace();
    let current_pos = fields
        .next()
        .and_then(|s| parse_hex_or_dec(s))
        .filter(|&p| p >= 0)
        .ok_or(MapfileError::BadStatusLine(status_lineno))?;
    let current_status = fields
        .next()
        .and_then(|s| s.chars().next())
        .and_then(PassState::from_symbol)
        .ok_or(MapfileError::BadStatusLine(status_lineno))?;

    let mut sblocks = Vec::new();
    for (lineno, line) in lines {
        let mut fields = line.split_whitespace();
        let pos = fields
            .next()
            .and_then(parse_hex_or_dec)
            .ok_or(MapfileError::BadSblockLine(lineno))?;
        let size = fields
            .next()
            .and_then(parse_hex_or_dec)
            .ok_or(MapfileError::BadSblockLine(lineno))?;
        let status = fields
            .next()
            .and_then(|s| s.chars().next())
            .and_then(Status::from_symbol)
            .ok_or(MapfileError::BadSblockLine(lineno))?;
        if pos < 0 || !(size > 0 || size == -1 || (size == 0 && pos == 0)) {
            return Err(MapfileError::BadSblockLine(lineno));
        }
        let sb = Sblock::new(pos, size, status);
        if let Some(last) = sblocks.last() {
            if !sb.follows(last) {
                return Err(MapfileError::NotAdjacent(lineno));
            }
        }
        sblocks.push(sb);
    }

    Ok(Some(MapfileContents {
        sblocks,
        current_pos,
        current_status,
    }))
}

/// Parses a number the way C's `%lli`/`strtoll(_, _, 0)` does: `0x`/`0X`
/// prefix is hex, a bare leading `0` (with more digits following) is octal,
/// anything else is decimal. `-1` is handled directly since it has no
/// unsigned-octal reading.
fn parse_hex_or_dec(s: &str) -> Option<i64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if s == "-1" {
        Some(-1)
    } else if let Some(oct) = s.strip_prefix('0').filter(|rest| !rest.is_empty()) {
        i64::from_str_radix(oct, 8).ok()
    } else {
        s.parse().ok()
    }
}

/// Write the mapfile header, status line and sblock list to `path`.
pub fn write_mapfile(
    path: &Path,
    sblocks: &[Sblock],
    current_pos: i64,
    current_status: PassState,
    command_line: &str,
) -> io::Result<()> {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Rescue Logfile. Created by rescue-engine at {}",
        Utc::now().to_rfc3339()
    );
    let _ = writeln!(out, "# Command line: {command_line}");
    let _ = writeln!(out, "# current_pos  current_status");
    let _ = writeln!(out, "0x{current_pos:08X}     {}", current_status.symbol());
    let _ = writeln!(out, "#      pos        size  status");
    for sb in sblocks {
        let _ = writeln!(
            out,
            "0x{:08X}  0x{:08X}  {}",
            sb.pos(),
            sb.size(),
            sb.status().symbol()
        );
    }
    fs::write(path, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Status;

    #[test]
    fn strip_comment_drops_trailing_comment() {
        assert_eq!(strip_comment("0x0 0x10 +  # note"), Some("0x0 0x10 +"));
    }

    #[test]
    fn strip_comment_blank_line_is_none() {
        assert_eq!(strip_comment("   # only a comment"), None);
        assert_eq!(strip_comment("   "), None);
    }

    #[test]
    fn roundtrip_through_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.map");
        let sblocks = vec![
            Sblock::new(0, 0x1000, Status::Finished),
            Sblock::new(0x1000, 0x400, Status::BadSector),
            Sblock::new(0x1400, -1, Status::NonTried),
        ];
        write_mapfile(&path, &sblocks, 0x1400, PassState::Trimming, "rescue-engine a b").unwrap();
        let parsed = read_mapfile(&path).unwrap().unwrap();
        assert_eq!(parsed.current_pos, 0x1400);
        assert_eq!(parsed.current_status, PassState::Trimming);
        assert_eq!(parsed.sblocks, sblocks);
    }

    #[test]
    fn missing_file_is_ok_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.map");
        assert!(read_mapfile(&path).unwrap().is_none());
    }

    #[test]
    fn accepts_octal_leading_zero_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("octal.map");
        fs::write(&path, "00 ?\n00 010 +\n010 -1 ?\n").unwrap();
        let parsed = read_mapfile(&path).unwrap().unwrap();
        assert_eq!(parsed.current_pos, 0);
        assert_eq!(parsed.sblocks[0], Sblock::new(0, 0o10, Status::Finished));
        assert_eq!(parsed.sblocks[1].pos(), 0o10);
    }

    #[test]
    fn non_adjacent_sblocks_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.map");
        fs::write(
            &path,
            "0x0 ?\n0x0 0x10 +\n0x20 0x10 -\n", // gap between 0x10 and 0x20
        )
        .unwrap();
        assert!(matches!(
            read_mapfile(&path),
            Err(MapfileError::NotAdjacent(_))
        ));
    }
}
