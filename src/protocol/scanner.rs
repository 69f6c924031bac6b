//! Output scanning
//!
//! Pure functions over the accumulated byte buffer of a pending command:
//! locating the completion marker and cutting the command's own output out of
//! the surrounding echo, prompt and terminal control sequences.

use regex::Regex;
use std::sync::OnceLock;

/// A completion marker found in the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    /// Offset of the sentinel
    pub start: usize,
    /// Offset just past the exit status digits
    pub end: usize,
    pub exit_code: i32,
}

/// Text extracted for a command, plus abandoned sentinels that showed up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub output: String,
    pub retired: Vec<String>,
}

/// Last occurrence of `needle` in `haystack`
pub fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|window| window == needle)
}

/// Find the completion marker for `sentinel`.
///
/// Only the last occurrence is considered. The shell's echo of the typed line
/// carries the sentinel followed by `$?`, not digits, so it never matches; a
/// marker whose digits are not yet followed by another byte is incomplete and
/// also does not match.
pub fn find_marker(buffer: &[u8], sentinel: &str) -> Option<Marker> {
    let needle = sentinel.as_bytes();
    let start = rfind(buffer, needle)?;
    let digits_start = start + needle.len();

    let digits = buffer[digits_start..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }

    let end = digits_start + digits;
    if end >= buffer.len() {
        return None;
    }

    let exit_code = std::str::from_utf8(&buffer[digits_start..end])
        .ok()?
        .parse()
        .ok()?;

    Some(Marker {
        start,
        end,
        exit_code,
    })
}

fn control_sequences() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // CSI, OSC (BEL or ST terminated), then two-byte escapes
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
            .expect("control sequence pattern is valid")
    })
}

/// Remove terminal control sequences and normalize line endings
pub fn strip_terminal_noise(text: &str) -> String {
    control_sequences()
        .replace_all(text, "")
        .replace("\r\n", "\n")
        .replace('\r', "")
}

/// Cut the output of a command out of `buffer[..end]`.
///
/// The output starts on the line after the last start marker (when present)
/// and ends where the marker begins. Everything before the start marker,
/// including the shell's echo of the injected line and any prompt, is skipped. Lines carrying an abandoned sentinel are
/// dropped and that sentinel is reported as retired. The result never contains
/// `sentinel`.
pub fn extract_output(
    buffer: &[u8],
    end: usize,
    sentinel: &str,
    start_marker: &str,
    abandoned: &[String],
) -> Extracted {
    let head = &buffer[..end.min(buffer.len())];

    let start = match rfind(head, start_marker.as_bytes()) {
        Some(pos) => {
            let after = pos + start_marker.len();
            head[after..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|nl| after + nl + 1)
                .unwrap_or(head.len())
        }
        None => 0,
    };

    let mut text = strip_terminal_noise(&String::from_utf8_lossy(&head[start..]));

    let mut retired = Vec::new();
    for stale in abandoned {
        if find_marker(buffer, stale).is_some() {
            retired.push(stale.clone());
        }
        if text.contains(stale.as_str()) {
            text = text
                .lines()
                .filter(|line| !line.contains(stale.as_str()))
                .collect::<Vec<_>>()
                .join("\n");
        }
    }

    if text.contains(sentinel) {
        text = text.replace(sentinel, "");
    }

    Extracted {
        output: text.trim_end().trim_start_matches('\n').to_string(),
        retired,
    }
}
