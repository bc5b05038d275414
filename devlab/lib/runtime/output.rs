use std::{
    io::{stdout, IsTerminal},
    sync::LazyLock,
};

use regex::Regex;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Whether stdout is attached to a terminal.
pub static IS_TTY: LazyLock<bool> = LazyLock::new(|| stdout().is_terminal());

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").unwrap());

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Sanitizes a raw line of child process output.
///
/// The bytes are decoded permissively, surrounding whitespace is stripped, and escape
/// sequences are either closed (when stdout is a terminal, so colors do not bleed into our
/// own output) or removed entirely.
pub fn sanitize_line(raw: &[u8]) -> String {
    sanitize_line_for(raw, *IS_TTY)
}

fn sanitize_line_for(raw: &[u8], tty: bool) -> String {
    let decoded = String::from_utf8_lossy(raw);
    let mut sanitized = decoded.trim().to_string();

    if tty {
        if sanitized.contains("\x1b[") {
            sanitized.push_str("\x1b[0m");
        }
    } else {
        sanitized = ANSI_ESCAPE.replace_all(&sanitized, "").into_owned();
    }

    sanitized
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_escapes_without_terminal() {
        let raw = b"\x1b[31mred text\x1b[0m\n";
        assert_eq!(sanitize_line_for(raw, false), "red text");
    }

    #[test]
    fn test_sanitize_closes_escapes_on_terminal() {
        let raw = b"\x1b[31mred text\n";
        assert_eq!(sanitize_line_for(raw, true), "\x1b[31mred text\x1b[0m");
    }

    #[test]
    fn test_sanitize_replaces_invalid_utf8() {
        let raw = b"ok \xff\xfe bytes";
        let sanitized = sanitize_line_for(raw, false);
        assert!(sanitized.starts_with("ok"));
        assert!(sanitized.ends_with("bytes"));
    }

    #[test]
    fn test_sanitize_trims_whitespace() {
        assert_eq!(sanitize_line_for(b"  padded  \n", false), "padded");
    }
}
