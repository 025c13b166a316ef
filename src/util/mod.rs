#![allow(clippy::module_name_repetitions)]
//! Small utilities: html/json escaping, URL decoding, header scanning, argv rendering.

pub mod deadline;
pub mod exec;
pub mod text_buf;

pub use deadline::{read_before, write_all_before, Deadline, SocketTimeouts};
pub use text_buf::TextBuf;

pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

/// Split a command line into argv with single/double quote grouping (no escapes, no expansion).
pub fn shell_split(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut quoted = false;

    for ch in s.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                quoted = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                quoted = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if !current.is_empty() || quoted {
                    out.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() || quoted {
        out.push(current);
    }
    out
}

/// Escape text for HTML element content and double/single-quoted attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = TextBuf::with_capacity(s.len() + 8);
    html_escape_into(&mut out, s);
    out.take_string()
}

pub fn html_escape_into(out: &mut TextBuf, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push_char(c),
        }
    }
}

/// Append `s` as a quoted JSON string literal.
pub fn json_escape_into(out: &mut TextBuf, s: &str) {
    out.push_byte(b'"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push_char(c),
        }
    }
    out.push_byte(b'"');
}

/// application/x-www-form-urlencoded value decoding: '+' -> space, %XX -> byte.
/// Invalid percent sequences are kept literally; invalid UTF-8 is replaced.
pub fn url_decode(s: &str) -> String {
    let plus_as_space = s.replace('+', " ");
    let bytes = urlencoding::decode_binary(plus_as_space.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Upper bound on the size of `s` once a client submits it as a form field.
///
/// Unreserved ASCII passes through; every other byte costs `%XX`. Line breaks are
/// counted as the CRLF pair (`%0D%0A`) that browsers send for textarea content.
pub fn form_encoded_len(s: &str) -> usize {
    s.bytes()
        .map(|b| match b {
            b'\n' => 6,
            b if b.is_ascii_alphanumeric() || b"-_.~".contains(&b) => 1,
            _ => 3,
        })
        .sum()
}

pub fn find_crlfcrlf(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    let pattern: &[u8; 4] = b"\r\n\r\n";
    buf.windows(4).position(|w| w == pattern)
}

/// Find end of HTTP headers, accepting either CRLF-CRLF or LF-LF separators.
/// Returns the index just after the header terminator when found.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = find_crlfcrlf(buf) {
        return Some(pos + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}

/// First `max` characters of `s`, with an ellipsis when cut. Used for log/error previews.
pub fn preview(s: &str, max: usize) -> String {
    let mut it = s.chars();
    let head: String = it.by_ref().take(max).collect();
    if it.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
