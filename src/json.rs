/*!
Narrow JSON support for the chat-completion wire shape.

`encode_request` emits the fixed request object; `extract_content` pulls the first
`"content"` string out of a reply without building a document tree. Anything outside
those two shapes is not handled here.
*/

use crate::backend::CompletionRequest;
use crate::util::{json_escape_into, TextBuf};
use std::fmt::Write as _;

/// `{"model":..,"temperature":0.600[,"max_tokens":N],"messages":[...]}`
pub fn encode_request(req: &CompletionRequest) -> String {
    let mut out = TextBuf::with_capacity(256);
    out.push_str("{\"model\":");
    json_escape_into(&mut out, &req.model);
    let _ = write!(out, ",\"temperature\":{:.3}", req.temperature);
    if let Some(n) = req.max_tokens {
        let _ = write!(out, ",\"max_tokens\":{n}");
    }
    out.push_str(",\"messages\":[");
    for (i, turn) in req.messages.iter().enumerate() {
        if i > 0 {
            out.push_byte(b',');
        }
        out.push_str("{\"role\":");
        json_escape_into(&mut out, turn.role.as_str());
        out.push_str(",\"content\":");
        json_escape_into(&mut out, &turn.content);
        out.push_byte(b'}');
    }
    out.push_str("]}");
    out.take_string()
}

/// First string value under a `"content"` key, unescaped.
///
/// Occurrences whose value is not a string (`null`, numbers, objects) are skipped.
/// Returns `None` when no string value is found or the input ends inside it.
pub fn extract_content(body: &str) -> Option<String> {
    const KEY: &str = "\"content\"";
    let bytes = body.as_bytes();
    let mut from = 0usize;
    while let Some(rel) = body[from..].find(KEY) {
        let key_end = from + rel + KEY.len();
        from = key_end;
        let mut i = skip_ws(bytes, key_end);
        if bytes.get(i) != Some(&b':') {
            continue;
        }
        i = skip_ws(bytes, i + 1);
        match bytes.get(i) {
            Some(b'"') => return scan_string(body, i + 1),
            Some(_) => continue,
            None => return None,
        }
    }
    None
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n') {
        i += 1;
    }
    i
}

/// Scan a string body starting just after the opening quote.
fn scan_string(body: &str, start: usize) -> Option<String> {
    let mut out = String::new();
    let mut chars = body[start..].chars();
    loop {
        let c = chars.next()?;
        match c {
            '"' => return Some(out),
            '\\' => {
                let esc = chars.next()?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => {}
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    '/' => out.push('/'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'u' => {
                        let hi = read_hex4(&mut chars)?;
                        out.push(decode_utf16_escape(hi, &mut chars)?);
                    }
                    other => out.push(other),
                }
            }
            c => out.push(c),
        }
    }
}

fn read_hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let mut v = 0u32;
    for _ in 0..4 {
        v = v * 16 + chars.next()?.to_digit(16)?;
    }
    Some(v)
}

fn decode_utf16_escape(hi: u32, chars: &mut std::str::Chars<'_>) -> Option<char> {
    if !(0xD800..0xDC00).contains(&hi) {
        return Some(char::from_u32(hi).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    // High surrogate: a `\uDC00..DFFF` partner must follow, otherwise substitute.
    let mut look = chars.clone();
    if look.next() == Some('\\') && look.next() == Some('u') {
        if let Some(lo) = read_hex4(&mut look) {
            if (0xDC00..0xE000).contains(&lo) {
                *chars = look;
                let cp = 0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00);
                return Some(char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
        }
    }
    Some(char::REPLACEMENT_CHARACTER)
}
