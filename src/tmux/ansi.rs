//! Escape-sequence stripping for captured pane text.
//!
//! A single forward scan copies the text between escape sequences into a
//! buffer sized to the input. Input without any ESC byte is returned as-is.

use std::borrow::Cow;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Whether `text` contains at least one ESC byte.
pub fn contains_escapes(text: &str) -> bool {
    text.as_bytes().contains(&ESC)
}

/// Remove CSI, OSC and other ESC-introduced sequences from `text`.
///
/// Every ESC byte is consumed, so the output never contains one and a second
/// pass is always the borrowed fast path.
pub fn strip(text: &str) -> Cow<'_, str> {
    if !contains_escapes(text) {
        return Cow::Borrowed(text);
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied_from = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != ESC {
            i += 1;
            continue;
        }
        out.push_str(&text[copied_from..i]);
        i = skip_sequence(bytes, i);
        copied_from = i;
    }
    out.push_str(&text[copied_from..]);

    Cow::Owned(out)
}

/// Returns the index just past the escape sequence starting at `start`.
///
/// Only ever stops on ASCII bytes or the end of input, so the returned index
/// is always a char boundary.
fn skip_sequence(bytes: &[u8], start: usize) -> usize {
    let len = bytes.len();
    let mut i = start + 1;
    if i >= len {
        return len;
    }

    match bytes[i] {
        // CSI: parameters 0x30-0x3F, intermediates 0x20-0x2F, one final 0x40-0x7E.
        b'[' => {
            i += 1;
            while i < len && (0x20..=0x3f).contains(&bytes[i]) {
                i += 1;
            }
            if i < len && (0x40..=0x7e).contains(&bytes[i]) {
                i + 1
            } else {
                // Malformed or truncated: drop what was scanned.
                i
            }
        }
        // OSC: payload up to BEL or ESC '\'. Unterminated runs to the end.
        b']' => {
            i += 1;
            while i < len {
                match bytes[i] {
                    BEL => return i + 1,
                    ESC if i + 1 < len && bytes[i + 1] == b'\\' => return i + 2,
                    _ => i += 1,
                }
            }
            len
        }
        // nF escapes such as charset designation `ESC ( B`.
        0x20..=0x2f => {
            while i < len && (0x20..=0x2f).contains(&bytes[i]) {
                i += 1;
            }
            if i < len && (0x30..=0x7e).contains(&bytes[i]) {
                i + 1
            } else {
                i
            }
        }
        ESC => i,
        b if b.is_ascii() => i + 1,
        _ => i,
    }
}
