//! Header value escaping for STOMP 1.2.
//!
//! | raw  | escaped |
//! |------|---------|
//! | `\`  | `\\`    |
//! | CR   | `\r`    |
//! | LF   | `\n`    |
//! | `:`  | `\c`    |

/// Escape a header value for the wire.
pub fn escape_header_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_header_value`].
///
/// A single left-to-right pass, so `\\n` decodes to `\` followed by `n`.
/// Unknown sequences and a trailing lone backslash are kept literally.
pub fn unescape_header_value(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
