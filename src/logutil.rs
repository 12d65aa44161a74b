//! Log-safe rendering of untrusted input: advertised node names and raw frames.

/// Longest advertised name we echo verbatim; anything longer is cut.
const MAX_NAME_PREVIEW: usize = 32;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
/// - other control characters => `\xNN`
///
/// Node names arrive straight off the radio, so they are capped as well.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_NAME_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_NAME_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lowercase hex of at most `max` leading bytes, `..` appended when cut.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out: String = data
        .iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect();
    if data.len() > max {
        out.push_str("..");
    }
    out
}
