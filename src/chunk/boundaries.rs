//! UTF-8 boundary helpers for chunking

/// Widest UTF-8 encoded character, in bytes
pub const MAX_CHAR_BYTES: usize = 4;

/// Widest character once escaped inside a JSON string (`\u001f`)
pub const MAX_ESCAPED_CHAR_BYTES: usize = 6;

/// Bytes `c` occupies inside a JSON string literal
pub fn json_escaped_len(c: char) -> usize {
    match c {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

/// Largest char boundary at or before `pos`
pub fn floor_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut adjusted = pos;
    while adjusted > 0 && !text.is_char_boundary(adjusted) {
        adjusted -= 1;
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_char_boundary() {
        let text = "a한b"; // '한' is 3 bytes: 1..4
        assert_eq!(floor_char_boundary(text, 0), 0);
        assert_eq!(floor_char_boundary(text, 1), 1);
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(floor_char_boundary(text, 3), 1);
        assert_eq!(floor_char_boundary(text, 4), 4);
        assert_eq!(floor_char_boundary(text, 99), text.len());
    }

    #[test]
    fn test_json_escaped_len_matches_serde() {
        for c in ['a', '"', '\\', '\n', '\u{01}', '\u{1f}', '\u{7f}', '한', '😀'] {
            let encoded = serde_json::to_string(&c.to_string()).unwrap();
            assert_eq!(json_escaped_len(c), encoded.len() - 2, "{:?}", c);
        }
    }
}
