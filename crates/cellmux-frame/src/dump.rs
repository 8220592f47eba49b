/// Render bytes for logs: printable ASCII inline, everything else as `0xNN`.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    let mut was_hex = false;
    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' {
            if was_hex {
                out.push(' ');
                was_hex = false;
            }
            out.push(char::from(b));
        } else {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&format!("0x{b:02X}"));
            was_hex = true;
        }
    }
    out
}

/// Parse hex text such as `"F9 03 3F 01 1C F9"` or `"f9033f011cf9"`.
///
/// Whitespace, commas, colons and `0x` prefixes are ignored.
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let cleaned: String = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|tok| {
            tok.strip_prefix("0x")
                .or_else(|| tok.strip_prefix("0X"))
                .unwrap_or(tok)
        })
        .collect();
    if cleaned.len() % 2 != 0 {
        return None;
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(cleaned.get(i..i + 2)?, 16).ok())
        .collect()
}
