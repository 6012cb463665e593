//! Text encodings of `.strings` tables.

use std::fmt::Display;

/// A Unicode text encoding. The bare `Utf16`/`Utf32` variants write a
/// little-endian byte order mark, the explicit-endian ones write none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    Utf8,
    Utf16,
    Utf16Le,
    Utf16Be,
    Utf32,
    Utf32Le,
    Utf32Be,
    Ascii,
}

impl TextEncoding {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "utf-16" | "utf16" => Some(TextEncoding::Utf16),
            "utf-16le" | "utf16le" => Some(TextEncoding::Utf16Le),
            "utf-16be" | "utf16be" => Some(TextEncoding::Utf16Be),
            "utf-32" | "utf32" => Some(TextEncoding::Utf32),
            "utf-32le" | "utf32le" => Some(TextEncoding::Utf32Le),
            "utf-32be" | "utf32be" => Some(TextEncoding::Utf32Be),
            "ascii" | "us-ascii" => Some(TextEncoding::Ascii),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16 => "utf-16",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Utf32 => "utf-32",
            TextEncoding::Utf32Le => "utf-32le",
            TextEncoding::Utf32Be => "utf-32be",
            TextEncoding::Ascii => "ascii",
        }
    }
}

impl Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a byte-order-mark (or its absence) says about some input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detected {
    pub encoding: TextEncoding,
    /// Length of the byte order mark at the start of the input, 0 if none.
    pub bom_len: usize,
}

/// Guesses the encoding of `bytes`. A byte order mark wins, otherwise NUL
/// bytes in the first code unit suggest UTF-16 or UTF-32, and anything else
/// is taken to be UTF-8.
pub fn detect(bytes: &[u8]) -> Detected {
    let with_bom = |encoding, bom_len| Detected { encoding, bom_len };

    match bytes {
        [0xFF, 0xFE, 0x00, 0x00, ..] => with_bom(TextEncoding::Utf32Le, 4),
        [0x00, 0x00, 0xFE, 0xFF, ..] => with_bom(TextEncoding::Utf32Be, 4),
        [0xEF, 0xBB, 0xBF, ..] => with_bom(TextEncoding::Utf8, 3),
        [0xFF, 0xFE, ..] => with_bom(TextEncoding::Utf16Le, 2),
        [0xFE, 0xFF, ..] => with_bom(TextEncoding::Utf16Be, 2),
        [a, 0x00, 0x00, 0x00, ..] if *a != 0 => with_bom(TextEncoding::Utf32Le, 0),
        [0x00, 0x00, 0x00, d, ..] if *d != 0 => with_bom(TextEncoding::Utf32Be, 0),
        [a, 0x00, ..] if *a != 0 => with_bom(TextEncoding::Utf16Le, 0),
        [0x00, b, ..] if *b != 0 => with_bom(TextEncoding::Utf16Be, 0),
        _ => with_bom(TextEncoding::Utf8, 0),
    }
}

/// Decodes `bytes`, which must not start with a byte order mark for
/// explicit-endian encodings. A BOM matching the encoding is skipped.
pub fn decode(bytes: &[u8], encoding: TextEncoding) -> Result<String, String> {
    let detected = detect(bytes);
    let body = match (encoding, detected.encoding) {
        (TextEncoding::Utf8, TextEncoding::Utf8)
        | (TextEncoding::Utf16 | TextEncoding::Utf16Le, TextEncoding::Utf16Le)
        | (TextEncoding::Utf16 | TextEncoding::Utf16Be, TextEncoding::Utf16Be)
        | (TextEncoding::Utf32 | TextEncoding::Utf32Le, TextEncoding::Utf32Le)
        | (TextEncoding::Utf32 | TextEncoding::Utf32Be, TextEncoding::Utf32Be) => &bytes[detected.bom_len..],
        _ => bytes,
    };

    // Without a mark, the unmarked UTF-16/32 forms read as big-endian.
    let effective = match (encoding, detected.bom_len, detected.encoding) {
        (TextEncoding::Utf16, 0, _) => TextEncoding::Utf16Be,
        (TextEncoding::Utf16, _, found) => found,
        (TextEncoding::Utf32, 0, _) => TextEncoding::Utf32Be,
        (TextEncoding::Utf32, _, found) => found,
        (other, _, _) => other,
    };

    let invalid = || format!("input is not valid {encoding}");

    match effective {
        TextEncoding::Utf8 => String::from_utf8(body.to_vec()).map_err(|_| invalid()),
        TextEncoding::Ascii => {
            if body.is_ascii() {
                String::from_utf8(body.to_vec()).map_err(|_| invalid())
            } else {
                Err(invalid())
            }
        }
        TextEncoding::Utf16Le | TextEncoding::Utf16Be | TextEncoding::Utf16 => {
            if body.len() % 2 != 0 {
                return Err(invalid());
            }
            let units = body.chunks_exact(2).map(|pair| {
                let pair = [pair[0], pair[1]];
                if effective == TextEncoding::Utf16Le {
                    u16::from_le_bytes(pair)
                } else {
                    u16::from_be_bytes(pair)
                }
            });
            char::decode_utf16(units)
                .collect::<Result<String, _>>()
                .map_err(|_| invalid())
        }
        TextEncoding::Utf32Le | TextEncoding::Utf32Be | TextEncoding::Utf32 => {
            if body.len() % 4 != 0 {
                return Err(invalid());
            }
            body.chunks_exact(4)
                .map(|quad| {
                    let quad = [quad[0], quad[1], quad[2], quad[3]];
                    let code = if effective == TextEncoding::Utf32Le {
                        u32::from_le_bytes(quad)
                    } else {
                        u32::from_be_bytes(quad)
                    };
                    char::from_u32(code)
                })
                .collect::<Option<String>>()
                .ok_or_else(invalid)
        }
    }
}

/// Encodes `text`. Fails only when the encoding cannot represent a character,
/// which can happen for ASCII.
pub fn encode(text: &str, encoding: TextEncoding) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();

    match encoding {
        TextEncoding::Utf8 => out.extend_from_slice(text.as_bytes()),
        TextEncoding::Ascii => {
            if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
                return Err(format!(
                    "the character '{c}' (U+{:04X}) cannot be represented in the '{encoding}' encoding",
                    c as u32
                ));
            }
            out.extend_from_slice(text.as_bytes());
        }
        TextEncoding::Utf16 | TextEncoding::Utf16Le => {
            if encoding == TextEncoding::Utf16 {
                out.extend_from_slice(&[0xFF, 0xFE]);
            }
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
        TextEncoding::Utf16Be => {
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_be_bytes());
            }
        }
        TextEncoding::Utf32 | TextEncoding::Utf32Le => {
            if encoding == TextEncoding::Utf32 {
                out.extend_from_slice(&[0xFF, 0xFE, 0x00, 0x00]);
            }
            for c in text.chars() {
                out.extend_from_slice(&(c as u32).to_le_bytes());
            }
        }
        TextEncoding::Utf32Be => {
            for c in text.chars() {
                out.extend_from_slice(&(c as u32).to_be_bytes());
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_boms() {
        assert_eq!(detect(b"\xEF\xBB\xBFa").encoding, TextEncoding::Utf8);
        assert_eq!(detect(b"\xEF\xBB\xBFa").bom_len, 3);
        assert_eq!(detect(b"\xFF\xFEa\x00").encoding, TextEncoding::Utf16Le);
        assert_eq!(detect(b"\xFF\xFE\x00\x00a\x00\x00\x00").encoding, TextEncoding::Utf32Le);
        assert_eq!(detect(b"\x00a\x00b").encoding, TextEncoding::Utf16Be);
        assert_eq!(detect(b"plain").bom_len, 0);
    }

    #[test]
    fn test_utf16_output_has_bom() {
        assert_eq!(encode("hi", TextEncoding::Utf16).unwrap(), b"\xFF\xFEh\x00i\x00");
        assert_eq!(encode("hi", TextEncoding::Utf16Be).unwrap(), b"\x00h\x00i");
    }

    #[test]
    fn test_decode_strips_matching_bom() {
        let bytes = encode("\"a\" = \"ä\";", TextEncoding::Utf16).unwrap();
        assert_eq!(decode(&bytes, TextEncoding::Utf16).unwrap(), "\"a\" = \"ä\";");
        assert_eq!(decode(b"\xEF\xBB\xBFx", TextEncoding::Utf8).unwrap(), "x");
    }

    #[test]
    fn test_ascii_names_offender() {
        let err = encode("caf\u{e9}", TextEncoding::Ascii).unwrap_err();
        assert_eq!(err, "the character '\u{e9}' (U+00E9) cannot be represented in the 'ascii' encoding");
    }
}
