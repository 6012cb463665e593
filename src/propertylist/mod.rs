//! Property lists in their three on-disk encodings.
//!
//! XML and binary go through the `plist` crate. The OpenStep text form is
//! handled by [`openstep`].

pub mod merge;
pub mod openstep;

use std::io::Cursor;

use plist::Value;
use serde::{Deserialize, Serialize};

use crate::error::PlistError;
use crate::strings::{self, TextEncoding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlistFormat {
    OpenStep,
    Xml,
    Binary,
}

impl PlistFormat {
    /// Accepts both the `plutil` spellings (`xml1`) and the plain ones.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "openstep" | "openstep1" => Some(PlistFormat::OpenStep),
            "xml" | "xml1" => Some(PlistFormat::Xml),
            "binary" | "binary1" => Some(PlistFormat::Binary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlistFormat::OpenStep => "openstep",
            PlistFormat::Xml => "xml",
            PlistFormat::Binary => "binary",
        }
    }

    /// Text forms are told apart after decoding, so UTF-16 and UTF-32 input
    /// is recognized too.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"bplist00") {
            return PlistFormat::Binary;
        }

        match strings::decode(bytes, strings::detect(bytes).encoding) {
            Ok(text) => Self::detect_text(&text),
            Err(_) => PlistFormat::OpenStep,
        }
    }

    fn detect_text(text: &str) -> Self {
        let text = text.trim_start_matches(|c: char| c == '\u{FEFF}' || c.is_whitespace());
        if text.starts_with("<?xml") || text.starts_with("<!DOCTYPE") || text.starts_with("<plist") {
            PlistFormat::Xml
        } else {
            PlistFormat::OpenStep
        }
    }
}

/// A decoded property list and how it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    pub format: PlistFormat,
    /// Text encoding of the XML and OpenStep forms, `None` for binary.
    pub encoding: Option<TextEncoding>,
}

/// Decodes a property list, returning the encoding it was found in.
pub fn read(bytes: &[u8]) -> Result<(Value, PlistFormat), PlistError> {
    let Decoded { value, format, .. } = decode(bytes)?;
    Ok((value, format))
}

/// Like [`read`], but also reports the text encoding of the input.
pub fn decode(bytes: &[u8]) -> Result<Decoded, PlistError> {
    if bytes.starts_with(b"bplist00") {
        let value = Value::from_reader(Cursor::new(bytes))?;
        return Ok(Decoded { value, format: PlistFormat::Binary, encoding: None });
    }

    let encoding = strings::detect(bytes).encoding;
    let text = strings::decode(bytes, encoding).map_err(|e| PlistError::Parse(format!("property list {e}")))?;
    let format = PlistFormat::detect_text(&text);
    let value = match format {
        PlistFormat::OpenStep => openstep::parse(&text)?,
        PlistFormat::Xml | PlistFormat::Binary => Value::from_reader(Cursor::new(text.as_bytes()))?,
    };

    Ok(Decoded { value, format, encoding: Some(encoding) })
}

pub fn write(value: &Value, format: PlistFormat) -> Result<Vec<u8>, PlistError> {
    let mut buffer = Vec::new();
    match format {
        PlistFormat::OpenStep => buffer.extend_from_slice(openstep::write(value)?.as_bytes()),
        PlistFormat::Xml => value
            .to_writer_xml(&mut buffer)
            .map_err(|e| PlistError::Write(e.to_string()))?,
        PlistFormat::Binary => value
            .to_writer_binary(&mut buffer)
            .map_err(|e| PlistError::Write(e.to_string()))?,
    }
    Ok(buffer)
}

/// Lowercase type name used in diagnostics.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "array",
        Value::Dictionary(_) => "dictionary",
        Value::Boolean(_) => "boolean",
        Value::Data(_) => "data",
        Value::Date(_) => "date",
        Value::Real(_) => "real",
        Value::Integer(_) => "integer",
        Value::String(_) => "string",
        Value::Uid(_) => "uid",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use plist::Dictionary;

    use super::*;

    fn sample() -> Value {
        let mut dict = Dictionary::new();
        dict.insert("CFBundleName".into(), Value::String("App".into()));
        dict.insert("Count".into(), Value::Integer(3.into()));
        Value::Dictionary(dict)
    }

    #[test]
    fn test_detect() {
        assert_eq!(PlistFormat::detect(b"bplist00..."), PlistFormat::Binary);
        assert_eq!(PlistFormat::detect(b"\n  <?xml version=\"1.0\"?>"), PlistFormat::Xml);
        assert_eq!(PlistFormat::detect(b"{ a = b; }"), PlistFormat::OpenStep);
    }

    #[test]
    fn test_convert_xml_to_binary() {
        let xml = write(&sample(), PlistFormat::Xml).unwrap();
        let (value, format) = read(&xml).unwrap();
        assert_eq!(format, PlistFormat::Xml);

        let binary = write(&value, PlistFormat::Binary).unwrap();
        assert!(binary.starts_with(b"bplist00"));
        assert_eq!(read(&binary).unwrap().0, sample());
    }

    #[test]
    fn test_utf16_openstep_with_byte_order_mark() {
        let text = "{ CFBundleName = \"Caf\u{e9}\"; Modes = (a, b); }";
        let bytes = strings::encode(text, TextEncoding::Utf16).unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xFE, b'{', 0x00]));
        assert_eq!(PlistFormat::detect(&bytes), PlistFormat::OpenStep);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.format, PlistFormat::OpenStep);
        assert_eq!(decoded.encoding, Some(TextEncoding::Utf16Le));
        let dict = decoded.value.as_dictionary().unwrap();
        assert_eq!(dict.get("CFBundleName").and_then(Value::as_string), Some("Caf\u{e9}"));

        let again = write(&decoded.value, PlistFormat::OpenStep).unwrap();
        assert_eq!(read(&again).unwrap().0, decoded.value);
    }

    #[test]
    fn test_openstep_refuses_integers() {
        assert!(matches!(
            write(&sample(), PlistFormat::OpenStep),
            Err(PlistError::Unrepresentable { kind: "integer" })
        ));
    }
}
