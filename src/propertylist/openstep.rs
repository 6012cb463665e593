//! The old-style ASCII property list syntax, which is also what `.strings`
//! tables are written in.
//!
//! Only strings, data, arrays and dictionaries exist in this format. Numbers
//! and booleans read back as strings.

use plist::{Dictionary, Value};

use crate::error::PlistError;

pub fn parse(text: &str) -> Result<Value, PlistError> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
        line: 1,
    };

    parser.skip_trivia()?;
    if parser.peek().is_none() {
        return Ok(Value::Dictionary(Dictionary::new()));
    }

    // A `.strings` table is a dictionary body without the braces.
    if parser.looks_like_strings_table()? {
        let dict = parser.dictionary_body(None)?;
        return Ok(Value::Dictionary(dict));
    }

    let value = parser.value()?;
    parser.skip_trivia()?;
    if let Some(c) = parser.peek() {
        return Err(parser.error(format!("unexpected character '{c}' after the root object")));
    }

    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: u32,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl AsRef<str>) -> PlistError {
        PlistError::Parse(format!("line {}: {}", self.line, message.as_ref()))
    }

    fn expect(&mut self, expected: char) -> Result<(), PlistError> {
        self.skip_trivia()?;
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{expected}' but found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}' but found end of input"))),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), PlistError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() || c == '\u{feff}' => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn looks_like_strings_table(&mut self) -> Result<bool, PlistError> {
        if !matches!(self.peek(), Some(c) if c == '"' || is_unquoted(c)) {
            return Ok(false);
        }

        let (pos, line) = (self.pos, self.line);
        self.string()?;
        self.skip_trivia()?;
        let next = self.peek();
        self.pos = pos;
        self.line = line;

        Ok(matches!(next, Some('=') | Some(';')))
    }

    fn value(&mut self) -> Result<Value, PlistError> {
        self.skip_trivia()?;
        match self.peek() {
            Some('{') => {
                self.bump();
                Ok(Value::Dictionary(self.dictionary_body(Some('}'))?))
            }
            Some('(') => {
                self.bump();
                self.array()
            }
            Some('<') => {
                self.bump();
                self.data()
            }
            Some(c) if c == '"' || c == '\'' || is_unquoted(c) => Ok(Value::String(self.string()?)),
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn dictionary_body(&mut self, close: Option<char>) -> Result<Dictionary, PlistError> {
        let mut dict = Dictionary::new();

        loop {
            self.skip_trivia()?;
            match (self.peek(), close) {
                (Some(c), Some(close)) if c == close => {
                    self.bump();
                    return Ok(dict);
                }
                (None, None) => return Ok(dict),
                (None, Some(close)) => {
                    return Err(self.error(format!("missing '{close}' at end of dictionary")));
                }
                _ => {}
            }

            let key = self.string()?;
            self.skip_trivia()?;

            // `"key";` in a strings table means the key maps to itself.
            if close.is_none() && self.peek() == Some(';') {
                self.bump();
                dict.insert(key.clone(), Value::String(key));
                continue;
            }

            self.expect('=')?;
            let value = self.value()?;
            self.expect(';')?;
            dict.insert(key, value);
        }
    }

    fn array(&mut self) -> Result<Value, PlistError> {
        let mut items = Vec::new();

        loop {
            self.skip_trivia()?;
            if self.peek() == Some(')') {
                self.bump();
                return Ok(Value::Array(items));
            }

            items.push(self.value()?);
            self.skip_trivia()?;
            match self.bump() {
                Some(',') => {}
                Some(')') => return Ok(Value::Array(items)),
                Some(c) => return Err(self.error(format!("expected ',' or ')' in array but found '{c}'"))),
                None => return Err(self.error("missing ')' at end of array")),
            }
        }
    }

    fn data(&mut self) -> Result<Value, PlistError> {
        let mut digits = Vec::new();

        loop {
            match self.bump() {
                Some('>') => break,
                Some(c) if c.is_whitespace() => {}
                Some(c) => match c.to_digit(16) {
                    Some(d) => digits.push(d as u8),
                    None => return Err(self.error(format!("invalid character '{c}' in data"))),
                },
                None => return Err(self.error("missing '>' at end of data")),
            }
        }

        if digits.len() % 2 != 0 {
            return Err(self.error("data has an odd number of hex digits"));
        }

        Ok(Value::Data(digits.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect()))
    }

    fn string(&mut self) -> Result<String, PlistError> {
        self.skip_trivia()?;
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                self.quoted(quote)
            }
            Some(c) if is_unquoted(c) => {
                let mut out = String::new();
                while let Some(c) = self.peek() {
                    if !is_unquoted(c) {
                        break;
                    }
                    out.push(c);
                    self.bump();
                }
                Ok(out)
            }
            Some(c) => Err(self.error(format!("expected a string but found '{c}'"))),
            None => Err(self.error("expected a string but found end of input")),
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String, PlistError> {
        let mut out = String::new();

        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = self.bump().ok_or_else(|| self.error("unterminated escape sequence"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'a' => out.push('\u{7}'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'v' => out.push('\u{b}'),
                        'U' | 'u' => {
                            let mut code = 0u32;
                            for _ in 0..4 {
                                let digit = self
                                    .bump()
                                    .and_then(|c| c.to_digit(16))
                                    .ok_or_else(|| self.error("invalid \\U escape"))?;
                                code = code << 4 | digit;
                            }
                            out.push(char::from_u32(code).ok_or_else(|| self.error("invalid \\U escape"))?);
                        }
                        c @ '0'..='7' => {
                            let mut code = c.to_digit(8).unwrap_or_default();
                            for _ in 0..2 {
                                match self.peek().and_then(|c| c.to_digit(8)) {
                                    Some(digit) => {
                                        code = code << 3 | digit;
                                        self.bump();
                                    }
                                    None => break,
                                }
                            }
                            out.push(char::from_u32(code).ok_or_else(|| self.error("invalid octal escape"))?);
                        }
                        other => out.push(other),
                    }
                }
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated quoted string")),
            }
        }
    }
}

fn is_unquoted(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '+' | '/' | ':' | '.' | '-')
}

/// Renders a value in OpenStep syntax.
pub fn write(value: &Value) -> Result<String, PlistError> {
    let mut out = String::new();
    write_value(value, 0, &mut out)?;
    out.push('\n');
    Ok(out)
}

fn write_value(value: &Value, depth: usize, out: &mut String) -> Result<(), PlistError> {
    match value {
        Value::String(s) => write_string(s, out),
        Value::Data(bytes) => {
            out.push('<');
            for (i, byte) in bytes.iter().enumerate() {
                if i > 0 && i % 4 == 0 {
                    out.push(' ');
                }
                out.push_str(&format!("{byte:02x}"));
            }
            out.push('>');
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push_str("()");
                return Ok(());
            }
            out.push_str("(\n");
            for (i, item) in items.iter().enumerate() {
                indent(depth + 1, out);
                write_value(item, depth + 1, out)?;
                if i + 1 < items.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            indent(depth, out);
            out.push(')');
        }
        Value::Dictionary(dict) => {
            if dict.is_empty() {
                out.push_str("{}");
                return Ok(());
            }
            out.push_str("{\n");
            for (key, item) in dict.iter() {
                indent(depth + 1, out);
                write_string(key, out);
                out.push_str(" = ");
                write_value(item, depth + 1, out)?;
                out.push_str(";\n");
            }
            indent(depth, out);
            out.push('}');
        }
        other => {
            return Err(PlistError::Unrepresentable {
                kind: super::type_name(other),
            });
        }
    }

    Ok(())
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

fn write_string(s: &str, out: &mut String) {
    if !s.is_empty() && s.chars().all(is_unquoted) {
        out.push_str(s);
        return;
    }

    out.push('"');
    out.push_str(&escape(s));
    out.push('"');
}

pub(crate) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}
