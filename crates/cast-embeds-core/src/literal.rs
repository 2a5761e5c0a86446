//! Safe literal parser for embed payloads.
//!
//! Source rows hold embeds either as strict JSON or as Python-style literals
//! (`[{'url': 'https://...'}]`, `True`, `None`, `b'...'`, tuples, trailing
//! commas). Both grammars are parsed by the same recursive-descent parser into
//! a single [`Literal`] tree. Nothing is ever evaluated; only data literals are
//! accepted.
//!
//! Quotes are handled by the string grammar itself, so a URL containing `'`,
//! `"` or `,` inside a string survives intact.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Maximum nesting of lists, tuples and maps.
const MAX_DEPTH: usize = 64;

/// A parsed data literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Literal>),
    /// Entries in source order. Duplicate keys are kept; lookups take the last.
    Map(Vec<(Literal, Literal)>),
}

/// Failure to parse a literal, with the byte offset where it happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct LiteralError {
    pub offset: usize,
    pub message: String,
}

impl Literal {
    /// Short name of the literal's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Looks up a string key in a map. Keys bound to null count as absent.
    pub fn get(&self, key: &str) -> Option<&Literal> {
        match self {
            Self::Map(entries) => entries
                .iter()
                .rev()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v)
                .filter(|v| !v.is_null()),
            _ => None,
        }
    }

    /// Converts to JSON. Bytes become the `{"type": "Buffer", "data": [...]}`
    /// shape, non-string map keys use their JSON text, non-finite floats
    /// become null.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => int_to_json(*i),
            Self::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Self::Str(s) => Value::String(s.clone()),
            Self::Bytes(bytes) => {
                let mut buffer = Map::new();
                buffer.insert("type".to_string(), Value::String("Buffer".to_string()));
                buffer.insert(
                    "data".to_string(),
                    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
                );
                Value::Object(buffer)
            }
            Self::List(items) => Value::Array(items.iter().map(Literal::to_json).collect()),
            Self::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = match key {
                        Self::Str(s) => s.clone(),
                        other => other.to_json().to_string(),
                    };
                    map.insert(key, value.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

fn int_to_json(i: i128) -> Value {
    if let Ok(v) = i64::try_from(i) {
        Value::from(v)
    } else if let Ok(v) = u64::try_from(i) {
        Value::from(v)
    } else {
        Number::from_f64(i as f64).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<&Value> for Literal {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i128::from(i))
                } else if let Some(u) = n.as_u64() {
                    Self::Int(i128::from(u))
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Literal::from).collect()),
            Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (Self::Str(k.clone()), Literal::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Parses a JSON or Python-style data literal.
pub fn parse(input: &str) -> Result<Literal, LiteralError> {
    let mut parser = Parser { src: input, pos: 0 };
    parser.skip_ws();
    let value = parser.value(0)?;
    parser.skip_ws();
    if parser.pos < parser.src.len() {
        return Err(parser.error("unexpected trailing characters"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

/// Either text or bytes accumulated from a (possibly concatenated) string literal.
enum StrBuf {
    Text(String),
    Bytes(Vec<u8>),
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), LiteralError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn value(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        if depth > MAX_DEPTH {
            return Err(self.error("literal nested too deeply"));
        }
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('[') => {
                self.bump();
                self.sequence(']', depth).map(|(items, _)| Literal::List(items))
            }
            Some('(') => {
                self.bump();
                let (mut items, trailing_comma) = self.sequence(')', depth)?;
                // `(x)` is just a parenthesized value, `(x,)` is a tuple.
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Literal::List(items))
                }
            }
            Some('{') => {
                self.bump();
                self.map(depth)
            }
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() || c == '.' => self.number(),
            Some(_) if self.string_prefix_len().is_some() => self.string_literal(),
            Some(c) if c.is_alphabetic() || c == '_' => self.keyword(),
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
        }
    }

    /// Parses comma-separated values up to `close`. Returns whether the last
    /// element was followed by a comma.
    fn sequence(&mut self, close: char, depth: usize) -> Result<(Vec<Literal>, bool), LiteralError> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            if self.eat(',') {
                trailing_comma = true;
                continue;
            }
            trailing_comma = false;
            self.skip_ws();
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            return Err(self.error(format!("expected ',' or '{close}'")));
        }
    }

    fn map(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Ok(Literal::Map(entries));
            }
            let key = self.value(depth + 1)?;
            if matches!(key, Literal::List(_) | Literal::Map(_)) {
                return Err(self.error("map keys must be scalar"));
            }
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.value(depth + 1)?;
            entries.push((key, value));
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.skip_ws();
            self.expect('}')?;
            return Ok(Literal::Map(entries));
        }
    }

    fn keyword(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        match &self.src[start..self.pos] {
            "None" | "null" => Ok(Literal::Null),
            "True" | "true" => Ok(Literal::Bool(true)),
            "False" | "false" => Ok(Literal::Bool(false)),
            other => {
                self.pos = start;
                Err(self.error(format!("unsupported identifier '{other}'")))
            }
        }
    }

    fn number(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {
                    self.bump();
                }
                '.' => {
                    is_float = true;
                    self.bump();
                }
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let text: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        let parsed = if is_float {
            text.parse::<f64>().ok().map(Literal::Float)
        } else {
            text.parse::<i128>().ok().map(Literal::Int)
        };
        parsed.ok_or_else(|| LiteralError {
            offset: start,
            message: format!("invalid number '{text}'"),
        })
    }

    /// Length of a string prefix (`r`, `u`, `b`, `rb`, `br`, ...) followed by a
    /// quote at the current position, or `None` if no string starts here.
    fn string_prefix_len(&self) -> Option<usize> {
        let mut len = 0;
        while len < 2 {
            match self.peek_nth(len) {
                Some('r' | 'R' | 'b' | 'B' | 'u' | 'U') => len += 1,
                Some('\'' | '"') => return Some(len),
                _ => return None,
            }
        }
        matches!(self.peek_nth(len), Some('\'' | '"')).then_some(len)
    }

    /// Parses one string literal plus any adjacent literals it concatenates with.
    fn string_literal(&mut self) -> Result<Literal, LiteralError> {
        let mut buf = self.single_string()?;
        loop {
            let checkpoint = self.pos;
            self.skip_ws();
            if self.string_prefix_len().is_none() {
                self.pos = checkpoint;
                break;
            }
            let next_start = self.pos;
            match (buf, self.single_string()?) {
                (StrBuf::Text(mut a), StrBuf::Text(b)) => {
                    a.push_str(&b);
                    buf = StrBuf::Text(a);
                }
                (StrBuf::Bytes(mut a), StrBuf::Bytes(b)) => {
                    a.extend_from_slice(&b);
                    buf = StrBuf::Bytes(a);
                }
                _ => {
                    return Err(LiteralError {
                        offset: next_start,
                        message: "cannot mix bytes and text literals".to_string(),
                    })
                }
            }
        }
        Ok(match buf {
            StrBuf::Text(s) => Literal::Str(s),
            StrBuf::Bytes(b) => Literal::Bytes(b),
        })
    }

    fn single_string(&mut self) -> Result<StrBuf, LiteralError> {
        let start = self.pos;
        let prefix_len = self.string_prefix_len().ok_or_else(|| self.error("expected string"))?;
        let prefix: String = self.rest().chars().take(prefix_len).collect::<String>().to_ascii_lowercase();
        for _ in 0..prefix_len {
            self.bump();
        }
        let raw = prefix.contains('r');
        let is_bytes = prefix.contains('b');
        if prefix.contains('u') && (raw || is_bytes) {
            return Err(LiteralError {
                offset: start,
                message: format!("invalid string prefix '{prefix}'"),
            });
        }

        let quote = self.bump().ok_or_else(|| self.error("expected quote"))?;
        let triple = self.peek() == Some(quote) && self.peek_nth(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut text = String::new();
        let mut bytes = Vec::new();
        loop {
            let c = self.bump().ok_or_else(|| LiteralError {
                offset: start,
                message: "unterminated string".to_string(),
            })?;
            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_nth(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
            } else if c == '\n' && !triple {
                return Err(LiteralError {
                    offset: start,
                    message: "unterminated string".to_string(),
                });
            }
            if c == quote {
                push_char(&mut text, &mut bytes, is_bytes, c, self.pos)?;
                continue;
            }
            if c == '\\' && !raw {
                self.escape(&mut text, &mut bytes, is_bytes)?;
                continue;
            }
            if c == '\\' && raw {
                // Raw strings keep the backslash but it still protects a quote.
                push_char(&mut text, &mut bytes, is_bytes, c, self.pos)?;
                if let Some(next) = self.peek() {
                    if next == quote || next == '\\' {
                        self.bump();
                        push_char(&mut text, &mut bytes, is_bytes, next, self.pos)?;
                    }
                }
                continue;
            }
            push_char(&mut text, &mut bytes, is_bytes, c, self.pos)?;
        }

        Ok(if is_bytes {
            StrBuf::Bytes(bytes)
        } else {
            StrBuf::Text(text)
        })
    }

    fn escape(&mut self, text: &mut String, bytes: &mut Vec<u8>, is_bytes: bool) -> Result<(), LiteralError> {
        let offset = self.pos;
        let c = self.bump().ok_or_else(|| self.error("unterminated escape"))?;
        let simple = match c {
            '\\' => Some('\\'),
            '\'' => Some('\''),
            '"' => Some('"'),
            '/' => Some('/'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'b' => Some('\u{08}'),
            'f' => Some('\u{0c}'),
            'v' => Some('\u{0b}'),
            'a' => Some('\u{07}'),
            '\n' => return Ok(()),
            _ => None,
        };
        if let Some(ch) = simple {
            return push_char(text, bytes, is_bytes, ch, offset);
        }
        match c {
            'x' => {
                let value = self.hex_digits(2)?;
                if is_bytes {
                    bytes.push(value as u8);
                } else {
                    text.push(char::from_u32(value).unwrap_or('\u{fffd}'));
                }
                Ok(())
            }
            '0'..='7' => {
                let mut value = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            self.bump();
                            value = value * 8 + d;
                        }
                        None => break,
                    }
                }
                if is_bytes {
                    bytes.push((value & 0xff) as u8);
                } else {
                    text.push(char::from_u32(value).unwrap_or('\u{fffd}'));
                }
                Ok(())
            }
            'u' | 'U' if !is_bytes => {
                let digits = if c == 'u' { 4 } else { 8 };
                let mut code = self.hex_digits(digits)?;
                if (0xD800..0xDC00).contains(&code) && self.rest().starts_with("\\u") {
                    let checkpoint = self.pos;
                    self.pos += 2;
                    let low = self.hex_digits(4)?;
                    if (0xDC00..0xE000).contains(&low) {
                        code = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                    } else {
                        self.pos = checkpoint;
                    }
                }
                text.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                Ok(())
            }
            other => {
                // Unknown escapes keep their backslash, as in Python.
                push_char(text, bytes, is_bytes, '\\', offset)?;
                push_char(text, bytes, is_bytes, other, offset)
            }
        }
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32, LiteralError> {
        let mut value = 0u32;
        for _ in 0..count {
            let digit = self
                .peek()
                .and_then(|d| d.to_digit(16))
                .ok_or_else(|| self.error("invalid hex escape"))?;
            self.bump();
            value = value * 16 + digit;
        }
        Ok(value)
    }
}

fn push_char(text: &mut String, bytes: &mut Vec<u8>, is_bytes: bool, c: char, offset: usize) -> Result<(), LiteralError> {
    if is_bytes {
        if !c.is_ascii() {
            return Err(LiteralError {
                offset,
                message: "bytes literals may only contain ASCII characters".to_string(),
            });
        }
        bytes.push(c as u8);
    } else {
        text.push(c);
    }
    Ok(())
}
