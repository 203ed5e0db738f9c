//! Minimal PDF object model and lexer. Scoped to what the container reader
//! and content-stream parser need (spec SPEC_FULL §4.12) — no writer side,
//! no forms, no signatures.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    String(Vec<u8>),
    Name(String),
    Array(Vec<Object>),
    Dictionary(HashMap<String, Object>),
    Reference(u32, u16),
    Stream(HashMap<String, Object>, Vec<u8>),
}

impl Object {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(n) => Some(n.as_str()),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&HashMap<String, Object>> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream(d, _) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<(u32, u16)> {
        match self {
            Object::Reference(n, g) => Some((*n, *g)),
            _ => None,
        }
    }
}

/// Tokenizes the textual PDF object syntax shared by the xref/trailer/object
/// parser and the content-stream parser (numbers, names, strings, arrays,
/// dictionaries, and bare keyword/operator tokens).
pub struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lexeme {
    Integer(i64),
    Real(f64),
    Name(String),
    LiteralString(Vec<u8>),
    HexString(Vec<u8>),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    Keyword(String),
    Eof,
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Lexer { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn is_whitespace(b: u8) -> bool {
        matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0c | 0x00)
    }

    fn is_delimiter(b: u8) -> bool {
        matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
        )
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b) if Self::is_whitespace(b) => self.pos += 1,
                Some(b'%') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' || b == b'\r' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_lexeme(&mut self) -> Lexeme {
        self.skip_whitespace_and_comments();
        let Some(b) = self.peek() else {
            return Lexeme::Eof;
        };
        match b {
            b'/' => {
                self.pos += 1;
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if Self::is_whitespace(b) || Self::is_delimiter(b) {
                        break;
                    }
                    self.pos += 1;
                }
                Lexeme::Name(String::from_utf8_lossy(&self.data[start..self.pos]).into_owned())
            }
            b'[' => {
                self.pos += 1;
                Lexeme::ArrayStart
            }
            b']' => {
                self.pos += 1;
                Lexeme::ArrayEnd
            }
            b'<' => {
                if self.data.get(self.pos + 1) == Some(&b'<') {
                    self.pos += 2;
                    Lexeme::DictStart
                } else {
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().is_some_and(|b| b != b'>') {
                        self.pos += 1;
                    }
                    let hex = &self.data[start..self.pos];
                    self.pos += 1;
                    Lexeme::HexString(decode_hex_string(hex))
                }
            }
            b'>' => {
                if self.data.get(self.pos + 1) == Some(&b'>') {
                    self.pos += 2;
                    Lexeme::DictEnd
                } else {
                    self.pos += 1;
                    self.next_lexeme()
                }
            }
            b'(' => {
                self.pos += 1;
                let mut depth = 1;
                let mut out = Vec::new();
                while let Some(b) = self.peek() {
                    self.pos += 1;
                    match b {
                        b'(' => {
                            depth += 1;
                            out.push(b);
                        }
                        b')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            out.push(b);
                        }
                        b'\\' => {
                            if let Some(n) = self.peek() {
                                self.pos += 1;
                                out.push(unescape(n));
                            }
                        }
                        _ => out.push(b),
                    }
                }
                Lexeme::LiteralString(out)
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => {
                let start = self.pos;
                self.pos += 1;
                let mut is_real = b == b'.';
                while let Some(b) = self.peek() {
                    if b.is_ascii_digit() {
                        self.pos += 1;
                    } else if b == b'.' {
                        is_real = true;
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let s = std::str::from_utf8(&self.data[start..self.pos]).unwrap_or("0");
                if is_real {
                    Lexeme::Real(s.parse().unwrap_or(0.0))
                } else {
                    Lexeme::Integer(s.parse().unwrap_or(0))
                }
            }
            _ => {
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if Self::is_whitespace(b) || Self::is_delimiter(b) {
                        break;
                    }
                    self.pos += 1;
                }
                if start == self.pos {
                    self.pos += 1;
                }
                Lexeme::Keyword(String::from_utf8_lossy(&self.data[start..self.pos]).into_owned())
            }
        }
    }

    /// Parses one object value, resolving `N G R` reference triples and
    /// `<< ... >> stream ... endstream` constructs.
    pub fn parse_object(&mut self) -> Option<Object> {
        let checkpoint = self.pos;
        let lex = self.next_lexeme();
        self.parse_from(lex, checkpoint)
    }

    fn parse_from(&mut self, lex: Lexeme, checkpoint: usize) -> Option<Object> {
        match lex {
            Lexeme::Eof => None,
            Lexeme::Integer(n) => {
                // Look ahead for "G R" reference form.
                let save = self.pos;
                if let Lexeme::Integer(g) = self.next_lexeme() {
                    let save2 = self.pos;
                    if let Lexeme::Keyword(k) = self.next_lexeme() {
                        if k == "R" {
                            return Some(Object::Reference(n as u32, g as u16));
                        }
                    }
                    self.pos = save2;
                }
                self.pos = save;
                Some(Object::Integer(n))
            }
            Lexeme::Real(r) => Some(Object::Real(r)),
            Lexeme::Name(n) => Some(Object::Name(n)),
            Lexeme::LiteralString(s) | Lexeme::HexString(s) => Some(Object::String(s)),
            Lexeme::ArrayStart => {
                let mut items = Vec::new();
                loop {
                    let cp = self.pos;
                    let next = self.next_lexeme();
                    if next == Lexeme::ArrayEnd || next == Lexeme::Eof {
                        break;
                    }
                    if let Some(obj) = self.parse_from(next, cp) {
                        items.push(obj);
                    } else {
                        break;
                    }
                }
                Some(Object::Array(items))
            }
            Lexeme::DictStart => {
                let mut map = HashMap::new();
                loop {
                    match self.next_lexeme() {
                        Lexeme::DictEnd | Lexeme::Eof => break,
                        Lexeme::Name(key) => {
                            if let Some(val) = self.parse_object() {
                                map.insert(key, val);
                            }
                        }
                        _ => continue,
                    }
                }
                self.maybe_stream(map)
            }
            Lexeme::Keyword(k) => match k.as_str() {
                "true" => Some(Object::Bool(true)),
                "false" => Some(Object::Bool(false)),
                "null" => Some(Object::Null),
                _ => {
                    self.pos = checkpoint;
                    None
                }
            },
            _ => None,
        }
    }

    fn maybe_stream(&mut self, dict: HashMap<String, Object>) -> Option<Object> {
        let save = self.pos;
        self.skip_whitespace_and_comments();
        if self.data[self.pos..].starts_with(b"stream") {
            self.pos += "stream".len();
            if self.peek() == Some(b'\r') {
                self.pos += 1;
            }
            if self.peek() == Some(b'\n') {
                self.pos += 1;
            }
            let len = dict
                .get("Length")
                .and_then(Object::as_f64)
                .map(|f| f as usize)
                .unwrap_or(0);
            let start = self.pos;
            let end = (start + len).min(self.data.len());
            let body = self.data[start..end].to_vec();
            self.pos = end;
            self.skip_whitespace_and_comments();
            if self.data[self.pos..].starts_with(b"endstream") {
                self.pos += "endstream".len();
            }
            return Some(Object::Stream(dict, body));
        }
        self.pos = save;
        Some(Object::Dictionary(dict))
    }
}

fn unescape(b: u8) -> u8 {
    match b {
        b'n' => b'\n',
        b'r' => b'\r',
        b't' => b'\t',
        b'b' => 0x08,
        b'f' => 0x0c,
        other => other,
    }
}

fn decode_hex_string(hex: &[u8]) -> Vec<u8> {
    let digits: Vec<u8> = hex.iter().copied().filter(|b| b.is_ascii_hexdigit()).collect();
    digits
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16).unwrap_or(0) as u8;
            let lo = pair
                .get(1)
                .and_then(|b| (*b as char).to_digit(16))
                .unwrap_or(0) as u8;
            (hi << 4) | lo
        })
        .collect()
}
