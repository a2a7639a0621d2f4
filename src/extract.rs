//! Recovers the argument lists of constructor calls embedded in markup,
//! e.g. `new ViewModel([...], {...}, 'x')` inside a `<script>` block.
//!
//! The scanner never evaluates anything. It tracks string mode (active quote and
//! escape flag) and a depth counter, slices each composite argument out of the
//! document and hands it to `serde_json`.

use serde_json::{Number, Value};

use crate::normalize::{AWAY_ALIASES, HOME_ALIASES};
use crate::{Error, Result};

/// Arguments of one marker occurrence, in call order.
pub type ArgumentList = Vec<Value>;

/// Bytes of document shown on each side of a failure offset.
const CONTEXT_RADIUS: usize = 32;

/// Extracts the argument list following every occurrence of `marker`.
///
/// A marker that does not end in `(` may be followed by whitespace and then `(`;
/// its occurrences followed by anything else (`ViewModelBase`, a bare mention) are
/// skipped. Any malformed call fails the whole document.
pub fn extract(document: &str, marker: &str) -> Result<Vec<ArgumentList>> {
    if marker.is_empty() {
        return Err(Error::NotFound {
            marker: marker.to_string(),
        });
    }

    let expect_open = !marker.ends_with('(');
    let mut lists = Vec::new();
    let mut search_from = 0;
    while let Some(found) = document[search_from..].find(marker) {
        let after = search_from + found + marker.len();
        let mut scanner = Scanner::new(document, after);
        if expect_open && !scanner.open_call() {
            search_from = after;
            continue;
        }
        lists.push(scanner.call_arguments()?);
        search_from = scanner.pos;
    }

    if lists.is_empty() {
        return Err(Error::NotFound {
            marker: marker.to_string(),
        });
    }
    Ok(lists)
}

/// Picks one argument list out of several marker occurrences.
///
/// The first list whose first argument looks like a game (has both sides) wins.
/// Otherwise the longest list wins, earliest first on ties.
pub fn select_arguments(candidates: Vec<ArgumentList>) -> Option<ArgumentList> {
    if let Some(pos) = candidates
        .iter()
        .position(|list| list.first().is_some_and(exposes_sides))
    {
        return candidates.into_iter().nth(pos);
    }

    let mut best: Option<ArgumentList> = None;
    for list in candidates {
        if best.as_ref().map_or(true, |b| list.len() > b.len()) {
            best = Some(list);
        }
    }
    best
}

/// True for an object carrying both a home and an away participant, or an array
/// whose first element does.
pub fn exposes_sides(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            HOME_ALIASES.iter().any(|k| map.contains_key(*k))
                && AWAY_ALIASES.iter().any(|k| map.contains_key(*k))
        }
        Value::Array(items) => items.first().is_some_and(exposes_sides),
        _ => false,
    }
}

#[derive(Clone, Copy)]
enum Mode {
    Code,
    Str { quote: u8, escaped: bool },
}

impl Mode {
    /// Advances the string-mode state over one byte. Returns `true` when the byte
    /// was consumed by string handling (opening quote included).
    fn step(&mut self, c: u8) -> bool {
        match *self {
            Mode::Str { quote, escaped: true } => {
                *self = Mode::Str {
                    quote,
                    escaped: false,
                };
                true
            }
            Mode::Str { quote, .. } if c == b'\\' => {
                *self = Mode::Str {
                    quote,
                    escaped: true,
                };
                true
            }
            Mode::Str { quote, .. } if c == quote => {
                *self = Mode::Code;
                true
            }
            Mode::Str { .. } => true,
            Mode::Code if c == b'"' || c == b'\'' => {
                *self = Mode::Str {
                    quote: c,
                    escaped: false,
                };
                true
            }
            Mode::Code => false,
        }
    }
}

// Every delimiter the scanner reacts to is ASCII, so byte positions it stops on are
// always valid `str` boundaries.
struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos,
        }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Consumes optional whitespace and `(`. Leaves the position alone otherwise.
    fn open_call(&mut self) -> bool {
        let start = self.pos;
        self.skip_ws();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            return true;
        }
        self.pos = start;
        false
    }

    /// Positioned just past the opening `(`.
    fn call_arguments(&mut self) -> Result<ArgumentList> {
        let call_start = self.pos;

        let mut args = Vec::new();
        loop {
            self.skip_ws();
            let arg = match self.peek() {
                None => return Err(self.malformed(call_start, "argument list never closes")),
                // Empty list, or a trailing comma before the close.
                Some(b')') => {
                    self.pos += 1;
                    return Ok(args);
                }
                Some(b'{' | b'[') => self.composite()?,
                Some(_) => self.scalar(),
            };
            args.push(arg);

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b')') => {
                    self.pos += 1;
                    return Ok(args);
                }
                None => return Err(self.malformed(call_start, "argument list never closes")),
                Some(c) => {
                    return Err(self.malformed(
                        self.pos,
                        &format!("unexpected `{}` after argument", c as char),
                    ))
                }
            }
        }
    }

    /// Object or array literal: balanced on its own delimiter, then parsed as JSON.
    fn composite(&mut self) -> Result<Value> {
        let start = self.pos;
        let open = self.bytes[start];
        let close = if open == b'{' { b'}' } else { b']' };

        let mut depth = 0usize;
        let mut mode = Mode::Code;
        while let Some(c) = self.peek() {
            self.pos += 1;
            if mode.step(c) {
                continue;
            }
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    let text = &self.src[start..self.pos];
                    return serde_json::from_str(text).map_err(|e| {
                        self.malformed(start, &format!("embedded literal is not valid JSON: {e}"))
                    });
                }
            }
        }
        Err(self.malformed(start, "brackets never rebalance"))
    }

    /// Anything else, read up to the next top-level `,` or `)`.
    fn scalar(&mut self) -> Value {
        let start = self.pos;
        let mut depth = 0usize;
        let mut mode = Mode::Code;
        while let Some(c) = self.peek() {
            if !mode.step(c) {
                match c {
                    b'(' | b'[' | b'{' => depth += 1,
                    b')' | b']' | b'}' if depth > 0 => depth -= 1,
                    b',' | b')' if depth == 0 => break,
                    _ => {}
                }
            }
            self.pos += 1;
        }
        coerce_scalar(self.src[start..self.pos].trim())
    }

    fn malformed(&self, offset: usize, reason: &str) -> Error {
        Error::MalformedLiteral {
            offset,
            context: snippet(self.src, offset),
            reason: reason.to_string(),
        }
    }
}

fn snippet(src: &str, offset: usize) -> String {
    let mut lo = offset.saturating_sub(CONTEXT_RADIUS).min(src.len());
    while !src.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = offset.saturating_add(CONTEXT_RADIUS).min(src.len());
    while !src.is_char_boundary(hi) {
        hi += 1;
    }
    src[lo..hi].replace(['\n', '\r'], " ")
}

fn coerce_scalar(token: &str) -> Value {
    match token {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if let Some(text) = whole_quoted(token) {
        return Value::String(text);
    }
    if let Ok(n) = token.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = token.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(token.to_string())
}

/// Unescaped contents when `token` is exactly one quoted string.
fn whole_quoted(token: &str) -> Option<String> {
    let quote = match token.as_bytes().first() {
        Some(&q @ (b'"' | b'\'')) => q,
        _ => return None,
    };
    let mut mode = Mode::Code;
    for (i, c) in token.bytes().enumerate() {
        mode.step(c);
        if i > 0 && matches!(mode, Mode::Code) {
            return (i == token.len() - 1).then(|| unescape(&token[1..i], quote as char));
        }
    }
    None
}

fn unescape(inner: &str, quote: char) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let ch = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                out.push(ch);
            }
            Some(other) if other == quote => out.push(other),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
