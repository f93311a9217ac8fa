// queryground-core/src/extjson/decode.rs
// Relaxed extended-JSON decoding
//
// Decoding is two-pass: a textual pre-pass rewrites named-call tokens
// (`ObjectId("...")`, `new Date(...)`, bare `undefined`, ...) into their
// keyed-object form, then a single recursive-descent parser handles the
// normalized buffer. Keyed objects are converted to typed values right
// after each object is parsed, so `{"$oid":"..."}` and `ObjectId("...")`
// share one decode path.

use crate::error::{Result, SandboxError};
use crate::extjson::registry::{convert_keyed_object, NAMED_CALLS, NAMED_CONSTS};
use crate::extjson::value::ExtValue;

/// Decode a single extended-JSON value.
///
/// Accepts relaxed syntax: unquoted object keys, single-quoted strings
/// and trailing commas in arrays and objects.
pub fn decode(input: &[u8]) -> Result<ExtValue> {
    let normalized = normalize_named_calls(input)?;
    let mut parser = Parser {
        b: &normalized,
        pos: 0,
    };
    parser.skip_whitespace();
    let value = parser.parse_value()?;
    parser.skip_whitespace();
    if parser.pos != parser.b.len() {
        return Err(parser.error("unexpected trailing characters"));
    }
    Ok(value)
}

// ============================================================================
// PRE-PASS: NAMED-CALL REWRITING
// ============================================================================

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

/// Rewrite every named-call token outside of string literals into its
/// keyed-object form. Unknown identifiers followed by `(` are errors so
/// a typo like `ObjectID(...)` fails loudly instead of decoding to
/// something unexpected.
fn normalize_named_calls(src: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < src.len() {
        let c = src[i];
        if c == b'"' || c == b'\'' {
            let end = skip_string(src, i);
            out.extend_from_slice(&src[i..end]);
            i = end;
        } else if is_ident_start(c) {
            let mut end = i + 1;
            while end < src.len() && is_ident_char(src[end]) {
                end += 1;
            }
            let mut name = String::from_utf8_lossy(&src[i..end]).into_owned();
            let mut after = end;

            // `new Date` is the only two-token literal
            if name == "new" {
                let mut j = end;
                while j < src.len() && src[j].is_ascii_whitespace() {
                    j += 1;
                }
                let mut k = j;
                while k < src.len() && is_ident_char(src[k]) {
                    k += 1;
                }
                if &src[j..k] == b"Date" {
                    name = "new Date".to_string();
                    after = k;
                }
            }

            let mut next = after;
            while next < src.len() && src[next].is_ascii_whitespace() {
                next += 1;
            }

            if next < src.len() && src[next] == b'(' {
                let rewrite = NAMED_CALLS.get(name.as_str()).ok_or_else(|| {
                    SandboxError::Decode(format!("unknown function {}()", name))
                })?;
                let close = find_matching_paren(src, next)
                    .ok_or_else(|| SandboxError::Decode(format!("unbalanced parenthesis in {}()", name)))?;
                let args = split_top_level_args(&src[next + 1..close])?;
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                out.extend_from_slice(rewrite(&arg_refs)?.as_bytes());
                i = close + 1;
            } else if NAMED_CONSTS.contains_key(name.as_str())
                && (next >= src.len() || src[next] != b':')
            {
                out.extend_from_slice(NAMED_CONSTS[name.as_str()].as_bytes());
                i = after;
            } else {
                out.extend_from_slice(&src[i..after]);
                i = after;
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    Ok(out)
}

/// Position just past the closing quote, or end of input if unterminated
fn skip_string(src: &[u8], start: usize) -> usize {
    let quote = src[start];
    let mut i = start + 1;
    while i < src.len() {
        match src[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    src.len()
}

fn find_matching_paren(src: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < src.len() {
        match src[i] {
            b'"' | b'\'' => {
                i = skip_string(src, i);
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split raw argument bytes on commas that sit at nesting depth zero.
/// Nested calls are normalized recursively so an argument is always
/// plain keyed JSON by the time the rewrite rule sees it.
fn split_top_level_args(raw: &[u8]) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;

    while i < raw.len() {
        match raw[i] {
            b'"' | b'\'' => {
                i = skip_string(raw, i);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                args.push(normalize_arg(&raw[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    let last = &raw[start..];
    if !last.iter().all(|c| c.is_ascii_whitespace()) || !args.is_empty() {
        args.push(normalize_arg(last)?);
    }
    Ok(args)
}

fn normalize_arg(raw: &[u8]) -> Result<String> {
    let normalized = normalize_named_calls(raw)?;
    let s = String::from_utf8_lossy(&normalized).trim().to_string();
    Ok(s)
}

// ============================================================================
// RECURSIVE-DESCENT PARSER
// ============================================================================

struct Parser<'a> {
    b: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, msg: &str) -> SandboxError {
        SandboxError::Decode(format!("{} at offset {}", msg, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.b.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn parse_value(&mut self) -> Result<ExtValue> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some(b'{') => self.parse_object(),
            Some(b'[') => self.parse_array(),
            Some(b'"') | Some(b'\'') => Ok(ExtValue::String(self.parse_string()?)),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if is_ident_start(c) => self.parse_keyword(),
            Some(c) => Err(self.error(&format!("unexpected character '{}'", c as char))),
        }
    }

    fn parse_object(&mut self) -> Result<ExtValue> {
        self.expect(b'{')?;
        let mut entries: Vec<(String, ExtValue)> = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(self.error("unterminated object")),
                _ => {}
            }
            let key = self.parse_key()?;
            self.skip_whitespace();
            self.expect(b':')?;
            let value = self.parse_value()?;
            entries.push((key, value));

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => {
                    // trailing commas are fine: the next loop turn
                    // accepts '}' directly
                    self.pos += 1;
                }
                Some(b'}') => {}
                _ => return Err(self.error("expected ',' or '}' in object")),
            }
        }
        convert_keyed_object(entries)
    }

    /// Object keys may be quoted or bare identifiers
    fn parse_key(&mut self) -> Result<String> {
        match self.peek() {
            Some(b'"') | Some(b'\'') => self.parse_string(),
            Some(c) if is_ident_char(c) => {
                let start = self.pos;
                while self.peek().map(is_ident_char).unwrap_or(false) {
                    self.pos += 1;
                }
                Ok(String::from_utf8_lossy(&self.b[start..self.pos]).into_owned())
            }
            _ => Err(self.error("expected object key")),
        }
    }

    fn parse_array(&mut self) -> Result<ExtValue> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(self.error("unterminated array")),
                _ => {}
            }
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b']') => {}
                _ => return Err(self.error("expected ',' or ']' in array")),
            }
        }
        Ok(ExtValue::Array(items))
    }

    fn parse_string(&mut self) -> Result<String> {
        let quote = self.peek().unwrap_or(b'"');
        self.pos += 1;
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(s);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => s.push('"'),
                        Some(b'\'') => s.push('\''),
                        Some(b'\\') => s.push('\\'),
                        Some(b'/') => s.push('/'),
                        Some(b'b') => s.push('\u{0008}'),
                        Some(b'f') => s.push('\u{000C}'),
                        Some(b'n') => s.push('\n'),
                        Some(b'r') => s.push('\r'),
                        Some(b't') => s.push('\t'),
                        Some(b'u') => {
                            self.pos += 1;
                            s.push(self.parse_unicode_escape()?);
                            continue;
                        }
                        _ => return Err(self.error("invalid escape sequence")),
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    // copy one UTF-8 code point
                    let start = self.pos;
                    let len = utf8_len(self.b[start]);
                    let end = (start + len).min(self.b.len());
                    s.push_str(&String::from_utf8_lossy(&self.b[start..end]));
                    self.pos = end;
                }
            }
        }
    }

    /// pos stands right after `\u`; leaves pos after the 4 hex digits
    fn parse_unicode_escape(&mut self) -> Result<char> {
        let code = self.parse_hex4()?;
        // surrogate pair
        if (0xD800..0xDC00).contains(&code) {
            if self.b.get(self.pos) == Some(&b'\\') && self.b.get(self.pos + 1) == Some(&b'u') {
                self.pos += 2;
                let low = self.parse_hex4()?;
                let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                return char::from_u32(combined).ok_or_else(|| self.error("invalid surrogate pair"));
            }
            return Err(self.error("unpaired surrogate in string"));
        }
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn parse_hex4(&mut self) -> Result<u32> {
        if self.pos + 4 > self.b.len() {
            return Err(self.error("truncated unicode escape"));
        }
        let hex = std::str::from_utf8(&self.b[self.pos..self.pos + 4])
            .map_err(|_| self.error("invalid unicode escape"))?;
        let code =
            u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid unicode escape"))?;
        self.pos += 4;
        Ok(code)
    }

    fn parse_number(&mut self) -> Result<ExtValue> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => self.pos += 1,
                b'.' | b'e' | b'E' => {
                    is_float = true;
                    self.pos += 1;
                }
                b'+' | b'-' if is_float => self.pos += 1,
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.b[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        if !is_float {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(ExtValue::Int64(n));
            }
        }
        text.parse::<f64>()
            .map(ExtValue::Double)
            .map_err(|_| self.error(&format!("invalid number \"{}\"", text)))
    }

    fn parse_keyword(&mut self) -> Result<ExtValue> {
        let start = self.pos;
        while self.peek().map(is_ident_char).unwrap_or(false) {
            self.pos += 1;
        }
        match &self.b[start..self.pos] {
            b"true" => Ok(ExtValue::Bool(true)),
            b"false" => Ok(ExtValue::Bool(false)),
            b"null" => Ok(ExtValue::Null),
            other => Err(SandboxError::Decode(format!(
                "unexpected token \"{}\" at offset {}",
                String::from_utf8_lossy(other),
                start
            ))),
        }
    }
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}
