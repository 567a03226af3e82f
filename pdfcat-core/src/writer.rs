//! Output-side token emission and xref/trailer writing.
//!
//! The emitter never materializes an object tree: it writes whatever
//! [`Token`](crate::token::Token) stream the copier produces, tracking
//! enough state (current column, whether the previous token already acts
//! as a delimiter) to keep the output readable without ever merging two
//! adjacent tokens into one.

use std::collections::HashMap;
use std::io::Write;

use crate::error::Result;
use crate::token::Token;

/// Cosmetic line-wrap width; PDF itself is insensitive to line length.
const MAX_LINE: usize = 78;

/// Streams tokens to a `Write` sink, tracking byte offset and column.
pub struct TokenEmitter<W: Write> {
    writer: W,
    offset: u64,
    column: usize,
    /// Whether the last byte written could merge with a following
    /// "regular" (non-delimiter) character if nothing separates them.
    prev_right_risky: bool,
    at_start: bool,
    xref: HashMap<u32, u64>,
}

/// Whether a token begins (`left`) or ends (`right`) with PDF-delimiter
/// bytes. Only tokens that are risky on both sides of a boundary need a
/// separating space or newline between them.
fn edges(token: &Token) -> (bool, bool) {
    match token {
        Token::ArrayOpen | Token::ArrayClose | Token::DictOpen | Token::DictClose | Token::Str(_) => {
            (false, false)
        }
        Token::Name(_) => (false, true),
        Token::Number { .. } | Token::Ref | Token::Bool(_) | Token::Null | Token::Keyword(_) => {
            (true, true)
        }
        Token::Eof => (false, false),
    }
}

impl<W: Write> TokenEmitter<W> {
    pub fn new(writer: W) -> Self {
        TokenEmitter {
            writer,
            offset: 0,
            column: 0,
            prev_right_risky: false,
            at_start: true,
            xref: HashMap::new(),
        }
    }

    /// Begin an indirect object: records its offset for the final xref
    /// table and writes the `N 0 obj` header. All output objects are
    /// written at generation 0.
    pub fn begin_object(&mut self, target_num: u32) -> Result<()> {
        self.newline()?;
        self.xref.insert(target_num, self.offset);
        self.write_raw(format!("{target_num} 0 obj\n").as_bytes())?;
        self.column = 0;
        self.at_start = true;
        Ok(())
    }

    pub fn end_object(&mut self) -> Result<()> {
        self.newline()?;
        self.write_raw(b"endobj\n")?;
        self.column = 0;
        self.at_start = true;
        Ok(())
    }

    pub fn xref_offsets(&self) -> &HashMap<u32, u64> {
        &self.xref
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        self.column += bytes.len();
        Ok(())
    }

    /// Force a line break if the current line has any content.
    pub fn newline(&mut self) -> Result<()> {
        if self.column > 0 {
            self.writer.write_all(b"\n")?;
            self.offset += 1;
            self.column = 0;
        }
        self.at_start = true;
        Ok(())
    }

    fn separate(&mut self, this_left_risky: bool) -> Result<()> {
        if self.at_start || !(self.prev_right_risky && this_left_risky) {
            return Ok(());
        }
        if self.column + 1 >= MAX_LINE {
            self.writer.write_all(b"\n")?;
            self.offset += 1;
            self.column = 0;
        } else {
            self.writer.write_all(b" ")?;
            self.offset += 1;
            self.column += 1;
        }
        Ok(())
    }

    /// Emit one token, inserting separators as needed so that no two
    /// word-like tokens (numbers, names, keywords, `R`, booleans, `null`)
    /// ever abut without a delimiter between them.
    pub fn emit(&mut self, token: &Token) -> Result<()> {
        let (left_risky, right_risky) = edges(token);
        self.separate(left_risky)?;
        match token {
            Token::ArrayOpen => self.write_raw(b"[")?,
            Token::ArrayClose => self.write_raw(b"]")?,
            Token::DictOpen => self.write_raw(b"<<")?,
            Token::DictClose => self.write_raw(b">>")?,
            Token::Number { text, .. } => self.write_raw(text.as_bytes())?,
            Token::Name(name) => {
                self.write_raw(b"/")?;
                self.write_raw(name.as_bytes())?;
            }
            Token::Str(bytes) => self.write_raw(&encode_string(bytes))?,
            Token::Ref => self.write_raw(b"R")?,
            Token::Bool(true) => self.write_raw(b"true")?,
            Token::Bool(false) => self.write_raw(b"false")?,
            Token::Null => self.write_raw(b"null")?,
            Token::Keyword(kw) => self.write_raw(kw.as_bytes())?,
            Token::Eof => return Ok(()),
        };
        self.prev_right_risky = right_risky;
        self.at_start = false;
        Ok(())
    }

    /// Emit a renumbered indirect reference as three tokens.
    pub fn emit_reference(&mut self, target_num: u32) -> Result<()> {
        self.emit(&Token::Number { text: target_num.to_string(), int_value: Some(target_num as i64) })?;
        self.emit(&Token::Number { text: "0".into(), int_value: Some(0) })?;
        self.emit(&Token::Ref)
    }

    /// Copy `len` raw bytes straight from `src` to the output, bracketed
    /// by the newlines the `stream`/`endstream` keywords require. Streams
    /// are passed through opaquely; pdfcat never interprets their content.
    pub fn copy_stream_bytes<R: std::io::Read>(&mut self, src: &mut R, len: u64) -> Result<()> {
        self.newline()?;
        let mut buf = [0u8; 32 * 1024];
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            src.read_exact(&mut buf[..chunk])?;
            self.writer.write_all(&buf[..chunk])?;
            self.offset += chunk as u64;
            remaining -= chunk as u64;
        }
        self.column = 0;
        self.at_start = true;
        Ok(())
    }
}

/// Write the file header: version line, plus a four-byte binary-marker
/// comment when `binary_marker` is set (mirroring whatever the first
/// input declared).
pub fn write_header<W: Write>(
    emitter: &mut TokenEmitter<W>,
    version: &str,
    binary_marker: bool,
) -> Result<()> {
    emitter.write_raw(format!("%PDF-{version}\n").as_bytes())?;
    if binary_marker {
        emitter.write_raw(b"%\xe2\xe3\xcf\xd3\n")?;
    }
    emitter.column = 0;
    emitter.at_start = true;
    Ok(())
}

/// Write the merged xref table followed by `trailer`, the already-encoded
/// trailer dictionary bytes (captured by the pull-trailer dance so its
/// references are renumbered exactly like any other object), `startxref`,
/// and `%%EOF`.
pub fn write_xref_and_trailer<W: Write>(
    emitter: &mut TokenEmitter<W>,
    offsets: &std::collections::HashMap<u32, u64>,
    size: u32,
    trailer_bytes: &[u8],
) -> Result<()> {
    emitter.newline()?;
    let xref_offset = emitter.offset();
    emitter.write_raw(b"xref\n")?;
    emitter.write_raw(format!("0 {size}\n").as_bytes())?;
    emitter.write_raw(b"0000000000 65535 f \n")?;
    for num in 1..size {
        if let Some(&off) = offsets.get(&num) {
            emitter.write_raw(format!("{off:010} 00000 n \n").as_bytes())?;
        } else {
            emitter.write_raw(b"0000000000 00000 f \n")?;
        }
    }
    emitter.write_raw(b"trailer\n")?;
    emitter.write_raw(trailer_bytes)?;
    emitter.write_raw(format!("\nstartxref\n{xref_offset}\n%%EOF\n").as_bytes())?;
    Ok(())
}

/// Choose the shorter of the literal or hex encoding for a decoded string,
/// including its delimiters.
fn encode_string(bytes: &[u8]) -> Vec<u8> {
    let literal = encode_literal(bytes);
    let hex_len = bytes.len() * 2 + 2;
    if hex_len < literal.len() {
        encode_hex(bytes)
    } else {
        literal
    }
}

fn encode_hex(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2 + 2);
    out.push(b'<');
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize]);
        out.push(HEX[(b & 0xf) as usize]);
    }
    out.push(b'>');
    out
}

/// Encode as a literal `(...)` string, escaping only the parentheses that
/// would otherwise unbalance it and any backslash. Which parens need
/// escaping is decided in a single forward pass with a small depth stack,
/// rather than rescanning the string once per candidate paren.
fn encode_literal(bytes: &[u8]) -> Vec<u8> {
    let mut escape = vec![false; bytes.len()];
    let mut open_stack: Vec<usize> = Vec::new();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => open_stack.push(i),
            b')' => {
                if open_stack.pop().is_none() {
                    escape[i] = true;
                }
            }
            _ => {}
        }
    }
    for i in open_stack {
        escape[i] = true;
    }

    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'(');
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\\' => {
                out.push(b'\\');
                out.push(b'\\');
            }
            b'(' | b')' if escape[i] => {
                out.push(b'\\');
                out.push(b);
            }
            _ => out.push(b),
        }
    }
    out.push(b')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn emit_all(tokens: &[Token]) -> Vec<u8> {
        let mut emitter = TokenEmitter::new(Vec::new());
        for t in tokens {
            emitter.emit(t).unwrap();
        }
        emitter.into_inner()
    }

    #[test]
    fn numbers_get_separating_space() {
        let out = emit_all(&[
            Token::Number { text: "1".into(), int_value: Some(1) },
            Token::Number { text: "2".into(), int_value: Some(2) },
        ]);
        assert_eq!(out, b"1 2");
    }

    #[test]
    fn brackets_need_no_separator() {
        let out = emit_all(&[Token::ArrayOpen, Token::Number { text: "1".into(), int_value: Some(1) }, Token::ArrayClose]);
        assert_eq!(out, b"[1]");
    }

    #[test]
    fn reference_triplet_emits_with_spaces() {
        let mut emitter = TokenEmitter::new(Vec::new());
        emitter.emit_reference(5).unwrap();
        assert_eq!(emitter.into_inner(), b"5 0 R");
    }

    #[test]
    fn balanced_parens_not_escaped() {
        let encoded = encode_literal(b"a(b)c");
        assert_eq!(encoded, b"(a(b)c)");
    }

    #[test]
    fn unbalanced_close_paren_escaped() {
        let encoded = encode_literal(b"a)b");
        assert_eq!(encoded, b"(a\\)b)");
    }

    #[test]
    fn unmatched_open_paren_escaped() {
        let encoded = encode_literal(b"a(b");
        assert_eq!(encoded, b"(a\\(b)");
    }

    #[test]
    fn short_binary_string_prefers_hex() {
        let bytes = vec![0x00, 0x01, 0x02];
        let encoded = encode_string(&bytes);
        // literal would need to keep raw bytes (len 3 + 2 = 5), hex is 3*2+2=8;
        // literal is shorter here so it should win.
        assert_eq!(encoded, b"(\x00\x01\x02)");
    }

    #[test]
    fn many_parens_prefer_hex() {
        let bytes = b"(((((".to_vec();
        let encoded = encode_string(&bytes);
        // literal: 5 bytes all escaped -> 5*2 + 2 = 12; hex: 5*2+2 = 12, tie -> literal wins.
        assert_eq!(encoded, b"(\\(\\(\\(\\(\\()");
    }

    #[test]
    fn long_line_wraps() {
        let mut emitter = TokenEmitter::new(Vec::new());
        for _ in 0..40 {
            emitter.emit(&Token::Number { text: "12".into(), int_value: Some(12) }).unwrap();
        }
        let out = emitter.into_inner();
        assert!(out.iter().any(|&b| b == b'\n'));
    }

    #[test]
    fn header_has_version_and_binary_marker() {
        let mut emitter = TokenEmitter::new(Vec::new());
        write_header(&mut emitter, "1.4", true).unwrap();
        let out = emitter.into_inner();
        assert!(out.starts_with(b"%PDF-1.4\n"));
        assert!(out.windows(4).any(|w| w.iter().all(|&b| b >= 0x80)));
    }

    #[test]
    fn xref_and_trailer_roundtrip_shape() {
        let mut emitter = TokenEmitter::new(Vec::new());
        emitter.write_raw(b"1 0 obj\nnull\nendobj\n").unwrap();
        let mut offsets = std::collections::HashMap::new();
        offsets.insert(1u32, 0u64);
        write_xref_and_trailer(&mut emitter, &offsets, 2, b"<< /Size 2 /Root 1 0 R >>").unwrap();
        let out = emitter.into_inner();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("xref\n0 2\n"));
        assert!(text.contains("trailer\n<< /Size 2 /Root 1 0 R >>"));
        assert!(text.contains("startxref\n"));
        assert!(text.ends_with("%%EOF\n"));
    }

    #[test]
    fn copy_stream_bytes_passes_through() {
        let mut emitter = TokenEmitter::new(Vec::new());
        emitter.emit(&Token::Keyword("stream".into())).unwrap();
        let mut src = Cursor::new(b"hello".to_vec());
        emitter.copy_stream_bytes(&mut src, 5).unwrap();
        emitter.emit(&Token::Keyword("endstream".into())).unwrap();
        let out = emitter.into_inner();
        assert!(out.windows(5).any(|w| w == b"hello"));
        assert!(out.starts_with(b"stream\n"));
    }
}
