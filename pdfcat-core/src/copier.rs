//! Reachability-driven object copier.
//!
//! Objects are discovered, assigned a target number, and copied in
//! breadth-first order starting from the synthesized pages root and
//! catalog. A [`VecDeque`] stands in for an intrusive linked-list work
//! queue.

use std::collections::{HashMap, VecDeque};
use std::io::Write;

use crate::error::{PdfCatError, Result};
use crate::input::InputState;
use crate::objects::ObjId;
use crate::token::{Token, TokenStream};
use crate::writer::TokenEmitter;

/// Tracks which source objects have been assigned an output object
/// number and still need their bodies copied.
pub struct Copier {
    assigned: HashMap<(usize, u32), u32>,
    queue: VecDeque<(usize, u32)>,
    next_target: u32,
}

impl Copier {
    pub fn new(first_target: u32) -> Self {
        Copier { assigned: HashMap::new(), queue: VecDeque::new(), next_target: first_target }
    }

    /// Assign (or look up) the output object number for `(input_idx,
    /// src_num)`, enqueuing it for copying the first time it's seen.
    pub fn enqueue(&mut self, input_idx: usize, src_num: u32) -> u32 {
        if let Some(&target) = self.assigned.get(&(input_idx, src_num)) {
            return target;
        }
        let target = self.next_target;
        self.next_target += 1;
        self.assigned.insert((input_idx, src_num), target);
        self.queue.push_back((input_idx, src_num));
        target
    }

    pub fn pop(&mut self) -> Option<(usize, u32, u32)> {
        let (input_idx, src_num) = self.queue.pop_front()?;
        let target = self.assigned[&(input_idx, src_num)];
        Some((input_idx, src_num, target))
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Copy one object's body (and stream, if present) from `input` to
/// `emitter`, renumbering every indirect reference it contains and
/// enqueuing referenced objects that haven't been seen yet.
///
/// `parent_override`, when set, replaces (or injects) this object's
/// top-level `/Parent` entry with a reference to the given target object
/// number. It is used for each input's immediate page-tree children once
/// their original `/Pages` node is discarded in favor of the synthesized
/// root.
///
/// `pages_override`, when set, replaces this object's top-level `/Pages`
/// entry the same way. It is used for the first input's catalog, whose
/// genuine `/Pages` node is never copied: the catalog itself survives
/// (so `/Root` can keep pointing at a real `/Type /Catalog` object) but
/// its page tree is always the synthesized merged root.
pub fn copy_object<W: Write>(
    input: &mut InputState,
    input_idx: usize,
    src_num: u32,
    target_num: u32,
    copier: &mut Copier,
    emitter: &mut TokenEmitter<W>,
    parent_override: Option<u32>,
    pages_override: Option<u32>,
) -> Result<()> {
    input.seek_object(src_num)?;
    let path = input.path.clone();

    emitter.begin_object(target_num)?;

    // depth > 0 while inside the top-level array/dict value; pending_length
    // tracks a /Length key seen at depth == 1 so the stream length can be
    // resolved once the dict closes.
    let mut depth: i32 = 0;
    let mut at_top = true;
    let mut pending_length: Option<LengthValue> = None;
    let mut awaiting_length_value = false;
    let mut awaiting_parent_value = false;
    let mut awaiting_pages_value = false;
    let mut saw_parent = false;
    let mut saw_pages = false;

    loop {
        let lexer = crate::token::Lexer::new(&mut input.file, &path);
        let mut stream = TokenStream::new(lexer);

        if let Some(ObjId(n, g)) = stream.try_reference()? {
            let _ = g; // output generation is always 0
            if awaiting_parent_value {
                awaiting_parent_value = false;
                emitter.emit_reference(parent_override.unwrap())?;
                if depth == 0 && at_top {
                    break;
                }
                continue;
            }
            if awaiting_pages_value {
                awaiting_pages_value = false;
                emitter.emit_reference(pages_override.unwrap())?;
                if depth == 0 && at_top {
                    break;
                }
                continue;
            }
            let target = copier.enqueue(input_idx, n);
            emitter.emit_reference(target)?;
            if awaiting_length_value {
                pending_length = Some(LengthValue::Indirect(n));
                awaiting_length_value = false;
            }
            if depth == 0 && at_top {
                break;
            }
            continue;
        }

        let tok = stream.next()?;
        match &tok {
            Token::DictOpen | Token::ArrayOpen => {
                depth += 1;
                at_top = false;
                emitter.emit(&tok)?;
            }
            Token::DictClose | Token::ArrayClose => {
                if depth == 1 && matches!(tok, Token::DictClose) {
                    if !saw_parent {
                        if let Some(root) = parent_override {
                            emitter.emit(&Token::Name("Parent".into()))?;
                            emitter.emit_reference(root)?;
                        }
                    }
                    if !saw_pages {
                        if let Some(root) = pages_override {
                            emitter.emit(&Token::Name("Pages".into()))?;
                            emitter.emit_reference(root)?;
                        }
                    }
                }
                depth -= 1;
                emitter.emit(&tok)?;
                if depth == 0 {
                    break;
                }
            }
            Token::Name(key) if depth == 1 && key == "Length" => {
                emitter.emit(&tok)?;
                awaiting_length_value = true;
            }
            Token::Name(key) if depth == 1 && parent_override.is_some() && key == "Parent" => {
                saw_parent = true;
                emitter.emit(&tok)?;
                awaiting_parent_value = true;
            }
            Token::Name(key) if depth == 1 && pages_override.is_some() && key == "Pages" => {
                saw_pages = true;
                emitter.emit(&tok)?;
                awaiting_pages_value = true;
            }
            Token::Number { int_value: Some(n), .. } if awaiting_length_value => {
                pending_length = Some(LengthValue::Direct(*n as u64));
                awaiting_length_value = false;
                emitter.emit(&tok)?;
            }
            Token::Eof => {
                return Err(PdfCatError::Syntax {
                    path: path.clone(),
                    offset: 0,
                    detail: format!("unexpected end of file inside object {src_num}"),
                });
            }
            _ => {
                if depth == 0 {
                    // Scalar object (int/name/string/bool/null): one token only.
                    emitter.emit(&tok)?;
                    break;
                }
                emitter.emit(&tok)?;
            }
        }
    }

    // Beyond the dict, the object may continue with `stream ... endstream`.
    let checkpoint = input.file_position()?;
    let next = {
        let lexer = crate::token::Lexer::new(&mut input.file, &path);
        let mut stream = TokenStream::new(lexer);
        stream.next()?
    };
    if let Token::Keyword(kw) = &next {
        if kw == "stream" {
            let length = match pending_length {
                Some(LengthValue::Direct(n)) => n,
                Some(LengthValue::Indirect(num)) => input.resolve_int(num)? as u64,
                None => {
                    return Err(PdfCatError::MissingRequired {
                        path: path.clone(),
                        offset: 0,
                        key: "Length",
                    })
                }
            };
            emitter.emit(&Token::Keyword("stream".into()))?;
            skip_stream_line_break(input)?;
            emitter.copy_stream_bytes(&mut input.file, length)?;
            expect_endstream(input, &path)?;
            emitter.emit(&Token::Keyword("endstream".into()))?;
        } else {
            input.seek_to(checkpoint)?;
        }
    } else {
        input.seek_to(checkpoint)?;
    }

    emitter.end_object()?;
    Ok(())
}

/// Copy the first input's trailer dictionary into `emitter`, renumbering
/// every reference it carries (`/Root`, `/Info`, and anything else)
/// through `copier` and enqueuing whatever those references point at.
/// Every key is copied except `/Prev` and `/Size`: `/Prev` has no meaning
/// in a single merged file, and `/Size` is recomputed once every object
/// has been copied.
///
/// Emits the dictionary's opening `<<` but not its closing `>>`; the
/// caller appends a fresh `/Size` entry and the closing bracket once the
/// final object count is known.
pub fn copy_trailer_dict<W: Write>(
    input: &mut InputState,
    input_idx: usize,
    trailer_offset: u64,
    copier: &mut Copier,
    emitter: &mut TokenEmitter<W>,
) -> Result<()> {
    input.seek_to(trailer_offset)?;
    let path = input.path.clone();

    {
        let lexer = crate::token::Lexer::new(&mut input.file, &path);
        let mut stream = TokenStream::new(lexer);
        match stream.next()? {
            Token::DictOpen => {}
            _ => {
                return Err(PdfCatError::Syntax {
                    path,
                    offset: trailer_offset,
                    detail: "expected trailer dictionary".into(),
                })
            }
        }
    }
    emitter.emit(&Token::DictOpen)?;

    let mut depth: u32 = 1;
    let mut skip_value = false;

    loop {
        let lexer = crate::token::Lexer::new(&mut input.file, &path);
        let mut stream = TokenStream::new(lexer);

        if let Some(ObjId(n, _g)) = stream.try_reference()? {
            if !skip_value {
                let target = copier.enqueue(input_idx, n);
                emitter.emit_reference(target)?;
            }
            continue;
        }

        let tok = stream.next()?;
        match &tok {
            Token::Name(key) if depth == 1 => {
                skip_value = matches!(key.as_str(), "Prev" | "Size");
                if !skip_value {
                    emitter.emit(&tok)?;
                }
            }
            Token::DictOpen | Token::ArrayOpen => {
                depth += 1;
                if !skip_value {
                    emitter.emit(&tok)?;
                }
            }
            Token::DictClose | Token::ArrayClose => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                if !skip_value {
                    emitter.emit(&tok)?;
                }
                if depth == 1 {
                    skip_value = false;
                }
            }
            Token::Eof => {
                return Err(PdfCatError::Syntax {
                    path: path.clone(),
                    offset: 0,
                    detail: "unterminated trailer dictionary".into(),
                });
            }
            _ => {
                if !skip_value {
                    emitter.emit(&tok)?;
                }
            }
        }
    }

    Ok(())
}

enum LengthValue {
    Direct(u64),
    Indirect(u32),
}

/// After the `stream` keyword, a single CRLF or LF must precede the raw
/// bytes; it is not part of the data.
fn skip_stream_line_break(input: &mut InputState) -> Result<()> {
    use std::io::Read;
    let mut one = [0u8; 1];
    input.file.read_exact(&mut one)?;
    if one[0] == b'\r' {
        let pos = input.file_position()?;
        let mut maybe_lf = [0u8; 1];
        if input.file.read_exact(&mut maybe_lf).is_ok() && maybe_lf[0] != b'\n' {
            input.seek_to(pos)?;
        }
    } else if one[0] != b'\n' {
        // Malformed, but tolerate: treat the byte as already consumed.
    }
    Ok(())
}

fn expect_endstream(input: &mut InputState, path: &std::path::Path) -> Result<()> {
    let lexer = crate::token::Lexer::new(&mut input.file, path);
    let mut stream = TokenStream::new(lexer);
    match stream.next()? {
        Token::Keyword(kw) if kw == "endstream" => Ok(()),
        _ => Err(PdfCatError::Syntax {
            path: path.to_path_buf(),
            offset: 0,
            detail: "expected 'endstream'".into(),
        }),
    }
}
