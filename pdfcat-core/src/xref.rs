//! Cross-reference table and trailer loading.
//!
//! Builds a flat, fully-resolved object location table by walking the
//! `/Prev`-linked chain of xref sections starting at `startxref`. Only the
//! classic table form is supported; cross-reference *streams* are rejected
//! as an unsupported feature.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{PdfCatError, Result};
use crate::objects::ObjId;
use crate::token::{Lexer, Token};

/// One entry of the merged cross-reference table, keyed by object number.
#[derive(Debug, Clone, Copy)]
pub enum XrefEntry {
    /// `n`-type entry: byte offset of `<num> <gen> obj`.
    InUse { offset: u64, generation: u16 },
    /// `f`-type entry: the object number does not resolve to anything.
    Free,
}

/// Merged view of every xref subsection reachable by following `/Prev`,
/// together with the trailer dictionary values pdfcat actually needs.
pub struct XrefTable {
    pub entries: HashMap<u32, XrefEntry>,
    pub size: u32,
    pub root: ObjId,
    pub info: Option<ObjId>,
    /// Byte offset of the first (newest) trailer dictionary's opening
    /// `<<`, kept so the full dict can be re-read and copied key by key
    /// instead of just the handful this table retains.
    pub trailer_offset: u64,
}

const STARTXREF_SCAN_WINDOW: u64 = 1024;

/// No object body can start before the shortest possible header
/// (`%PDF-D.D\n`), so any in-use entry offset below this is malformed.
const MIN_OBJECT_OFFSET: u64 = 9;

/// Locate `startxref` near the end of the file and return the offset it
/// names.
pub fn find_startxref<R: Read + Seek>(reader: &mut R, path: &Path, file_len: u64) -> Result<u64> {
    let window = STARTXREF_SCAN_WINDOW.min(file_len);
    reader.seek(SeekFrom::Start(file_len - window))?;
    let mut buf = vec![0u8; window as usize];
    reader.read_exact(&mut buf)?;

    let needle = b"startxref";
    let pos = buf
        .windows(needle.len())
        .rposition(|w| w == needle)
        .ok_or_else(|| PdfCatError::BadXref {
            path: path.to_path_buf(),
            offset: file_len,
            detail: "startxref keyword not found".into(),
        })?;

    let tail_offset = file_len - window + pos as u64 + needle.len() as u64;
    reader.seek(SeekFrom::Start(tail_offset))?;
    let mut lexer = Lexer::new(reader, path);
    match lexer.next_token()? {
        Token::Number { int_value: Some(n), .. } if n >= 0 => Ok(n as u64),
        _ => Err(PdfCatError::BadXref {
            path: path.to_path_buf(),
            offset: tail_offset,
            detail: "startxref value is not a non-negative integer".into(),
        }),
    }
}

/// Walk the `/Prev` chain starting at `start_offset`, merging subsections
/// so that an object number first seen in a newer section is never
/// overwritten by an older one.
pub fn load_xref_chain<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    start_offset: u64,
    file_len: u64,
) -> Result<XrefTable> {
    let mut entries: HashMap<u32, XrefEntry> = HashMap::new();
    let mut size: u32 = 0;
    let mut root: Option<ObjId> = None;
    let mut info: Option<ObjId> = None;
    let mut trailer_offset: Option<u64> = None;
    let mut next_offset = Some(start_offset);
    let mut visited = std::collections::HashSet::new();

    while let Some(offset) = next_offset {
        if !visited.insert(offset) {
            tracing::warn!("cyclic /Prev chain detected at offset {offset} in {}", path.display());
            return Err(PdfCatError::BadXref {
                path: path.to_path_buf(),
                offset,
                detail: "cyclic /Prev chain".into(),
            });
        }

        tracing::debug!("loading xref subsection at offset {offset}");
        let section = load_xref_section(reader, path, offset, file_len)?;
        for (num, entry) in section.entries {
            entries.entry(num).or_insert(entry);
        }
        if size == 0 {
            size = section.size;
        }
        if root.is_none() {
            root = section.root;
        }
        if info.is_none() {
            info = section.info;
        }
        if trailer_offset.is_none() {
            trailer_offset = Some(section.trailer_offset);
        }
        next_offset = section.prev;
    }

    let root = root.ok_or_else(|| PdfCatError::MissingRequired {
        path: path.to_path_buf(),
        offset: start_offset,
        key: "Root",
    })?;
    let trailer_offset = trailer_offset.unwrap_or(start_offset);

    tracing::debug!("merged xref for {}: {} objects, root {:?}", path.display(), entries.len(), root);
    Ok(XrefTable { entries, size, root, info, trailer_offset })
}

struct XrefSection {
    entries: HashMap<u32, XrefEntry>,
    size: u32,
    root: Option<ObjId>,
    info: Option<ObjId>,
    prev: Option<u64>,
    trailer_offset: u64,
}

fn load_xref_section<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    offset: u64,
    file_len: u64,
) -> Result<XrefSection> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut lexer = Lexer::new(reader, path);

    match lexer.next_token()? {
        Token::Keyword(kw) if kw == "xref" => {}
        _ => {
            return Err(PdfCatError::BadXref {
                path: path.to_path_buf(),
                offset,
                detail: "expected 'xref' keyword".into(),
            })
        }
    }

    let mut entries = HashMap::new();
    loop {
        let start_tok = lexer.next_token()?;
        let start = match start_tok {
            Token::Number { int_value: Some(n), .. } if n >= 0 => n as u32,
            Token::Keyword(kw) if kw == "trailer" => break,
            _ => {
                return Err(PdfCatError::BadXref {
                    path: path.to_path_buf(),
                    offset,
                    detail: "malformed xref subsection header".into(),
                })
            }
        };
        let count = match lexer.next_token()? {
            Token::Number { int_value: Some(n), .. } if n >= 0 => n as u32,
            _ => {
                return Err(PdfCatError::BadXref {
                    path: path.to_path_buf(),
                    offset,
                    detail: "malformed xref subsection count".into(),
                })
            }
        };

        for i in 0..count {
            let ofs_tok = lexer.next_token()?;
            let gen_tok = lexer.next_token()?;
            let kind_tok = lexer.next_token()?;
            let (ofs, gen) = match (&ofs_tok, &gen_tok) {
                (
                    Token::Number { int_value: Some(a), .. },
                    Token::Number { int_value: Some(b), .. },
                ) if *a >= 0 && *b >= 0 && *b <= u16::MAX as i64 => (*a as u64, *b as u16),
                _ => {
                    return Err(PdfCatError::BadXref {
                        path: path.to_path_buf(),
                        offset,
                        detail: "malformed xref entry".into(),
                    })
                }
            };
            let num = start + i;
            match kind_tok {
                Token::Keyword(kw) if kw == "n" => {
                    if ofs < MIN_OBJECT_OFFSET || ofs >= file_len {
                        return Err(PdfCatError::BadXref {
                            path: path.to_path_buf(),
                            offset,
                            detail: format!(
                                "entry for object {num} has out-of-range offset {ofs}"
                            ),
                        });
                    }
                    entries.insert(num, XrefEntry::InUse { offset: ofs, generation: gen });
                }
                Token::Keyword(kw) if kw == "f" => {
                    entries.insert(num, XrefEntry::Free);
                }
                _ => {
                    return Err(PdfCatError::BadXref {
                        path: path.to_path_buf(),
                        offset,
                        detail: "xref entry missing n/f marker".into(),
                    })
                }
            }
        }
    }

    let trailer_pos = lexer.position()?;
    let trailer = parse_trailer_dict(&mut lexer, path, trailer_pos)?;

    let size = trailer
        .get("Size")
        .and_then(|v| v.as_int())
        .ok_or_else(|| PdfCatError::MissingRequired {
            path: path.to_path_buf(),
            offset: trailer_pos,
            key: "Size",
        })? as u32;
    let root = trailer.get("Root").and_then(|v| v.as_ref_pair());
    let info = trailer.get("Info").and_then(|v| v.as_ref_pair());
    let prev = trailer.get("Prev").and_then(|v| v.as_int()).map(|n| n as u64);

    Ok(XrefSection { entries, size, root, info, prev, trailer_offset: trailer_pos })
}

/// Scalar trailer values pdfcat needs at load time (`Size`, `Root`,
/// `Info`, `Prev`). The rest of the dictionary is re-read and copied key
/// by key from `trailer_offset` when the merged trailer is written, so
/// nothing else needs to be retained here.
#[derive(Debug, Clone)]
pub enum TrailerValue {
    Int(i64),
    Ref(ObjId),
}

impl TrailerValue {
    fn as_int(&self) -> Option<i64> {
        match self {
            TrailerValue::Int(n) => Some(*n),
            _ => None,
        }
    }
    fn as_ref_pair(&self) -> Option<ObjId> {
        match self {
            TrailerValue::Ref(obj_id) => Some(*obj_id),
            _ => None,
        }
    }
}

/// Parse a `<< ... >>` dictionary immediately following `trailer`,
/// extracting the scalar keys pdfcat needs at load time (`Size`, `Root`,
/// `Info`, `Prev`). Every other key stays in the file; [`copy_trailer_dict`]
/// walks the dictionary again from `trailer_offset` to copy them into the
/// merged output.
///
/// [`copy_trailer_dict`]: crate::copier::copy_trailer_dict
fn parse_trailer_dict<R: Read + Seek>(
    lexer: &mut Lexer<'_, R>,
    path: &Path,
    offset: u64,
) -> Result<HashMap<String, TrailerValue>> {
    match lexer.next_token()? {
        Token::DictOpen => {}
        _ => {
            return Err(PdfCatError::BadXref {
                path: path.to_path_buf(),
                offset,
                detail: "malformed trailer dictionary".into(),
            });
        }
    }

    let mut out = HashMap::new();
    let mut depth = 1u32;
    loop {
        let tok = lexer.next_token()?;
        match tok {
            Token::DictClose => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Token::DictOpen => depth += 1,
            Token::ArrayOpen => skip_array(lexer, path)?,
            Token::Name(key) if depth == 1 => {
                let value = read_scalar_value(lexer, path)?;
                if matches!(key.as_str(), "Size" | "Root" | "Info" | "Prev") {
                    out.insert(key, value);
                }
            }
            Token::Eof => {
                return Err(PdfCatError::BadXref {
                    path: path.to_path_buf(),
                    offset,
                    detail: "malformed trailer dictionary".into(),
                });
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Read one value after a dictionary key: either an integer, an indirect
/// reference (`<num> <gen> R`), or anything else (which is skipped).
fn read_scalar_value<R: Read + Seek>(
    lexer: &mut Lexer<'_, R>,
    path: &Path,
) -> Result<TrailerValue> {
    let first = lexer.next_token()?;
    match first {
        Token::Number { int_value: Some(n), .. } => {
            let checkpoint = lexer.position()?;
            let second = lexer.next_token()?;
            if let Token::Number { int_value: Some(g), .. } = second {
                let checkpoint2 = lexer.position()?;
                let third = lexer.next_token()?;
                if let Token::Ref = third {
                    return Ok(TrailerValue::Ref(ObjId(n as u32, g as u16)));
                }
                lexer.seek_to(checkpoint2)?;
            }
            lexer.seek_to(checkpoint)?;
            Ok(TrailerValue::Int(n))
        }
        Token::DictOpen => {
            skip_dict(lexer, path)?;
            Ok(TrailerValue::Int(0))
        }
        Token::ArrayOpen => {
            skip_array(lexer, path)?;
            Ok(TrailerValue::Int(0))
        }
        _ => Ok(TrailerValue::Int(0)),
    }
}

fn skip_dict<R: Read + Seek>(lexer: &mut Lexer<'_, R>, path: &Path) -> Result<()> {
    let mut depth = 1u32;
    loop {
        match lexer.next_token()? {
            Token::DictOpen => depth += 1,
            Token::DictClose => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Token::ArrayOpen => skip_array(lexer, path)?,
            Token::Eof => {
                return Err(PdfCatError::Syntax {
                    path: path.to_path_buf(),
                    offset: lexer.position()?,
                    detail: "unterminated dictionary".into(),
                })
            }
            _ => {}
        }
    }
}

fn skip_array<R: Read + Seek>(lexer: &mut Lexer<'_, R>, path: &Path) -> Result<()> {
    let mut depth = 1u32;
    loop {
        match lexer.next_token()? {
            Token::ArrayOpen => depth += 1,
            Token::ArrayClose => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Token::DictOpen => skip_dict(lexer, path)?,
            Token::Eof => {
                return Err(PdfCatError::Syntax {
                    path: path.to_path_buf(),
                    offset: lexer.position()?,
                    detail: "unterminated array".into(),
                })
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build(body: &[u8]) -> Cursor<Vec<u8>> {
        Cursor::new(body.to_vec())
    }

    #[test]
    fn finds_startxref_near_eof() {
        let pdf = b"%PDF-1.4\n...\nstartxref\n1234\n%%EOF";
        let mut cur = build(pdf);
        let path = Path::new("t.pdf");
        let len = pdf.len() as u64;
        let off = find_startxref(&mut cur, path, len).unwrap();
        assert_eq!(off, 1234);
    }

    #[test]
    fn loads_single_section_xref() {
        let xref_and_trailer = b"xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n0\n%%EOF";
        let file_len = xref_and_trailer.len() as u64;
        let mut cur = build(xref_and_trailer);
        let path = Path::new("t.pdf");
        let table = load_xref_chain(&mut cur, path, 0, file_len).unwrap();
        assert_eq!(table.size, 2);
        assert_eq!(table.root, ObjId(1, 0));
        match table.entries.get(&1).unwrap() {
            XrefEntry::InUse { offset, generation } => {
                assert_eq!(*offset, 9);
                assert_eq!(*generation, 0);
            }
            XrefEntry::Free => panic!("expected in-use entry"),
        }
        matches!(table.entries.get(&0).unwrap(), XrefEntry::Free);
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let xref_and_trailer = b"xref\n0 2\n0000000000 65535 f \n0000009999 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n0\n%%EOF";
        let file_len = xref_and_trailer.len() as u64;
        let mut cur = build(xref_and_trailer);
        let path = Path::new("t.pdf");
        let err = load_xref_chain(&mut cur, path, 0, file_len).unwrap_err();
        assert!(matches!(err, PdfCatError::BadXref { .. }));
    }

    #[test]
    fn chained_prev_merges_older_without_overwrite() {
        // Older section (offset 0) defines object 1 at offset 9.
        // Newer section (offset later) redefines object 1 at offset 20
        // and points /Prev back at the older one.
        let older = b"xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\n";
        let mut data = older.to_vec();
        let newer_offset = data.len() as u64;
        data.extend_from_slice(
            format!(
                "xref\n0 2\n0000000000 65535 f \n0000000020 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R /Prev 0 >>\n"
            )
            .as_bytes(),
        );
        data.extend_from_slice(b"padding to keep every fixture offset within the file bounds");
        let file_len = data.len() as u64;
        let mut cur = Cursor::new(data);
        let path = Path::new("t.pdf");
        let table = load_xref_chain(&mut cur, path, newer_offset, file_len).unwrap();
        match table.entries.get(&1).unwrap() {
            XrefEntry::InUse { offset, .. } => assert_eq!(*offset, 20),
            XrefEntry::Free => panic!("expected in-use"),
        }
    }
}
