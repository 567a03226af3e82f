//! Input-side file handling: header validation, `startxref` discovery,
//! xref/trailer loading, and indirect object resolution against an
//! already-open file.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{PdfCatError, Result};
use crate::objects::ObjId;
use crate::token::{is_pdf_whitespace, Lexer, Token, TokenStream};
use crate::xref::{find_startxref, load_xref_chain, XrefEntry, XrefTable};

/// Minimum file size accepted as a PDF: anything smaller cannot hold a
/// header, a trailer, and a startxref line.
const MIN_PDF_SIZE: u64 = 32;

/// A value read out of a shallow dictionary scan. Dictionaries are never
/// materialized as a full object tree; only the handful of keys pdfcat
/// actually inspects are captured.
#[derive(Debug, Clone)]
pub enum DictValue {
    Int(i64),
    Name(String),
    Ref(ObjId),
    Bool(bool),
    Null,
    /// An array all of whose entries are indirect references, e.g. `/Kids`.
    RefArray(Vec<ObjId>),
    /// Anything else: string, nested dict, mixed array. Present only so
    /// callers can tell the key existed.
    Other,
}

impl DictValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            DictValue::Int(n) => Some(*n),
            _ => None,
        }
    }
    pub fn as_ref(&self) -> Option<ObjId> {
        match self {
            DictValue::Ref(obj_id) => Some(*obj_id),
            _ => None,
        }
    }
    pub fn as_name(&self) -> Option<&str> {
        match self {
            DictValue::Name(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_ref_array(&self) -> Option<&[ObjId]> {
        match self {
            DictValue::RefArray(v) => Some(v),
            _ => None,
        }
    }
}

/// One opened input file together with its resolved cross-reference table.
pub struct InputState {
    pub path: PathBuf,
    pub file: File,
    pub file_len: u64,
    pub xref: XrefTable,
    /// The first input's declared version (`"1.4"`, `"1.7"`, ...) becomes
    /// the merged output's header; later inputs' versions are never
    /// consulted.
    pub version: String,
}

impl InputState {
    /// Open `path`, validate the header, and load its xref/trailer chain.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(PdfCatError::Io)?;
        let file_len = file.seek(SeekFrom::End(0))?;
        if file_len < MIN_PDF_SIZE {
            return Err(PdfCatError::InvalidFileSize { path: path.to_path_buf(), size: file_len });
        }

        let version = check_header(&mut file, path)?;

        let start = find_startxref(&mut file, path, file_len)?;
        let xref = load_xref_chain(&mut file, path, start, file_len)?;

        Ok(InputState { path: path.to_path_buf(), file, file_len, xref, version })
    }

    /// Seek to object `num`'s `<num> <gen> obj` header and leave the
    /// reader positioned right after the `obj` keyword. Returns the
    /// generation number actually found on disk.
    pub fn seek_object(&mut self, num: u32) -> Result<u16> {
        let entry = self
            .xref
            .entries
            .get(&num)
            .copied()
            .ok_or_else(|| PdfCatError::BadXref {
                path: self.path.clone(),
                offset: 0,
                detail: format!("object {num} has no xref entry"),
            })?;
        let (offset, generation) = match entry {
            XrefEntry::InUse { offset, generation } => (offset, generation),
            XrefEntry::Free => {
                return Err(PdfCatError::BadXref {
                    path: self.path.clone(),
                    offset: 0,
                    detail: format!("object {num} is marked free"),
                })
            }
        };
        self.file.seek(SeekFrom::Start(offset))?;
        let path = self.path.clone();
        let mut lexer = Lexer::new(&mut self.file, &path);

        let got_num = match lexer.next_token()? {
            Token::Number { int_value: Some(n), .. } => n as u32,
            _ => {
                return Err(PdfCatError::BadXref {
                    path,
                    offset,
                    detail: "expected object number".into(),
                })
            }
        };
        let got_gen = match lexer.next_token()? {
            Token::Number { int_value: Some(n), .. } => n as u16,
            _ => {
                return Err(PdfCatError::BadXref {
                    path,
                    offset,
                    detail: "expected generation number".into(),
                })
            }
        };
        match lexer.next_token()? {
            Token::Keyword(kw) if kw == "obj" => {}
            _ => {
                return Err(PdfCatError::BadXref {
                    path,
                    offset,
                    detail: "expected 'obj' keyword".into(),
                })
            }
        }
        if got_num != num || got_gen != generation {
            return Err(PdfCatError::BadXref {
                path,
                offset,
                detail: format!(
                    "xref points at {got_num} {got_gen} obj, expected {num} {generation} obj"
                ),
            });
        }
        Ok(generation)
    }

    /// Resolve an object known (or assumed) to hold a plain dictionary and
    /// scan it for the keys pdfcat cares about. Leaves the reader position
    /// unspecified on return; callers that also need to stream the object's
    /// raw bytes should re-seek via [`InputState::seek_object`].
    pub fn read_dict_object(&mut self, num: u32) -> Result<HashMap<String, DictValue>> {
        self.seek_object(num)?;
        let path = self.path.clone();
        let lexer = Lexer::new(&mut self.file, &path);
        let mut stream = TokenStream::new(lexer);
        match stream.next()? {
            Token::DictOpen => {}
            _ => {
                return Err(PdfCatError::TypeMismatch {
                    path,
                    offset: 0,
                    expected: "dictionary",
                    found: format!("object {num}"),
                })
            }
        }
        scan_dict(&mut stream, &path)
    }

    pub fn file_position(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    pub fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Resolve an indirect `/Length` (or any other plain-integer object).
    pub fn resolve_int(&mut self, num: u32) -> Result<i64> {
        self.seek_object(num)?;
        let path = self.path.clone();
        let mut lexer = Lexer::new(&mut self.file, &path);
        match lexer.next_token()? {
            Token::Number { int_value: Some(n), .. } => Ok(n),
            _ => Err(PdfCatError::TypeMismatch {
                path,
                offset: 0,
                expected: "integer",
                found: format!("object {num}"),
            }),
        }
    }
}

/// Scan a dictionary whose opening `<<` has already been consumed,
/// capturing only the keys in [`DictValue`]'s domain. Nested structures
/// for uninteresting keys are skipped without allocating.
pub fn scan_dict<R: Read + Seek>(
    stream: &mut TokenStream<'_, R>,
    path: &Path,
) -> Result<HashMap<String, DictValue>> {
    let mut out = HashMap::new();
    loop {
        match stream.next()? {
            Token::DictClose => break,
            Token::Name(key) => {
                let value = read_value(stream, path)?;
                out.insert(key, value);
            }
            Token::Eof => {
                return Err(PdfCatError::Syntax {
                    path: path.to_path_buf(),
                    offset: 0,
                    detail: "unterminated dictionary".into(),
                })
            }
            _ => {
                return Err(PdfCatError::Syntax {
                    path: path.to_path_buf(),
                    offset: 0,
                    detail: "expected dictionary key".into(),
                })
            }
        }
    }
    Ok(out)
}

fn read_value<R: Read + Seek>(
    stream: &mut TokenStream<'_, R>,
    path: &Path,
) -> Result<DictValue> {
    if let Some(obj_id) = stream.try_reference()? {
        return Ok(DictValue::Ref(obj_id));
    }
    match stream.next()? {
        Token::Number { int_value: Some(n), .. } => Ok(DictValue::Int(n)),
        Token::Number { .. } => Ok(DictValue::Other),
        Token::Name(n) => Ok(DictValue::Name(n)),
        Token::Bool(b) => Ok(DictValue::Bool(b)),
        Token::Null => Ok(DictValue::Null),
        Token::Str(_) => Ok(DictValue::Other),
        Token::DictOpen => {
            skip_balanced(stream, path, 1, 0)?;
            Ok(DictValue::Other)
        }
        Token::ArrayOpen => read_array(stream, path),
        other => Err(PdfCatError::Syntax {
            path: path.to_path_buf(),
            offset: 0,
            detail: format!("unexpected token in dictionary value: {other:?}"),
        }),
    }
}

fn read_array<R: Read + Seek>(
    stream: &mut TokenStream<'_, R>,
    path: &Path,
) -> Result<DictValue> {
    let mut refs = Vec::new();
    let mut all_refs = true;
    loop {
        if let Some(obj_id) = stream.try_reference()? {
            refs.push(obj_id);
            continue;
        }
        match stream.next()? {
            Token::ArrayClose => break,
            Token::DictOpen => {
                all_refs = false;
                skip_balanced(stream, path, 1, 0)?;
            }
            Token::ArrayOpen => {
                all_refs = false;
                skip_balanced(stream, path, 0, 1)?;
            }
            Token::Eof => {
                return Err(PdfCatError::Syntax {
                    path: path.to_path_buf(),
                    offset: 0,
                    detail: "unterminated array".into(),
                })
            }
            _ => all_refs = false,
        }
    }
    if all_refs {
        Ok(DictValue::RefArray(refs))
    } else {
        Ok(DictValue::Other)
    }
}

/// Skip a nested dict/array structure given the starting depth counts.
fn skip_balanced<R: Read + Seek>(
    stream: &mut TokenStream<'_, R>,
    path: &Path,
    mut dict_depth: u32,
    mut array_depth: u32,
) -> Result<()> {
    while dict_depth > 0 || array_depth > 0 {
        match stream.next()? {
            Token::DictOpen => dict_depth += 1,
            Token::DictClose => dict_depth -= 1,
            Token::ArrayOpen => array_depth += 1,
            Token::ArrayClose => array_depth -= 1,
            Token::Eof => {
                return Err(PdfCatError::Syntax {
                    path: path.to_path_buf(),
                    offset: 0,
                    detail: "unterminated structure".into(),
                })
            }
            _ => {}
        }
    }
    Ok(())
}

/// Validate the `%PDF-D.D` header plus its required trailing whitespace
/// byte and return the declared version (`"1.4"`, `"1.7"`, ...). Mirrors
/// the original tool's header sniff, which reads the same nine bytes.
fn check_header<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<String> {
    reader.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 9];
    reader.read_exact(&mut buf)?;
    if &buf[0..5] != b"%PDF-" {
        return Err(PdfCatError::Header {
            path: path.to_path_buf(),
            detail: "missing %PDF- signature".into(),
        });
    }
    let major = buf[5];
    let minor = buf[7];
    if !major.is_ascii_digit() || buf[6] != b'.' || !minor.is_ascii_digit() {
        return Err(PdfCatError::Header {
            path: path.to_path_buf(),
            detail: "malformed version number".into(),
        });
    }
    if !is_pdf_whitespace(buf[8]) {
        return Err(PdfCatError::Header {
            path: path.to_path_buf(),
            detail: "header not followed by whitespace".into(),
        });
    }
    Ok(format!("{}.{}", major as char, minor as char))
}

/// Detect the binary-marker comment line that conventionally follows the
/// header: four or more bytes `>= 0x80` on the line right after
/// `%PDF-D.D`. The first input's answer decides whether the merged
/// output gets one too.
pub fn has_binary_marker<R: Read + Seek>(reader: &mut R) -> Result<bool> {
    reader.seek(SeekFrom::Start(0))?;
    let mut line = Vec::new();
    let mut buf = [0u8; 1];
    // Skip the header line.
    loop {
        if reader.read(&mut buf)? == 0 {
            return Ok(false);
        }
        if buf[0] == b'\n' {
            break;
        }
    }
    for _ in 0..16 {
        if reader.read(&mut buf)? == 0 {
            break;
        }
        if buf[0] == b'\n' {
            break;
        }
        line.push(buf[0]);
    }
    Ok(line.iter().filter(|&&b| b >= 0x80).count() >= 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_accepts_well_formed_version() {
        let mut cur = Cursor::new(b"%PDF-1.7\n".to_vec());
        let path = Path::new("t.pdf");
        assert_eq!(check_header(&mut cur, path).unwrap(), "1.7");
    }

    #[test]
    fn header_rejects_missing_signature() {
        let mut cur = Cursor::new(b"not a pdf".to_vec());
        let path = Path::new("t.pdf");
        assert!(check_header(&mut cur, path).is_err());
    }

    #[test]
    fn header_rejects_non_whitespace_ninth_byte() {
        let mut cur = Cursor::new(b"%PDF-1.4X".to_vec());
        let path = Path::new("t.pdf");
        assert!(check_header(&mut cur, path).is_err());
    }

    #[test]
    fn binary_marker_detected() {
        let mut data = b"%PDF-1.4\n".to_vec();
        data.extend_from_slice(&[0xE2, 0xE3, 0xCF, 0xD3, b'\n']);
        let mut cur = Cursor::new(data);
        assert!(has_binary_marker(&mut cur).unwrap());
    }

    #[test]
    fn binary_marker_absent() {
        let mut cur = Cursor::new(b"%PDF-1.4\n1 0 obj\n".to_vec());
        assert!(!has_binary_marker(&mut cur).unwrap());
    }
}
