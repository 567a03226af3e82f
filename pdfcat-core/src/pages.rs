//! Catalog and page-tree rewriting.
//!
//! pdfcat never keeps any input's original `/Pages` node: it reads just
//! enough of each input's catalog and top `/Pages` dictionary to learn the
//! immediate page-tree children and page count, then synthesizes a single
//! merged root as object 1. Each input's immediate children get their
//! `/Parent` entry redirected to that root by [`crate::copier::copy_object`].

use crate::error::{PdfCatError, Result};
use crate::input::InputState;
use crate::token::Token;
use crate::writer::TokenEmitter;

/// Reserved object number of the synthesized merged `/Pages` root.
pub const PAGES_ROOT: u32 = 1;

pub struct PageTree {
    /// Object numbers (in the owning input's own numbering) that are
    /// direct children of that input's top `/Pages` node.
    pub kids: Vec<u32>,
    pub count: i64,
}

/// Read `input`'s catalog and top-level `/Pages` node, without
/// materializing either as a full object tree.
pub fn load_page_tree(input: &mut InputState) -> Result<PageTree> {
    let root_num = input.xref.root.0;
    let catalog = input.read_dict_object(root_num)?;
    if let Some(found) = catalog.get("Type").and_then(|v| v.as_name()) {
        if found != "Catalog" {
            return Err(PdfCatError::TypeMismatch {
                path: input.path.clone(),
                offset: 0,
                expected: "Catalog",
                found: found.to_string(),
            });
        }
    }
    let pages_ref = catalog
        .get("Pages")
        .and_then(|v| v.as_ref())
        .ok_or_else(|| PdfCatError::MissingRequired {
            path: input.path.clone(),
            offset: 0,
            key: "Pages",
        })?;

    let pages_dict = input.read_dict_object(pages_ref.0)?;
    if let Some(found) = pages_dict.get("Type").and_then(|v| v.as_name()) {
        if found != "Pages" {
            return Err(PdfCatError::TypeMismatch {
                path: input.path.clone(),
                offset: 0,
                expected: "Pages",
                found: found.to_string(),
            });
        }
    }
    let kids = pages_dict
        .get("Kids")
        .and_then(|v| v.as_ref_array())
        .ok_or_else(|| PdfCatError::MissingRequired {
            path: input.path.clone(),
            offset: 0,
            key: "Kids",
        })?
        .iter()
        .map(|obj_id| obj_id.0)
        .collect();
    let count = pages_dict.get("Count").and_then(|v| v.as_int()).ok_or_else(|| {
        PdfCatError::MissingRequired { path: input.path.clone(), offset: 0, key: "Count" }
    })?;

    Ok(PageTree { kids, count })
}

/// Write the synthesized object 1: `<< /Type /Pages /Kids [...] /Count N >>`.
pub fn write_pages_root<W: std::io::Write>(
    emitter: &mut TokenEmitter<W>,
    kid_targets: &[u32],
    total_count: i64,
) -> Result<()> {
    emitter.begin_object(PAGES_ROOT)?;
    emitter.emit(&Token::DictOpen)?;
    emitter.emit(&Token::Name("Type".into()))?;
    emitter.emit(&Token::Name("Pages".into()))?;
    emitter.emit(&Token::Name("Kids".into()))?;
    emitter.emit(&Token::ArrayOpen)?;
    for &target in kid_targets {
        emitter.emit_reference(target)?;
    }
    emitter.emit(&Token::ArrayClose)?;
    emitter.emit(&Token::Name("Count".into()))?;
    emitter.emit(&Token::Number { text: total_count.to_string(), int_value: Some(total_count) })?;
    emitter.emit(&Token::DictClose)?;
    emitter.end_object()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_expected_shape() {
        let mut emitter = TokenEmitter::new(Vec::new());
        write_pages_root(&mut emitter, &[2, 5, 9], 3).unwrap();
        let out = String::from_utf8(emitter.into_inner()).unwrap();
        assert!(out.contains("1 0 obj"));
        assert!(out.contains("/Type"));
        assert!(out.contains("/Pages"));
        assert!(out.contains("/Kids"));
        assert!(out.contains("2 0 R"));
        assert!(out.contains("5 0 R"));
        assert!(out.contains("9 0 R"));
        assert!(out.contains("/Count"));
        assert!(out.contains("endobj"));
    }
}
