//! Top-level orchestration: open every input, merge their page trees under
//! a synthesized root, copy everything reachable from it, and write the
//! xref/trailer.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::copier::{copy_object, copy_trailer_dict, Copier};
use crate::error::{PdfCatError, Result};
use crate::input::{has_binary_marker, InputState};
use crate::pages::{load_page_tree, write_pages_root, PAGES_ROOT};
use crate::token::Token;
use crate::writer::{write_header, write_xref_and_trailer, TokenEmitter};

/// First free object number after the reserved synthesized pages root.
const FIRST_FREE_OBJ: u32 = PAGES_ROOT + 1;

/// Concatenate `inputs` into `output`. `output` must be a fresh, empty
/// sink (the CLI front-end is responsible for the output-matches-input
/// check and for opening the file).
pub fn concat<W: Write>(input_paths: &[PathBuf], output: W) -> Result<()> {
    if input_paths.is_empty() {
        return Err(PdfCatError::Usage("at least one input file is required".into()));
    }

    let mut inputs: Vec<InputState> = Vec::with_capacity(input_paths.len());
    for path in input_paths {
        tracing::info!("opening input {}", path.display());
        inputs.push(InputState::open(path)?);
    }

    let binary_marker = has_binary_marker(&mut inputs[0].file)?;
    let version = inputs[0].version.clone();
    let catalog_num = inputs[0].xref.root.0;
    let trailer_offset = inputs[0].xref.trailer_offset;

    let mut copier = Copier::new(FIRST_FREE_OBJ);
    let mut top_kids: HashSet<(usize, u32)> = HashSet::new();
    let mut all_kid_targets: Vec<u32> = Vec::new();
    let mut total_count: i64 = 0;

    for (idx, input) in inputs.iter_mut().enumerate() {
        let tree = load_page_tree(input)?;
        tracing::info!("input {idx} ({}) contributes {} page(s)", input.path.display(), tree.count);
        total_count += tree.count;
        for kid in tree.kids {
            top_kids.insert((idx, kid));
            let target = copier.enqueue(idx, kid);
            all_kid_targets.push(target);
        }
    }

    let mut emitter = TokenEmitter::new(output);
    write_header(&mut emitter, &version, binary_marker)?;
    write_pages_root(&mut emitter, &all_kid_targets, total_count)?;

    drain_copy_queue(&mut inputs, &mut copier, &top_kids, catalog_num, &mut emitter)?;

    // Pull-trailer dance: copy the first input's trailer dictionary into a
    // scratch buffer key by key, so every reference it carries (/Root,
    // /Info, and anything else) renumbers through the same copier state as
    // any other object. This is what discovers and enqueues the catalog
    // if nothing reached it already. Objects this discovers are drained
    // before the real trailer is written.
    let mut trailer_scratch = TokenEmitter::new(Vec::new());
    copy_trailer_dict(&mut inputs[0], 0, trailer_offset, &mut copier, &mut trailer_scratch)?;

    drain_copy_queue(&mut inputs, &mut copier, &top_kids, catalog_num, &mut emitter)?;

    let offsets = emitter.xref_offsets().clone();
    let size = offsets.keys().copied().max().unwrap_or(0) + 1;
    trailer_scratch.emit(&Token::Name("Size".into()))?;
    trailer_scratch.emit(&Token::Number { text: size.to_string(), int_value: Some(size as i64) })?;
    trailer_scratch.emit(&Token::DictClose)?;
    let trailer_bytes = trailer_scratch.into_inner();

    tracing::info!("writing {} object(s), {} total page(s)", size.saturating_sub(1), total_count);
    write_xref_and_trailer(&mut emitter, &offsets, size, &trailer_bytes)?;

    Ok(())
}

/// Drain the copier's FIFO, copying each object's body to `emitter` and
/// letting newly-discovered references enqueue further work. `catalog_num`
/// is the first input's own catalog object number: when it comes up for
/// copying, its `/Pages` entry is redirected to the synthesized root
/// instead of the genuine (and never-copied) top `/Pages` node.
fn drain_copy_queue<W: Write>(
    inputs: &mut [InputState],
    copier: &mut Copier,
    top_kids: &HashSet<(usize, u32)>,
    catalog_num: u32,
    emitter: &mut TokenEmitter<W>,
) -> Result<()> {
    while let Some((idx, src_num, target_num)) = copier.pop() {
        let parent_override = if top_kids.contains(&(idx, src_num)) { Some(PAGES_ROOT) } else { None };
        let pages_override = if idx == 0 && src_num == catalog_num { Some(PAGES_ROOT) } else { None };
        copy_object(&mut inputs[idx], idx, src_num, target_num, copier, emitter, parent_override, pages_override)?;
    }
    Ok(())
}

/// Compare two paths for the output-matches-input guard: pdfcat refuses
/// to clobber one of its own inputs.
pub fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}
