use std::path::PathBuf;

use thiserror::Error;

/// Every fatal condition pdfcat can hit while reading, merging, or writing
/// a PDF. There is no recoverable variant: any of these aborts the run.
#[derive(Error, Debug)]
pub enum PdfCatError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error at {path}: invalid PDF header: {detail}")]
    Header { path: PathBuf, detail: String },

    #[error("error at {path}:{offset}: {detail}")]
    Syntax {
        path: PathBuf,
        offset: u64,
        detail: String,
    },

    #[error("error at {path}:{offset}: {detail}")]
    BadXref {
        path: PathBuf,
        offset: u64,
        detail: String,
    },

    #[error("error at {path}:{offset}: missing required key {key}")]
    MissingRequired {
        path: PathBuf,
        offset: u64,
        key: &'static str,
    },

    #[error("error at {path}:{offset}: expected /Type {expected}, found {found}")]
    TypeMismatch {
        path: PathBuf,
        offset: u64,
        expected: &'static str,
        found: String,
    },

    #[error("error at {path}:{offset}: unsupported feature: {detail}")]
    UnsupportedFeature {
        path: PathBuf,
        offset: u64,
        detail: String,
    },

    #[error("error: output offset overflow: {detail}")]
    Overflow { detail: String },

    #[error("error: out of memory: {detail}")]
    OutOfMemory { detail: String },

    #[error("may not append to existing PDF: {0}")]
    OutputMatchesInput(PathBuf),

    #[error("unseekable file: {0}")]
    Unseekable(PathBuf),

    #[error("invalid input file size for {path}: {size} bytes")]
    InvalidFileSize { path: PathBuf, size: u64 },
}

pub type Result<T> = std::result::Result<T, PdfCatError>;

impl PdfCatError {
    /// Process exit code per the command-line contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            PdfCatError::Usage(_) => 2,
            PdfCatError::Header { .. }
            | PdfCatError::Syntax { .. }
            | PdfCatError::BadXref { .. }
            | PdfCatError::MissingRequired { .. }
            | PdfCatError::TypeMismatch { .. }
            | PdfCatError::UnsupportedFeature { .. }
            | PdfCatError::Io(_) => 3,
            PdfCatError::OutputMatchesInput(_) => 4,
            PdfCatError::Unseekable(_) => 6,
            PdfCatError::InvalidFileSize { .. } => 7,
            PdfCatError::Overflow { .. } | PdfCatError::OutOfMemory { .. } => 3,
        }
    }
}
