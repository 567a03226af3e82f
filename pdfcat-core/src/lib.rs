pub mod concat;
pub mod copier;
pub mod error;
pub mod input;
pub mod objects;
pub mod pages;
pub mod token;
pub mod writer;
pub mod xref;

pub use concat::concat;
pub use error::{PdfCatError, Result};
pub use input::InputState;
