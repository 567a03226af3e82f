//! Command-line front end for pdfcat: argument parsing, logging setup, and
//! translation of [`pdfcat_core::PdfCatError`] into the documented exit
//! codes. Kept separate from `main.rs` so integration tests can call
//! [`run`] directly without spawning a subprocess.

use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use pdfcat_core::{concat, PdfCatError};

/// `pdfcat -o <OUTPUT> <INPUT>...`
#[derive(Parser, Debug)]
#[command(name = "pdfcat")]
#[command(about = "Concatenate PDF files into a single output file")]
pub struct Cli {
    /// Output file path.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Input files to concatenate, in order. The same path may be listed
    /// more than once.
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("may not append to existing PDF: {0}")]
    OutputMatchesInput(PathBuf),

    #[error("error: cannot open output {path}: {source}")]
    OutputOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] PdfCatError),
}

impl CliError {
    /// Exit code per the command-line contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            CliError::OutputMatchesInput(_) => 4,
            CliError::OutputOpen { .. } => 5,
            CliError::Core(e) => e.exit_code(),
        }
    }
}

/// Install a `tracing-subscriber` `fmt` subscriber whose level follows the
/// repeat count of `-v`: none is `warn`, one `info`, two `debug`, three or
/// more `trace`.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Run the tool: validate the output-vs-input guard, open the output
/// file, and delegate to [`pdfcat_core::concat`].
pub fn run(cli: &Cli) -> Result<(), CliError> {
    for input in &cli.inputs {
        if pdfcat_core::concat::same_path(&cli.output, input) {
            return Err(CliError::OutputMatchesInput(cli.output.clone()));
        }
    }

    let file = File::create(&cli.output)
        .map_err(|source| CliError::OutputOpen { path: cli.output.clone(), source })?;

    concat(&cli.inputs, file)?;

    tracing::info!(
        "wrote {} from {} input file(s)",
        cli.output.display(),
        cli.inputs.len()
    );
    Ok(())
}
