use clap::Parser;

use pdfcat_cli::{init_logging, run, Cli};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("pdfcat: {err}");
        std::process::exit(err.exit_code());
    }
}
