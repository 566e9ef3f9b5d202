//! Binary entry point for the `countmin` command-line tool.

use clap::Parser;

use countmin::cli::args::Cli;
use countmin::cli::run::run;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
