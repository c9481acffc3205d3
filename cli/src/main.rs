//! Trellis CLI - whitelist compiler driver
//!
//! # Usage
//!
//! ```bash
//! # Compile the whitelist for the current directory
//! trellis build
//!
//! # Compile an explicit source root with resolution traces
//! trellis build apps/web --verbose
//! ```

use clap::Parser;
use std::path::PathBuf;
use trellis_compiler::{BuildOptions, Compiler};

mod args;
mod logging;

use args::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            // Use Display formatting so users see the message, not the enum.
            eprintln!("Error: {}", e);
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> trellis_compiler::Result<i32> {
    match cli.command {
        Commands::Build { src, out } => {
            let root = src.unwrap_or_else(|| PathBuf::from("."));
            let report = Compiler::new().build(&root, &BuildOptions { out })?;

            println!(
                "Compiled {} call site(s) into {} whitelist entr{} -> {}",
                report.resolved_sites,
                report.whitelist.len(),
                if report.whitelist.len() == 1 { "y" } else { "ies" },
                report.output_path.display()
            );

            if report.is_complete() {
                Ok(0)
            } else {
                eprintln!(
                    "{} call site(s) could not be resolved; the whitelist is incomplete",
                    report.unresolved_sites
                );
                Ok(1)
            }
        }
    }
}
