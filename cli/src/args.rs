use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Trellis CLI - query whitelist compiler
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile the query whitelist for a Trellis source tree", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show resolution traces and other debug output
    #[arg(long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile the whitelist from a source root
    Build {
        /// Source root containing the front-end's AST dumps (default: current directory)
        src: Option<PathBuf>,

        /// Whitelist output path (default: <src>/trellis.whitelist.json)
        #[arg(long = "out")]
        out: Option<PathBuf>,
    },
}
