use clap::{ArgAction, Parser, Subcommand};

/// Tools for inspecting and repacking node save files
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Arg {
    #[arg(long, global = true)]
    /// Largest decompressed size of one chunk when saving
    pub chunk_size: Option<usize>,
    #[arg(short = 'l', long, global = true)]
    /// LZ4 high compression level. The default LZ4 mode is used when absent
    pub compression_level: Option<i32>,
    #[arg(short = 'j', long, global = true)]
    /// Worker threads for chunk compression. Defaults to the number of CPUs
    pub workers: Option<usize>,
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    /// Keep every node as raw bytes instead of using the bundled codecs
    pub opaque_only: bool,
    #[arg(global = true, action = ArgAction::SetTrue, short, long)]
    /// Print backtrace on error
    pub backtrace: bool,
    #[command(subcommand)]
    /// Command
    pub command: Command,
}

#[derive(Subcommand, Debug)]
/// Commands
pub enum Command {
    /// Print the header, chunk table and node tree
    Info {
        /// Input save file or directory
        input: String,
        #[arg(long, action = ArgAction::SetTrue)]
        /// Print the structure as JSON
        json: bool,
    },
    /// Load a save and write it back
    Repack {
        /// Input save file or directory
        input: String,
        /// Output file or directory
        output: String,
        #[arg(long, action = ArgAction::SetTrue)]
        /// Reload the output and compare its node structure
        verify: bool,
    },
    /// Write the decompressed body image
    Decompress {
        /// Input save file or directory
        input: String,
        /// Output file or directory
        output: String,
    },
}

pub fn parse_args() -> Arg {
    Arg::parse()
}
