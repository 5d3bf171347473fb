use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Refine a bilingual subtitle file
    Refine {
        /// Input .ass subtitle file
        #[arg(short, long)]
        input: PathBuf,

        /// Output .ass subtitle file
        #[arg(short, long)]
        output: PathBuf,

        /// Use the streaming API (overrides config)
        #[arg(long, overrides_with = "no_streaming")]
        streaming: bool,

        /// Disable the streaming API (overrides config)
        #[arg(long)]
        no_streaming: bool,

        /// Main model name (overrides config)
        #[arg(long)]
        model: Option<String>,

        /// Process only the first 10 pairs for testing
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of chunks to process
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Memory token limit (overrides config)
        #[arg(long)]
        memory_limit: Option<usize>,

        /// Subtitle pairs per chunk (overrides token-based chunking)
        #[arg(long)]
        pairs_per_chunk: Option<usize>,

        /// Resume processing from a specific pair index
        #[arg(long, value_name = "INDEX")]
        resume: Option<usize>,

        /// Save/load the learned glossary next to the input file
        #[arg(long)]
        checkpoint: bool,

        /// Write the output file after each chunk (overrides config)
        #[arg(long, overrides_with = "no_incremental_output")]
        incremental_output: bool,

        /// Write the output file only once at the end (overrides config)
        #[arg(long)]
        no_incremental_output: bool,
    },

    /// Refine all .ass files in a directory
    Batch {
        /// Input directory containing .ass files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Output directory for refined files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Save/load learned glossaries next to each input file
        #[arg(long)]
        checkpoint: bool,
    },

    /// Generate request prompts to a Markdown file without calling the API
    Prompts {
        /// Input .ass subtitle file
        #[arg(short, long)]
        input: PathBuf,

        /// Output markdown file (default: <input stem>_prompts.md)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Subtitle pairs per chunk
        #[arg(long)]
        pairs_per_chunk: Option<usize>,

        /// Maximum number of chunks to generate
        #[arg(long)]
        max_chunks: Option<usize>,
    },

    /// Test the API connection and exit
    TestConnection,
}
