//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "folio",
    version,
    about = "Ask questions about one document, answered from the document",
    long_about = "Folio keeps a single document in a local daemon and answers questions about it. \
                  A language model decides when to search the document; searches combine keyword \
                  and semantic matching, and answers stream back as NDJSON events."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/folio/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground
    Serve,

    /// Replace the active document with chunks from a JSON Lines file
    Ingest {
        /// File with one `{text, page, source, file_hash}` object per line ("-" for stdin)
        chunks: PathBuf,
    },

    /// Ask a question about the active document
    Ask {
        /// Question to ask
        question: String,

        /// JSON file holding earlier turns of the conversation
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,

        /// Chat model to use instead of the configured one
        #[arg(short, long)]
        model: Option<String>,

        /// Print the answer as text instead of NDJSON events
        #[arg(long)]
        text: bool,
    },

    /// Run hybrid retrieval without the language model
    Search {
        /// Search query text
        query: String,

        /// Number of passages to return
        #[arg(short, long)]
        k: Option<usize>,

        /// Weight of the semantic ranking (0.0 keyword only, 1.0 semantic only)
        #[arg(long)]
        vector_weight: Option<f32>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Describe the active document
    Info,

    /// Drop the active document
    Clear,

    /// Show daemon status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
