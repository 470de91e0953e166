//! CLI command definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

#[derive(Parser)]
#[command(name = "ragserve")]
#[command(about = "Retrieval-augmented generation server and query tool")]
#[command(version)]
pub struct Cli {
    /// Enable verbose debug logging (default: info level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: ./config.toml when present)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Bind host (overrides server.host)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Disable CORS
        #[arg(long)]
        no_cors: bool,
    },
    /// Ask a question through the full pipeline
    Ask {
        /// The question
        question: String,
        /// Workspace (default: pipeline.default_workspace)
        #[arg(short, long)]
        workspace: Option<String>,
        /// Number of source documents
        #[arg(short, long)]
        k: Option<usize>,
        /// Model override
        #[arg(short, long)]
        model: Option<String>,
        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
        /// Maximum tokens to generate
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Print tokens as they are generated
        #[arg(short, long)]
        stream: bool,
        /// Skip the semantic cache
        #[arg(long)]
        no_cache: bool,
        /// Skip reranking
        #[arg(long)]
        no_rerank: bool,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search documents without generating an answer
    Search {
        /// Search query
        query: String,
        /// Maximum number of results
        #[arg(short, long, default_value = "5")]
        k: usize,
        /// Retrieval method
        #[arg(long, value_enum, default_value = "hybrid")]
        method: SearchMode,
    },
    /// Rebuild the keyword corpus from the index
    Reload,
    /// Semantic cache commands
    #[command(subcommand)]
    Cache(CacheCommands),
    /// Check every backend the pipeline depends on
    Health,
    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache entry counts and hit rates
    Stats {
        #[arg(short, long)]
        workspace: Option<String>,
    },
    /// Remove one cached query, or every entry of a workspace
    Invalidate {
        #[arg(short, long)]
        workspace: Option<String>,
        /// Only this query
        #[arg(short, long)]
        query: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchMode {
    Hybrid,
    Semantic,
    Bm25,
}
