use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::search::SearchMode;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Enable debug-level logging.
    #[clap(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    /// YAML config file. Created with defaults if it does not exist.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct EmbeddingArgs {
    /// Embedding model name
    #[clap(long)]
    pub model: Option<String>,

    /// Use the embedding server at this url instead of a local model
    #[clap(long)]
    pub embed_endpoint: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert CSV files to search-engine JSON feeds.
    ///
    /// Each FILE.csv is written to FILE.json. Descriptions already seen in this
    /// run, in any file, are skipped.
    Convert {
        /// One or more CSV files to convert
        #[clap(required = true)]
        csv_files: Vec<PathBuf>,

        /// Strings per embedding request
        #[clap(long)]
        batch_size: Option<usize>,

        /// Document id prefix
        #[clap(long)]
        namespace: Option<String>,

        /// Convert files concurrently
        #[clap(long, default_value = "false")]
        parallel: bool,

        #[clap(flatten)]
        embedding: EmbeddingArgs,
    },

    /// Serve embeddings over HTTP.
    Serve {
        #[clap(long)]
        host: Option<String>,

        #[clap(short, long)]
        port: Option<u16>,

        /// Embedding model name
        #[clap(long)]
        model: Option<String>,
    },

    /// Query the search engine.
    Search {
        /// Dish, mood or wine style to look for
        query: String,

        #[clap(short, long, value_enum, default_value = "vector")]
        mode: SearchMode,

        /// Number of hits to return
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Search engine url
        #[clap(long)]
        search_endpoint: Option<String>,

        /// Embedding server that vectorizes the query
        #[clap(long)]
        embed_endpoint: Option<String>,

        /// Model key expected in the embedding server's answer
        #[clap(long)]
        model: Option<String>,
    },
}
