use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use fallos_core::types::SearchType;

#[derive(Parser)]
#[command(name = "fallos", version, about = "Hybrid retrieval over court ruling paragraphs")]
struct Cli {
    /// Directory holding config.toml; relative paths in it resolve from here
    #[arg(long, env = "FALLOS_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Override the index directory
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build and publish a new index generation
    Build {
        /// Corpus directory (defaults to corpus_dir from the settings)
        corpus: Option<PathBuf>,
        /// Skip the build when the corpus fingerprint is unchanged
        #[arg(long)]
        if_changed: bool,
    },
    /// Search the live index
    Query {
        question: String,
        #[arg(short = 'n', long)]
        top_n: Option<usize>,
        /// dense, hybrid or hybrid_enriched
        #[arg(long)]
        strategy: Option<SearchType>,
        #[arg(long)]
        no_rerank: bool,
        #[arg(long)]
        json: bool,
    },
    /// Exit with status 1 when the corpus changed since the last build
    Check { corpus: Option<PathBuf> },
    /// Show the live generation and its footprint
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    fallos_cli::init_tracing(cli.verbose);
    let mut settings = fallos_cli::load_settings(&cli.config_dir)?;
    if let Some(dir) = cli.index_dir {
        settings.index_dir = dir;
    }

    match cli.command {
        Command::Build { corpus, if_changed } => {
            match fallos_cli::build(&settings, corpus.as_deref(), if_changed, true).await? {
                Some(summary) => println!("{}", fallos_cli::render_summary(&summary)),
                None => println!("corpus unchanged; nothing to do"),
            }
        }
        Command::Query { question, top_n, strategy, no_rerank, json } => {
            if let Some(strategy) = strategy {
                settings.search.strategy = strategy;
            }
            let rerank = no_rerank.then_some(false);
            let hits = fallos_cli::query(&settings, &question, top_n, rerank).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                println!("{}", fallos_cli::render_hits(&hits));
            }
        }
        Command::Check { corpus } => {
            let report = fallos_cli::check(&settings, corpus.as_deref())?;
            if report.changed {
                println!("changed: {}", report.description);
                return Ok(ExitCode::from(1));
            }
            println!("unchanged");
        }
        Command::Status { json } => {
            let status = fallos_cli::status(&settings).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", fallos_cli::render_status(&status));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
