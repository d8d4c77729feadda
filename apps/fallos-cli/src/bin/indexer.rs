use clap::Parser;
use std::path::PathBuf;

/// Build a new index generation; meant for cron jobs and deploy hooks.
#[derive(Parser)]
#[command(name = "fallos-indexer", version)]
struct Args {
    /// Corpus directory (defaults to corpus_dir from the settings)
    corpus: Option<PathBuf>,

    #[arg(long, env = "FALLOS_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Skip the build when the corpus fingerprint is unchanged
    #[arg(long)]
    if_changed: bool,

    /// Hide progress bars
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    fallos_cli::init_tracing(false);
    let settings = fallos_cli::load_settings(&args.config_dir)?;

    match fallos_cli::build(&settings, args.corpus.as_deref(), args.if_changed, !args.quiet).await {
        Ok(Some(summary)) => println!("{}", fallos_cli::render_summary(&summary)),
        Ok(None) => tracing::info!("corpus unchanged; nothing to do"),
        Err(e) => {
            tracing::error!(error = %e, "index build failed");
            return Err(e);
        }
    }
    Ok(())
}
