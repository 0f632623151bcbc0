use passage_indexer::cli::Cli;
use passage_indexer::config::Settings;
use passage_indexer::embedding::FastEmbedLoader;
use passage_indexer::error::Result;
use passage_indexer::indexing::LocalIndexer;
use passage_indexer::pipeline::{run_pipeline, PipelineOutcome};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(outcome) => {
            tracing::info!(
                "Indexed {} passages ({} embeddings) into {}",
                outcome.summary.num_passages,
                outcome.summary.num_embeddings,
                outcome.summary.index_path.display()
            );
            tracing::info!("DONE!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Indexing failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "passage_indexer=debug"
    } else {
        "passage_indexer=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<PipelineOutcome> {
    let settings = Settings::load_or_default(cli.config.as_deref())?;
    let options = cli.to_options(&settings)?;

    tracing::info!("Running indexing...");
    tracing::debug!("Options: {:?}", options);

    let engine = LocalIndexer::new(Arc::new(FastEmbedLoader))
        .with_batch_size(settings.embedding.batch_size)
        .with_window_tokens(settings.embedding.window_tokens);

    run_pipeline(&options, &engine)
}
