use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod coerce;
mod config;
mod dedup;
mod embeddings;
mod fingerprint;
mod normalize;
mod pipeline;
mod record;
mod run;
mod search;
mod server;

use cli::EmbeddingArgs;
use config::{Config, EmbeddingBackend};
use run::{Runner, SourceOutcome};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_embedding_args(config: &mut Config, args: EmbeddingArgs) {
    if let Some(model) = args.model {
        config.embedding.model = model;
    }
    if let Some(endpoint) = args.embed_endpoint {
        config.embedding.endpoint = endpoint;
        config.embedding.backend = EmbeddingBackend::Remote;
    }
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose);

    let mut config = Config::load(args.config.as_deref())?;

    match args.command {
        cli::Command::Convert {
            csv_files,
            batch_size,
            namespace,
            parallel,
            embedding,
        } => {
            if let Some(batch_size) = batch_size {
                config.pipeline.batch_size = batch_size;
            }
            if let Some(namespace) = namespace {
                config.pipeline.namespace = namespace;
            }
            config.pipeline.parallel_sources |= parallel;
            apply_embedding_args(&mut config, embedding);
            config.validate()?;

            let embedder = embeddings::from_config(&config.embedding)?;
            let pipeline = pipeline::Pipeline::new(config.pipeline.clone(), embedder);
            let runner = Runner::new(&pipeline);
            let report = runner.run(&csv_files);

            for source in &report.sources {
                match &source.outcome {
                    SourceOutcome::Converted { output, stats } => println!(
                        "{} -> {} ({} records, {} duplicates, {} embed failures)",
                        source.input.display(),
                        output.display(),
                        stats.produced,
                        stats.duplicates,
                        stats.embed_failed
                    ),
                    SourceOutcome::Failed(err) => {
                        println!("{} failed: {}", source.input.display(), err)
                    }
                }
            }

            let totals = report.totals();
            log::info!(
                "{} rows read, {} records written, {} duplicates skipped, {} unique keys",
                totals.rows,
                totals.produced,
                totals.duplicates,
                runner.seen().len()
            );

            let failed = report.failed();
            if failed > 0 {
                bail!("{failed} of {} input files failed", report.sources.len());
            }
            Ok(())
        }

        cli::Command::Serve { host, port, model } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(model) = model {
                config.embedding.model = model;
            }
            config.embedding.backend = EmbeddingBackend::Local;
            config.validate()?;

            let embedder = embeddings::from_config(&config.embedding)?;
            server::start_server(config.server, embedder)
        }

        cli::Command::Search {
            query,
            mode,
            top_k,
            search_endpoint,
            embed_endpoint,
            model,
        } => {
            if let Some(top_k) = top_k {
                config.search.top_k = top_k;
            }
            if let Some(endpoint) = search_endpoint {
                config.search.endpoint = endpoint;
            }
            if let Some(endpoint) = embed_endpoint {
                config.search.embed_endpoint = endpoint;
            }
            if let Some(model) = model {
                config.embedding.model = model;
            }
            config.validate()?;

            let embedder = match mode {
                search::SearchMode::Vector => Some(embeddings::RemoteEmbedder::connect(
                    &config.search.embed_endpoint,
                    &config.embedding.model,
                    Duration::from_secs(config.embedding.timeout_secs),
                )?),
                _ => None,
            };

            let client = search::SearchClient::new(config.search.clone())?;
            let hits = client.search(
                &query,
                mode,
                embedder.as_ref().map(|e| e as &dyn embeddings::Embedder),
            )?;

            if hits.is_empty() {
                log::info!("No matches, sorry. Try a different query.");
            }
            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }
    }
}
