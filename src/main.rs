//! Subrefine - Iterative Bilingual Subtitle Refinement
//!
//! Main entry point. Sends batches of bilingual subtitle pairs to an
//! OpenAI-compatible chat API and writes the refined subtitle file back,
//! with resumable, checkpointed progress.

use anyhow::Result;
use clap::Parser;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use subrefine::cli::{Args, Commands};
use subrefine::config::Config;
use subrefine::llm::{ClientFactory, test_connection};
use subrefine::workflow::{self, RefineWorkflow, RunOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    // Load configuration: explicit path, else config.toml, else defaults
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Refine {
            input,
            output,
            streaming,
            no_streaming,
            model,
            dry_run,
            max_chunks,
            memory_limit,
            pairs_per_chunk,
            resume,
            checkpoint,
            incremental_output,
            no_incremental_output,
        } => {
            if let Some(model) = model {
                config.main_model.name = model;
            }
            if streaming {
                config.refine.use_streaming = true;
            } else if no_streaming {
                config.refine.use_streaming = false;
            }
            if incremental_output {
                config.refine.incremental_output = true;
            } else if no_incremental_output {
                config.refine.incremental_output = false;
            }
            if dry_run {
                config.refine.dry_run = true;
            }
            if max_chunks.is_some() {
                config.refine.max_chunks = max_chunks;
            }
            if let Some(limit) = memory_limit {
                config.refine.memory_token_limit = limit;
            }
            if pairs_per_chunk.is_some() {
                config.refine.pairs_per_chunk = pairs_per_chunk;
            }

            let workflow = RefineWorkflow::new(config)?;
            let options = RunOptions {
                resume_index: resume,
                enable_checkpoint: checkpoint,
            };
            workflow.refine_file(&input, &output, &options).await?;
        }
        Commands::Batch {
            input_dir,
            output_dir,
            checkpoint,
        } => {
            info!("Refining directory: {}", input_dir.display());
            let workflow = RefineWorkflow::new(config)?;
            let options = RunOptions {
                resume_index: None,
                enable_checkpoint: checkpoint,
            };
            workflow
                .refine_directory(input_dir, output_dir, &options)
                .await?;
        }
        Commands::Prompts {
            input,
            output,
            pairs_per_chunk,
            max_chunks,
        } => {
            if pairs_per_chunk.is_some() {
                config.refine.pairs_per_chunk = pairs_per_chunk;
            }
            if max_chunks.is_some() {
                config.refine.max_chunks = max_chunks;
            }

            let output = output.unwrap_or_else(|| {
                let stem = input
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "request".to_string());
                std::path::PathBuf::from(format!("{}_prompts.md", stem))
            });

            workflow::generate_prompts(&config, &input, &output).await?;
        }
        Commands::TestConnection => {
            println!("Testing API connection...");
            let client = ClientFactory::create(&config.api, &config.main_model)?;
            if test_connection(client.as_ref()).await {
                println!("API connection successful");
            } else {
                anyhow::bail!("API connection failed");
            }
        }
    }

    info!("Done");
    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".subrefine").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation; the guard must outlive the program
    let file_appender = rolling::daily(&log_dir, "subrefine.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer().with_target(false);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
