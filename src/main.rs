use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

use highlight_clipper::output::{self, ErrorDocument};
use highlight_clipper::{
    capture, utils, Cli, Commands, Config, CutPolicy, MediaPayload, Pipeline, PipelineError, PipelineOutcome, Stage,
};

const DEFAULT_OUTPUT_DIR: &str = "shorts";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut config = Config::load().await?;

    match cli.command {
        Commands::Process {
            input,
            output_dir,
            json,
            content_type,
            best_effort,
            concurrency,
        } => {
            // Missing engines surface as stage errors; warn early anyway
            let missing_deps =
                utils::check_dependencies(&config.transcoder.ffmpeg_path, &config.transcoder.ffprobe_path).await;
            if !missing_deps.is_empty() {
                eprintln!("⚠️  Dependency check warnings:");
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
            }

            if best_effort {
                config.pipeline.cut_policy = CutPolicy::BestEffort;
            }
            if let Some(n) = concurrency {
                config.pipeline.max_concurrent_cuts = n as usize;
            }
            config.validate()?;

            let payload = match read_input(&input, content_type.as_deref(), config.pipeline.max_upload_bytes).await {
                Ok(payload) => payload,
                Err(document) => fail(&document),
            };

            let pipeline = Pipeline::from_config(&config)?;
            let progress = spinner(cli.quiet);
            let started = Instant::now();

            let result = tokio::select! {
                result = pipeline.run(&payload) => result,
                _ = tokio::signal::ctrl_c() => {
                    progress.finish_and_clear();
                    tracing::warn!("Interrupted, abandoning run");
                    std::process::exit(130);
                }
            };
            progress.finish_and_clear();

            match result {
                Ok(outcome) => {
                    write_outcome(&outcome, output_dir, json.as_deref()).await?;
                    if !cli.quiet {
                        eprintln!(
                            "{} {} clip(s) in {}",
                            style("Done:").green().bold(),
                            outcome.clips.len(),
                            utils::format_elapsed(started.elapsed())
                        );
                        for failure in &outcome.failures {
                            eprintln!("  {} {}: {}", style("skipped").yellow(), failure.range, failure.error);
                        }
                    }
                }
                Err(error) => fail(&ErrorDocument::from(&error)),
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                println!("Configuration file: {}", Config::config_path()?.display());
                println!("Set {} or oracle.api_key before processing videos.", highlight_clipper::config::API_KEY_ENV);
            }
        }
        Commands::Check => {
            let missing =
                utils::check_dependencies(&config.transcoder.ffmpeg_path, &config.transcoder.ffprobe_path).await;
            if missing.is_empty() {
                println!("{} ffmpeg and ffprobe are available", style("✓").green());
            } else {
                for dep in &missing {
                    println!("{} {}", style("✗").red(), dep);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "highlight_clipper=debug" } else { "highlight_clipper=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    // stdout is reserved for the JSON document
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).with(filter).init();
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.set_message("Finding highlights...");
    progress.enable_steady_tick(Duration::from_millis(120));
    progress
}

/// Read the upload from a file or stdin, refusing anything over `max_bytes`
async fn read_input(input: &str, content_type: Option<&str>, max_bytes: u64) -> Result<MediaPayload, ErrorDocument> {
    let too_large = |size: u64| ErrorDocument {
        error: format!(
            "Upload of {} exceeds the {} limit",
            utils::format_file_size(size),
            utils::format_file_size(max_bytes)
        ),
        stage: Stage::Upload,
    };
    // One byte past the limit is enough to tell an oversized stream apart
    let read_limit = max_bytes.saturating_add(1);

    let captured = if input == "-" {
        capture(tokio::io::stdin().take(read_limit), content_type).await
    } else {
        let path = Path::new(input);
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| upload_error(PipelineError::NoDataReceived, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| upload_error(PipelineError::NoDataReceived, e))?
            .len();
        if size > max_bytes {
            return Err(too_large(size));
        }

        let declared = content_type.or_else(|| utils::guess_content_type(path));
        capture(file.take(read_limit), declared).await
    };
    let payload = captured.map_err(|e| ErrorDocument::from(&e))?;

    if payload.len() as u64 > max_bytes {
        return Err(too_large(payload.len() as u64));
    }
    Ok(payload)
}

fn upload_error(error: PipelineError, cause: std::io::Error) -> ErrorDocument {
    ErrorDocument {
        error: format!("{}: {}", error, cause),
        stage: error.stage(),
    }
}

async fn write_outcome(outcome: &PipelineOutcome, output_dir: Option<PathBuf>, json: Option<&str>) -> Result<()> {
    let output_dir = match (output_dir, json) {
        (None, None) => Some(PathBuf::from(DEFAULT_OUTPUT_DIR)),
        (dir, _) => dir,
    };

    if let Some(dir) = output_dir {
        let paths = output::save_clips(outcome, &dir)
            .await
            .with_context(|| format!("Failed to write clips to {}", dir.display()))?;
        for path in paths {
            eprintln!("Clip saved to: {}", path.display());
        }
    }

    match json {
        Some("-") => output::print_json(outcome)?,
        Some(path) => {
            output::save_json(outcome, Path::new(path)).await?;
            eprintln!("Clip document saved to: {}", path);
        }
        None => {}
    }

    Ok(())
}

/// Report a failed run as `{"error", "stage"}` on stderr and exit non-zero
fn fail(document: &ErrorDocument) -> ! {
    match serde_json::to_string(document) {
        Ok(json) => eprintln!("{}", json),
        Err(_) => eprintln!("{}", document.error),
    }
    std::process::exit(1);
}
