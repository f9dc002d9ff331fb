use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capburn::burn::{self, BurnPipeline, BurnRequest, LambdaJobTransport};
use capburn::cli::{CaptionFormat, Cli, Commands};
use capburn::config::Config;
use capburn::signing::LambdaInvoker;
use capburn::storage::RestObjectStore;
use capburn::subtitle::{self, SubtitleTrack};
use capburn::upload::UploadCoordinator;
use capburn::utils::{self, format_duration, format_file_size};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "capburn=debug"
    } else {
        "capburn=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().await?;

    match cli.command {
        Commands::Upload { file } => {
            run_upload(&config, &file, cli.quiet).await?;
        }
        Commands::Burn {
            video_url,
            subtitles,
            style,
            output,
        } => {
            run_burn(&config, video_url, &subtitles, style, output, cli.quiet).await?;
        }
        Commands::Convert {
            file,
            format,
            output,
        } => {
            run_convert(&file, format, output)?;
        }
        Commands::Cues { file, at } => {
            run_cues(&file, at)?;
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                println!("Edit the config file to change settings:");
                config.display();
            }
        }
    }

    Ok(())
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap(),
    );
    bar
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    spinner
}

async fn run_upload(config: &Config, file: &Path, quiet: bool) -> Result<()> {
    config.validate()?;

    let bytes = fs_err::read(file)?;
    let size_bytes = bytes.len() as u64;
    let file_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .context("File has no usable name")?;

    tracing::info!("uploading {} ({})", file.display(), format_file_size(size_bytes));

    let store = Arc::new(RestObjectStore::new(
        config.storage.endpoint.clone(),
        config.storage.bucket.clone(),
    ));
    let coordinator = UploadCoordinator::new(store, config.storage.owner_id.clone());

    let bar = progress_bar(quiet);
    bar.set_message(format!("Uploading {}", file_name));

    let mut progress = coordinator.progress();
    let bar_task = tokio::spawn({
        let bar = bar.clone();
        async move {
            while progress.changed().await.is_ok() {
                let percent = *progress.borrow();
                bar.set_position(percent as u64);
            }
        }
    });

    let result = coordinator.upload(file_name, bytes).await;
    bar_task.abort();

    match result {
        Ok(outcome) => {
            bar.finish_with_message("Upload complete");
            println!("Uploaded {} ({})", file.display(), format_file_size(size_bytes));
            println!("  Key: {}", outcome.object_key);
            println!("  URL: {}", outcome.public_url);
            Ok(())
        }
        Err(err) => {
            bar.finish_and_clear();
            Err(err.into())
        }
    }
}

async fn run_burn(
    config: &Config,
    video_url: String,
    subtitles: &Path,
    style: Option<String>,
    output: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    config.validate()?;

    let video_url = utils::validate_and_normalize_url(&video_url)?;

    let srt = fs_err::read_to_string(subtitles)?;
    let track = SubtitleTrack::parse(&srt);
    anyhow::ensure!(
        !track.is_empty(),
        "No usable cues found in {}",
        subtitles.display()
    );
    if track.skipped_blocks() > 0 {
        tracing::warn!(
            "{} malformed cue block(s) skipped in {}",
            track.skipped_blocks(),
            subtitles.display()
        );
    }

    let invoker = LambdaInvoker::new(
        config.credentials(),
        config.signing.region.clone(),
        config.lambda_host(),
    );
    let transport = LambdaJobTransport::new(invoker, config.burn.function_name.clone());
    let pipeline = BurnPipeline::new(Arc::new(transport));

    let request = BurnRequest {
        video_path: video_url,
        subtitles: track.to_srt(),
        style_prompt: style
            .or_else(|| config.burn.default_style.clone())
            .unwrap_or_default(),
    };

    let spinner = spinner(quiet);
    spinner.set_message("Submitting burn job...");

    let result_url = pipeline
        .run(&request, |job| {
            let elapsed = job.started_at.elapsed().as_secs_f64();
            let percent = burn::estimated_progress(elapsed);
            spinner.set_message(format!(
                "Burning captions: {} (~{:.0}%, {} elapsed, check #{})",
                job.status_label,
                percent,
                format_duration(elapsed),
                job.attempts_used
            ));
        })
        .await;

    match result_url {
        Ok(url) => {
            spinner.finish_with_message("Burn complete");
            println!("Finished video: {}", url);

            if let Some(path) = output {
                let written = burn::download_result(&url, &path).await?;
                println!("Saved to {} ({})", path.display(), format_file_size(written));
            }
            Ok(())
        }
        Err(err) => {
            spinner.finish_and_clear();
            Err(err.into())
        }
    }
}

fn run_convert(file: &Path, format: CaptionFormat, output: Option<PathBuf>) -> Result<()> {
    let text = fs_err::read_to_string(file)?;

    let converted = match format {
        CaptionFormat::Vtt => subtitle::webvtt_from_srt(&text),
        CaptionFormat::Srt => {
            let track = SubtitleTrack::parse(&text);
            if track.skipped_blocks() > 0 {
                tracing::warn!("{} malformed cue block(s) skipped", track.skipped_blocks());
            }
            track.to_srt()
        }
    };

    match output {
        Some(path) => {
            fs_err::write(&path, converted)?;
            println!("Converted {} to {} ({})", file.display(), format, path.display());
        }
        None => print!("{}", converted),
    }

    Ok(())
}

fn run_cues(file: &Path, at: Option<f64>) -> Result<()> {
    let text = fs_err::read_to_string(file)?;
    let track = SubtitleTrack::parse(&text);

    if track.skipped_blocks() > 0 {
        println!(
            "Warning: {} malformed cue block(s) skipped",
            track.skipped_blocks()
        );
    }

    match at {
        Some(time) => match subtitle::active_cue_index(track.cues(), time) {
            Some(index) => {
                let cue = &track.cues()[index];
                println!(
                    "#{} {} --> {}",
                    index + 1,
                    subtitle::format_timestamp(cue.start_seconds, ','),
                    subtitle::format_timestamp(cue.end_seconds, ','),
                );
                println!("{}", cue.text);
            }
            None => println!("No cue active at {:.3}s", time),
        },
        None => {
            for (i, cue) in track.cues().iter().enumerate() {
                println!(
                    "#{} {} --> {}  {}",
                    i + 1,
                    subtitle::format_timestamp(cue.start_seconds, ','),
                    subtitle::format_timestamp(cue.end_seconds, ','),
                    cue.text.replace('\n', " / ")
                );
            }
            println!("{} cue(s)", track.len());
        }
    }

    Ok(())
}
