//! Clipweave CLI - headless export of clipweave projects.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};

use clipweave_lib::core::{
    captions::{write_srt, CaptionCueBuilder, CaptionMode},
    ffmpeg::{detect_ffmpeg, FFmpegRunner},
    jobs::ExportService,
    media::MediaSource,
    project::Project,
    render::check_media_references,
    settings::{default_settings_dir, EngineSettings, SettingsManager},
    CoreError,
};

/// Command-line arguments for the clipweave tool.
#[derive(Parser, Debug)]
#[command(name = "clipweave-cli")]
#[command(version)]
#[command(about = "Render clipweave projects with synchronized captions")]
#[command(long_about = "Renders a clipweave project (timeline, media and export settings) \n\
    into a single video, optionally transcribing speech into burned-in captions.\n\n\
    EXAMPLES:\n    \
    clipweave-cli export talk.json talk.mp4\n    \
    clipweave-cli export talk.json talk.mp4 --no-captions --json\n    \
    clipweave-cli validate talk.json\n    \
    clipweave-cli captions interview.wav interview.srt --mode word")]
struct Args {
    /// Settings file (defaults to the per-user settings)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a project to a video file
    Export {
        /// Project file
        project: PathBuf,
        /// Output video path
        output: PathBuf,
        /// Skip automatic caption generation
        #[arg(long)]
        no_captions: bool,
        /// Emit progress and the final report as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Check a project and list every problem found
    Validate {
        /// Project file
        project: PathBuf,
    },
    /// Transcribe an audio file into an SRT file
    Captions {
        /// Audio or video file with speech
        audio: PathBuf,
        /// Output SRT path
        output: PathBuf,
        /// Cue grouping (word, phrase)
        #[arg(long, default_value = "phrase")]
        mode: CaptionMode,
        /// Spoken language hint (e.g. en)
        #[arg(long)]
        language: Option<String>,
    },
}

/// JSON line printed for each progress update.
#[derive(Debug, Serialize)]
struct JsonLine<'a, T: Serialize> {
    #[serde(rename = "type")]
    msg_type: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

fn print_json<T: Serialize>(msg_type: &str, body: &T) {
    match serde_json::to_string(&JsonLine { msg_type, body }) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to serialize {} output: {}", msg_type, e),
    }
}

fn load_settings(path: Option<&Path>) -> EngineSettings {
    let manager = match path {
        Some(path) => SettingsManager::at_path(path.to_path_buf()),
        None => SettingsManager::new(default_settings_dir()),
    };
    debug!(path = %manager.settings_path().display(), "Loading settings");
    manager.load()
}

#[tokio::main]
async fn main() -> ExitCode {
    clipweave_lib::init_logging(None);
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let settings = load_settings(args.settings.as_deref());

    match args.command {
        Command::Export {
            project,
            output,
            no_captions,
            json,
        } => export(&settings, &project, output, no_captions, json).await,
        Command::Validate { project } => validate(&project),
        Command::Captions {
            audio,
            output,
            mode,
            language,
        } => captions(&settings, &audio, &output, mode, language).await,
    }
}

async fn export(
    settings: &EngineSettings,
    project_path: &Path,
    output: PathBuf,
    no_captions: bool,
    json: bool,
) -> Result<ExitCode> {
    let mut project = Project::load(project_path)
        .with_context(|| format!("Failed to load project {}", project_path.display()))?;
    if no_captions {
        project.export.auto_captions = false;
    }
    if project.export.language.is_none() {
        project.export.language = settings.transcription.language.clone();
    }

    let pipeline = settings
        .build_pipeline()
        .context("Failed to set up the export pipeline")?;
    let service = ExportService::new(pipeline, settings.service_config());

    let mut handle = service.spawn_export(project.export_request(output));
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling export...");
            cancel.cancel();
        }
    });

    let printer = handle.take_progress().map(|mut progress| {
        tokio::spawn(async move {
            while let Some(update) = progress.recv().await {
                if json {
                    print_json("progress", &update);
                } else {
                    eprint!("\r[{:<10}] {:5.1}%", update.stage_label(), update.percent);
                }
            }
            if !json {
                eprintln!();
            }
        })
    });

    let result = handle.join().await;
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    match result {
        Ok(report) => {
            if json {
                print_json("complete", &report);
            } else {
                println!("Exported {}", report.output_path.display());
                println!("  duration:  {:.2}s", report.duration_sec);
                println!("  captions:  {}", report.caption_count);
                if let Some(srt) = &report.subtitle_path {
                    println!("  subtitles: {}", srt.display());
                }
                for warning in &report.warnings {
                    println!("  warning:   {} ({})", warning.reason, warning.stage);
                }
                println!("  took:      {:.1}s", report.encoding_time_sec);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(CoreError::Cancelled) => {
            if json {
                print_json("cancelled", &serde_json::json!({}));
            } else {
                eprintln!("Export cancelled");
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            if json {
                print_json("failed", &serde_json::json!({ "error": e.to_string() }));
                Ok(ExitCode::FAILURE)
            } else {
                Err(e).context("Export failed")
            }
        }
    }
}

fn validate(project_path: &Path) -> Result<ExitCode> {
    let project = Project::load(project_path)
        .with_context(|| format!("Failed to load project {}", project_path.display()))?;

    let mut problems: Vec<String> = project
        .timeline
        .violations()
        .iter()
        .map(ToString::to_string)
        .collect();
    if let Err(e) = project.export.validate() {
        problems.push(e.to_string());
    }
    if let Err(e) = check_media_references(&project.timeline, &project.library()) {
        problems.push(e.to_string());
    }

    if problems.is_empty() {
        println!(
            "{}: ok ({} items, {:.2}s)",
            project.name,
            project.timeline.item_count(),
            project.timeline.duration()
        );
        return Ok(ExitCode::SUCCESS);
    }

    for problem in &problems {
        println!("{}", problem);
    }
    println!("{}: {} problem(s)", project.name, problems.len());
    Ok(ExitCode::FAILURE)
}

async fn captions(
    settings: &EngineSettings,
    audio: &Path,
    output: &Path,
    mode: CaptionMode,
    language: Option<String>,
) -> Result<ExitCode> {
    MediaSource::resolve("speech", audio)
        .with_context(|| format!("Cannot read {}", audio.display()))?;

    let ffmpeg = match detect_ffmpeg(settings.render.ffmpeg_path.as_deref()) {
        Ok(info) => Some(FFmpegRunner::new(info)),
        Err(e) => {
            warn!("FFmpeg unavailable, only WAV input can be transcribed: {}", e);
            None
        }
    };
    let adapter = settings
        .transcription_adapter(ffmpeg)
        .context("Failed to set up transcription")?;

    let language = language.or_else(|| settings.transcription.language.clone());
    let outcome = adapter.transcribe(audio, language.as_deref()).await;
    for warning in outcome.warnings() {
        eprintln!("warning: {}: {}", warning.backend, warning.reason);
    }
    let Some(transcript) = outcome.result() else {
        bail!("No transcription backend could process {}", audio.display());
    };

    let builder = match &settings.captions.policy {
        Some(policy) if settings.captions.mode == mode => {
            CaptionCueBuilder::new(mode, policy.clone(), settings.captions.style.clone())
        }
        _ => CaptionCueBuilder::for_mode(mode),
    };
    let cues = builder.build_cues(transcript)?;
    write_srt(output, &cues).with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Wrote {} cues to {}", cues.len(), output.display());
    Ok(ExitCode::SUCCESS)
}
