//! Voicebooth CLI: record voice samples and drive the speaker enroll,
//! identify, and merge workflows against the voice-biometrics service.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use voicebooth::audio;
use voicebooth::audio::level::{LevelUpdate, VoiceActivity};
use voicebooth::audio::mic::CpalMicSource;
use voicebooth::config::AppConfig;
use voicebooth::gateway::{
    EnvToken, HttpSpeakerGateway, SpeakerGateway, StaticToken, TokenProvider,
};
use voicebooth::paths::AppPaths;
use voicebooth::{VoiceWorkflow, WorkflowEvent, WorkflowIntent, WorkflowOutcome};

/// Token environment variable consulted before the config file.
const TOKEN_ENV: &str = "VOICEBOOTH_TOKEN";

#[derive(Parser)]
#[command(
    name = "voicebooth",
    about = "Speaker voice capture and biometrics console",
    version
)]
struct Cli {
    /// Path to config.toml (defaults to the OS config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List capture devices
    Devices,
    /// List enrolled speakers
    Speakers,
    /// Check voice service availability
    Status,
    /// Record a sample and enroll it for a speaker
    Enroll {
        speaker_id: i64,
        /// Also save the captured clip as a WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Record a sample and identify the speaker
    Identify {
        /// Also save the captured clip as a WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Reassign all samples from one speaker to another
    Merge { source_id: i64, target_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let paths = AppPaths::new()?;
    paths.ensure_directories()?;
    let config_path = cli.config.unwrap_or_else(|| paths.config_file());
    let config = AppConfig::load_or_create(&config_path)?;

    match cli.command {
        Command::Devices => {
            for device in audio::list_input_devices()? {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("{}{}  [{}]", device.name, marker, device.host);
            }
        }
        Command::Speakers => {
            let gateway = build_gateway(&config)?;
            let speakers = gateway
                .list_speakers()
                .await
                .context("failed to list speakers")?;
            if speakers.is_empty() {
                println!("No enrolled speakers.");
            }
            for speaker in speakers {
                match speaker.sample_count {
                    Some(count) => {
                        println!("{:>6}  {}  ({} samples)", speaker.id, speaker.alias, count)
                    }
                    None => println!("{:>6}  {}", speaker.id, speaker.alias),
                }
            }
        }
        Command::Status => {
            let gateway = build_gateway(&config)?;
            let status = gateway
                .service_status()
                .await
                .context("voice service unreachable")?;
            if status.available {
                println!("Voice service is available.");
            } else {
                match status.detail {
                    Some(detail) => println!("Voice service is unavailable: {detail}"),
                    None => println!("Voice service is unavailable."),
                }
            }
        }
        Command::Enroll { speaker_id, save } => {
            run_capture_round(&config, WorkflowIntent::Enroll { speaker_id }, save).await?;
        }
        Command::Identify { save } => {
            run_capture_round(&config, WorkflowIntent::Identify, save).await?;
        }
        Command::Merge {
            source_id,
            target_id,
        } => {
            let gateway = build_gateway(&config)?;
            let mut workflow = VoiceWorkflow::new(
                WorkflowIntent::MergePrep {
                    source_speaker_id: source_id,
                    target_speaker_id: target_id,
                },
                gateway,
                Box::new(CpalMicSource::new(None)),
                config.level.clone(),
            );
            let merge_err = workflow.merge().await.err();
            report_result(workflow.outcome(), merge_err.map(|e| e.to_string()));
        }
    }

    Ok(())
}

fn build_gateway(config: &AppConfig) -> Result<Arc<dyn SpeakerGateway>> {
    let token: Arc<dyn TokenProvider> = if std::env::var(TOKEN_ENV).is_ok() {
        Arc::new(EnvToken(TOKEN_ENV))
    } else {
        Arc::new(StaticToken(config.backend.auth_token.clone()))
    };

    let gateway = HttpSpeakerGateway::builder(&config.backend.base_url)
        .timeout(Duration::from_secs(config.backend.request_timeout_secs))
        .token(token)
        .build()
        .context("failed to build speaker gateway")?;
    Ok(Arc::new(gateway))
}

/// Record until Enter, then submit the clip for the given intent.
async fn run_capture_round(
    config: &AppConfig,
    intent: WorkflowIntent,
    save: Option<PathBuf>,
) -> Result<()> {
    let gateway = build_gateway(config)?;
    let mic = Box::new(CpalMicSource::new(config.audio.device_name.clone()));
    let mut workflow = VoiceWorkflow::new(intent, gateway, mic, config.level.clone());

    let events = workflow.events();
    let meter = std::thread::spawn(move || {
        for event in events {
            if let WorkflowEvent::Level(update) = event {
                render_meter(update);
            }
        }
    });

    if let Err(err) = workflow.start_recording() {
        println!("Failed: {err}");
        return Ok(());
    }

    println!("Recording... press Enter to stop.");
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    workflow.stop_recording();

    if let Some(path) = &save {
        if let Some(clip) = workflow.clip() {
            clip.save_wav(path)?;
            println!("Saved capture to {}", path.display());
        }
    }

    let submit_err = workflow.submit().await.err();
    report_result(workflow.outcome(), submit_err.map(|e| e.to_string()));

    drop(workflow);
    let _ = meter.join();
    Ok(())
}

fn render_meter(update: LevelUpdate) {
    const WIDTH: usize = 32;
    let filled = (update.amplitude as usize * WIDTH) / 255;
    let tag = match update.activity {
        VoiceActivity::SpeechDetected => "speech detected",
        VoiceActivity::Listening => "listening      ",
    };

    let mut out = io::stderr();
    let _ = write!(
        out,
        "\r[{bar:<width$}] {amplitude:>3}  {tag}",
        bar = "#".repeat(filled),
        width = WIDTH,
        amplitude = update.amplitude,
    );
    let _ = out.flush();
}

fn report_result(outcome: Option<&WorkflowOutcome>, error: Option<String>) {
    eprintln!();
    match outcome {
        Some(WorkflowOutcome::Identified {
            speaker_id,
            speaker_alias,
            confidence,
        }) => println!(
            "Identified speaker '{speaker_alias}' (id {speaker_id}, confidence {confidence:.2})"
        ),
        Some(WorkflowOutcome::NotIdentified) => {
            println!("No enrolled speaker matched this sample.")
        }
        Some(WorkflowOutcome::Success { message }) => println!("{message}"),
        Some(WorkflowOutcome::Failure { reason }) => println!("Failed: {reason}"),
        None => match error {
            Some(error) => println!("Failed: {error}"),
            None => println!("No result."),
        },
    }
}
