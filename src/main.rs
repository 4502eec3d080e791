use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chorus::capture::{DeviceFrameSource, FrameSource, SAMPLE_RATE};
use chorus::config::DEFAULT_FRAME_SAMPLES;
use chorus::controller::{CaptureInput, StdinLines};
use chorus::playback::test_tone;
use chorus::{
    AudioRenderer, Config, CpalPlayback, DeviceBackend, GenerationClient, InteractionController,
    Player, RecognitionModel, ResponseOrchestrator, TerminalDisplay, UnavailablePlayback,
};

/// Chorus - spoken conversations with a local language model
#[derive(Parser)]
#[command(name = "chorus", version, about)]
struct Cli {
    /// Config file (default: <config dir>/chorus/config.toml)
    #[arg(short, long, env = "CHORUS_CONFIG")]
    config: Option<PathBuf>,

    /// Generation model, overriding the config file
    #[arg(short, long)]
    model: Option<String>,

    /// Generation service URL, overriding the config file
    #[arg(long)]
    url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Interactive conversation (default)
    Chat,
    /// Speak a text through the renderer chain
    Say {
        /// Text to speak
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,chorus=info",
        1 => "info,chorus=debug",
        2 => "debug",
        _ => "trace",
    };

    // Logs go to stderr so they do not interleave with the conversation
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::TestMic { duration }) => return test_mic(duration).await,
        Some(Command::TestSpeaker) => return test_speaker().await,
        _ => {}
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.generation.model = model;
    }
    if let Some(url) = cli.url {
        config.generation.url = url;
    }
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    // Rendered audio lives here until played
    let scratch = tempfile::Builder::new().prefix("chorus-").tempdir()?;
    let work_dir = config
        .work_dir
        .clone()
        .unwrap_or_else(|| scratch.path().to_path_buf());

    let renderer = AudioRenderer::from_config(&config, &work_dir)?;
    let speaking = matches!(cli.command, Some(Command::Say { .. }));
    let player: Arc<dyn Player> = match CpalPlayback::new() {
        Ok(playback) => Arc::new(playback),
        Err(e) if !speaking => {
            tracing::warn!(error = %e, "no usable output device, responses will be text only");
            Arc::new(UnavailablePlayback::new(e.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let orchestrator = ResponseOrchestrator::new(
        Arc::new(GenerationClient::new(&config.generation)?),
        Arc::new(renderer),
        player,
        Arc::new(TerminalDisplay),
        config.generation.bot_name(),
    )
    .with_max_chars(config.segmenter.max_chars);

    if let Some(Command::Say { text }) = cli.command {
        let report = orchestrator.speak(&text).await;
        tracing::info!(
            segments = report.segments,
            played = report.played,
            "say complete"
        );
        return Ok(());
    }

    let model = config
        .recognition
        .model_dir
        .as_deref()
        .map(RecognitionModel::load)
        .transpose()?;
    let backend = DeviceBackend::new(model, config.recognition.frame_samples);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received");
                shutdown.cancel();
            }
        });
    }

    tracing::info!(
        model = %config.generation.model,
        url = %config.generation.url,
        voice = config.recognition.model_dir.is_some(),
        "chorus ready"
    );

    let controller = InteractionController::new(
        Arc::new(orchestrator),
        Box::new(StdinLines::new("\nType a message (/bye to quit): ")),
        Arc::new(CaptureInput::new(Arc::new(backend))),
        Arc::new(TerminalDisplay),
        shutdown,
    );

    let reason = controller.run().await;
    tracing::debug!(?reason, "exiting");

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let frames_per_second = (SAMPLE_RATE as usize).div_ceil(DEFAULT_FRAME_SAMPLES).max(1);

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut source = DeviceFrameSource::open(DEFAULT_FRAME_SAMPLES)?;
        println!("Sample rate: {SAMPLE_RATE} Hz");
        println!("---");

        for second in 0..duration {
            let mut samples = Vec::new();
            for _ in 0..frames_per_second {
                if let Some(frame) = source.read_frame(Duration::from_secs(1))? {
                    samples.extend(frame.into_iter().map(|s| f32::from(s) / 32768.0));
                }
            }

            let energy = calculate_rms(&samples);
            let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy * 100.0).min(50.0) as usize;
            let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

            println!(
                "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
                second + 1,
                energy,
                peak,
                meter
            );
        }

        Ok(())
    })
    .await
    .context("microphone test task failed")??;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = CpalPlayback::new()?;
    let sample_rate = playback.sample_rate();
    let samples = test_tone(440.0, Duration::from_secs(2), sample_rate);

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback.play_samples(samples, sample_rate).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl list sinks short");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}
