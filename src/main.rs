use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "voxturn", about = "Real-time spoken conversation pipeline")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = voxturn_core::AppConfig::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {:?}", cli.config))?;

    let env_filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        );

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    tracing::info!("voxturn starting");

    let pipeline = voxturn_pipeline::VoicePipeline::with_null_backends(config.clone());
    pipeline
        .start()
        .await
        .context("failed to initialize engines")?;

    let audio = &config.audio;
    let device_manager = voxturn_audio::DeviceManager::new();

    tracing::info!("using output device: {}", audio.output_device);
    let output_device = device_manager
        .get_output_device(&audio.output_device)
        .with_context(|| format!("failed to get output device: {}", audio.output_device))?;

    tracing::info!("using input device: {}", audio.input_device);
    let input_device = device_manager
        .get_input_device(&audio.input_device)
        .with_context(|| format!("failed to get input device: {}", audio.input_device))?;

    // Playback ring buffer: ~10 seconds of audio
    let ring_capacity = audio.output_sample_rate as usize * 10;
    let (out_producer, out_consumer) = voxturn_audio::create_ring_buffer(ring_capacity);
    let mut playback_queue = voxturn_audio::PlaybackQueue::new(out_producer);
    let (_playback, playback_handle) = voxturn_audio::PlaybackNode::new(
        &output_device,
        out_consumer,
        audio.output_sample_rate,
        audio.buffer_size,
    )
    .context("failed to create playback node")?;

    let mut host = voxturn_pipeline::TurnHost::new(pipeline.coordinator().clone());
    let mut result_rx = host
        .take_result_receiver()
        .context("turn result receiver already taken")?;
    let chunk_tx = host.add_input().context("turn host already started")?;
    host.start();

    let (capture, capture_handle) = voxturn_audio::CaptureNode::new(
        &input_device,
        audio.sample_rate,
        1,
        audio.buffer_size,
        audio.chunk_ms,
        chunk_tx,
    )
    .context("failed to create capture node")?;

    let output_rate = audio.output_sample_rate;
    let results = tokio::spawn(async move {
        while let Some(turn) = result_rx.recv().await {
            let Some(response) = turn.response_text() else {
                continue;
            };
            tracing::info!(
                turn_id = turn.turn_id(),
                total_ms = turn.total_ms(),
                "user: {} | assistant: {}",
                turn.transcript().unwrap_or_default(),
                response,
            );
            if let Some(speech) = turn.response_audio() {
                if speech.sample_rate != output_rate {
                    tracing::warn!(
                        speech_rate = speech.sample_rate,
                        output_rate,
                        "synthesized audio rate differs from output rate"
                    );
                }
                playback_queue.enqueue(speech);
            }
        }
    });

    tracing::info!(
        "listening at {} Hz in {} ms chunks, speaking at {} Hz; press Ctrl-C to quit",
        audio.sample_rate,
        audio.chunk_ms,
        audio.output_sample_rate,
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("shutting down");
    if capture_handle.has_failed() || playback_handle.has_failed() {
        tracing::warn!("an audio stream reported errors during the session");
    }
    drop(capture);
    host.cancel();
    host.shutdown().await;
    drop(host);
    let _ = results.await;

    for recommendation in pipeline.optimization_recommendations() {
        tracing::info!("recommendation: {recommendation}");
    }
    pipeline
        .shutdown()
        .await
        .context("failed to shut down engines")?;

    Ok(())
}
