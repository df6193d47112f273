//! Composition root.
//!
//! Builds real components from a [`Config`] and runs the two long-lived
//! commands: a full listening session and a one-off narration.

use crate::activity::{CONSOLE_HELP, ConsoleActivitySource};
use crate::audio::ambient::{AmbientPlayer, AmbientSoundController, SilentAmbient};
use crate::audio::render::{RenderSink, SilentRenderSink};
use crate::config::Config;
use crate::error::{Result, SlowwaveError};
use crate::narration::pipeline::{NarrationPipeline, NarrationSummary};
use crate::output::{format_summary, render_status_change};
use crate::session::controller::{SessionOptions, SessionParts, spawn_session};
use crate::session::routing::LoggingRouteController;
use crate::story::StoryTextProvider;
use crate::tts::client::{SpeechSynthesizer, StreamingSynthesisClient};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line overrides shared by the long-running commands.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub quiet: bool,
    pub device: Option<String>,
    pub no_audio: bool,
    pub stage_timeout: Option<Duration>,
}

/// Apply CLI overrides, fill run-stable values and check the result.
pub fn prepare_config(mut config: Config, options: &RunOptions) -> Result<Config> {
    if let Some(device) = &options.device {
        config.audio.device = Some(device.clone());
    }
    if let Some(timeout) = options.stage_timeout {
        config.tts.stage_timeout_secs = timeout.as_secs().max(1);
    }
    let config = config.finalize();
    config.validate()?;
    Ok(config)
}

/// Narration text from `--text`, `--file`, or stdin, in that order.
pub fn read_input_text(text: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = file {
        return Ok(std::fs::read_to_string(path)?);
    }
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

fn build_synthesizer(config: &Config) -> Arc<dyn SpeechSynthesizer> {
    if let Err(e) = config.tts.validate() {
        warn!(error = %e, "synthesis is not configured, narration segments will fail");
    }
    Arc::new(StreamingSynthesisClient::new(config.tts.clone()))
}

#[cfg(feature = "cpal-audio")]
fn build_render_sink(config: &Config, no_audio: bool) -> Box<dyn RenderSink> {
    if no_audio {
        return Box::new(SilentRenderSink::new());
    }
    Box::new(crate::audio::render::CpalRenderSink::new(
        config.audio.device.clone(),
        config.tts.sample_rate,
    ))
}

#[cfg(not(feature = "cpal-audio"))]
fn build_render_sink(_config: &Config, no_audio: bool) -> Box<dyn RenderSink> {
    if !no_audio {
        warn!("built without audio output, narration will be silent");
    }
    Box::new(SilentRenderSink::new())
}

#[cfg(feature = "cpal-audio")]
fn build_ambient_player(config: &Config, no_audio: bool) -> Box<dyn AmbientPlayer> {
    if no_audio {
        return Box::new(SilentAmbient::new());
    }
    Box::new(crate::audio::ambient::CpalAmbientPlayer::new(
        config.audio.device.clone(),
        config.ambient.asset.clone(),
    ))
}

#[cfg(not(feature = "cpal-audio"))]
fn build_ambient_player(_config: &Config, _no_audio: bool) -> Box<dyn AmbientPlayer> {
    Box::new(SilentAmbient::new())
}

#[cfg(feature = "story-http")]
fn build_story_provider(config: &Config) -> Arc<dyn StoryTextProvider> {
    if let Err(e) = config.story.validate() {
        warn!(error = %e, "story provider is not configured, narration requests will fail");
    }
    Arc::new(crate::story::ArkStoryProvider::new(config.story.clone()))
}

#[cfg(not(feature = "story-http"))]
fn build_story_provider(_config: &Config) -> Arc<dyn StoryTextProvider> {
    warn!("built without story-http, narration requests will fail");
    Arc::new(crate::story::FixedStoryProvider::failing(
        "story generation not compiled in",
    ))
}

/// Run a full session until Ctrl+C, SIGTERM, or `/quit` on the console.
pub async fn run_session_command(config: Config, options: RunOptions) -> Result<()> {
    let config = prepare_config(config, &options)?;
    let quit = CancellationToken::new();

    let parts = SessionParts {
        synthesizer: build_synthesizer(&config),
        sink: build_render_sink(&config, options.no_audio),
        ambient: AmbientSoundController::new(
            build_ambient_player(&config, options.no_audio),
            config.ambient.volume,
        ),
        routes: Box::new(LoggingRouteController::new()),
        story: build_story_provider(&config),
        activity: Box::new(ConsoleActivitySource::new(quit.clone())),
    };
    let session_options = SessionOptions {
        narration: config.narration.clone(),
        ambient_restart_delay: Duration::from_millis(config.ambient.restart_delay_ms),
        initial_hint: String::new(),
    };

    let (handle, task) = spawn_session(parts, session_options);
    let mut status = handle.subscribe();
    let mut shown = status.borrow_and_update().clone();

    if !options.quiet {
        eprintln!("{CONSOLE_HELP}");
    }
    handle.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !options.quiet {
                    eprintln!("\nReceived SIGINT, shutting down...");
                }
                break;
            }
            res = wait_for_sigterm() => {
                if let Err(e) = res {
                    warn!(error = %e, "SIGTERM handler unavailable");
                }
                if !options.quiet {
                    eprintln!("\nReceived SIGTERM, shutting down...");
                }
                break;
            }
            _ = quit.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if !options.quiet {
                    render_status_change(&shown, &current);
                }
                shown = current;
            }
        }
    }

    handle.shutdown().await;
    if let Err(e) = task.await {
        warn!(error = %e, "session task failed");
    }
    info!("session ended");
    Ok(())
}

/// Narrate `text` through the pipeline alone and wait for it to finish.
///
/// Ctrl+C stops playback immediately.
pub async fn run_narrate_command(
    config: Config,
    options: RunOptions,
    text: &str,
) -> Result<Option<NarrationSummary>> {
    let config = prepare_config(config, &options)?;
    config.tts.validate()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut pipeline = NarrationPipeline::new(
        build_synthesizer(&config),
        build_render_sink(&config, options.no_audio),
        tx,
        &config.narration,
    );

    let summary = tokio::select! {
        summary = pipeline.run_to_completion(text, &mut rx) => Some(summary),
        _ = tokio::signal::ctrl_c() => None,
    };

    match summary {
        Some(summary) => {
            if !options.quiet {
                eprintln!("{}", format_summary(&summary));
            }
            Ok(Some(summary))
        }
        None => {
            pipeline.stop();
            if !options.quiet {
                eprintln!("\nNarration stopped.");
            }
            Ok(None)
        }
    }
}

/// Wait for SIGTERM.
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| SlowwaveError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await
}
