//! ellie-daemon: background daemon for a voice-driven command assistant
//!
//! This daemon runs as a user service and provides:
//! - Wake-phrase listening and bounded speech capture
//! - Two-tier classification: local rules, then a language model
//! - Command dispatch (torch, apps, media, PC power, clipboard, questions)
//! - Spoken and visual feedback
//! - IPC server for status queries, typed input and event subscription

mod classify;
mod command;
mod config;
mod device;
mod dispatch;
mod events;
mod feedback;
mod ipc;
mod lifecycle;
mod llm;
mod state;
mod timer;
mod voice;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::classify::{Classifier, LocalClassifier, PromptBuilder, RemoteClassifier};
use crate::config::{Config, SynthesizerKind};
use crate::device::desktop::{
    default_application_dirs, scan_applications, CommandClipboard, DesktopLauncher, SysfsTorch,
    XdgOpener,
};
use crate::device::Torch;
use crate::dispatch::{Devices, Dispatcher, PowerControl};
use crate::events::StateEvent;
use crate::feedback::{FeedbackPolicy, FeedbackSink, LogOverlay};
use crate::ipc::Server;
use crate::lifecycle::{Lifecycle, Phase, ShutdownSignal};
use crate::llm::{GeminiClient, GeminiConfig, LanguageModel};
use crate::state::{Microphone, Pipeline, StateMachine};
use crate::voice::{ConsoleInput, ConsoleSynthesizer, EspeakSynthesizer, Synthesizer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "ellie-daemon starting");

    let lifecycle = Lifecycle::new();

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, settings = ?config.settings, "configuration loaded");
    let settings = &config.settings;
    let timings = config.timings;

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Collaborators, timers and background work -> state machine
    let (input_tx, input_rx) = mpsc::channel(32);
    // State machine -> IPC server (for broadcasting state events)
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(64);

    // Installed applications, read once
    let app_dirs = settings
        .application_dirs
        .clone()
        .unwrap_or_else(default_application_dirs);
    let registry = Arc::new(scan_applications(&app_dirs));
    if registry.is_empty() {
        warn!(?app_dirs, "no applications found - launch commands will do nothing");
    } else {
        info!(apps = registry.len(), "application registry loaded");
    }

    // Feedback owner
    let synthesizer: Arc<dyn Synthesizer> = match settings.synthesizer {
        SynthesizerKind::Console => Arc::new(ConsoleSynthesizer),
        SynthesizerKind::Espeak => Arc::new(EspeakSynthesizer),
    };
    let (feedback_sink, feedback) = FeedbackSink::new(
        Box::new(LogOverlay::default()),
        synthesizer,
        FeedbackPolicy::new(settings, &timings),
    );
    let feedback_task = tokio::spawn(feedback_sink.run());

    // Language model, shared by classification and question answering
    if settings.gemini_api_key.is_empty() {
        warn!("no Gemini API key configured - only local rules will resolve commands");
    }
    let llm: Arc<dyn LanguageModel> = Arc::new(
        GeminiClient::new(GeminiConfig::new(
            settings.gemini_api_key.clone(),
            settings.gemini_model.clone(),
            timings.llm_request,
        ))
        .context("failed to build language model client")?,
    );

    let prompts = PromptBuilder::new(&registry);
    let classifier = Classifier::new(
        LocalClassifier::new(settings.app_aliases.clone()),
        RemoteClassifier::new(Arc::clone(&llm), prompts.clone()),
    );

    let devices = Devices {
        torch: settings
            .torch_led
            .as_deref()
            .map(|led| Arc::new(SysfsTorch::new(led)) as Arc<dyn Torch>),
        launcher: Arc::new(DesktopLauncher),
        opener: Arc::new(XdgOpener),
        clipboard: Arc::new(CommandClipboard::default()),
    };
    let power = PowerControl::new(settings, timings.shutdown_request)
        .context("failed to build power control client")?;
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        devices,
        power,
        llm,
        prompts,
        feedback.clone(),
        timings.llm_request,
    );

    // Wake and capture collaborators
    let console = ConsoleInput::new(input_tx.clone(), &settings.hotword_model);
    let mic = Microphone {
        wake: Box::new(console.wake_word()),
        recognizer: Box::new(console.recognizer()),
    };

    // Create the state machine
    let mut state_machine = StateMachine::new(
        mic,
        Pipeline {
            classifier,
            dispatcher,
            feedback,
        },
        timings,
        input_tx.clone(),
        event_tx.clone(),
    );

    // Start the console reader (runs on dedicated thread)
    match console.start() {
        Ok(()) => {
            info!("console input started");
        }
        Err(e) => {
            error!(?e, "failed to start console input");
            warn!("continuing without console input - submit text over IPC instead");
        }
    }

    // Create IPC server
    let server = Server::new(&config.socket_path, input_tx, event_tx.clone(), lifecycle.handle())?;

    // Subscribe to state events for IPC status updates
    let mut ipc_event_rx = event_tx.subscribe();
    let server_for_events = &server;

    lifecycle.advance(Phase::Running);
    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the state machine (processes every input)
        _ = state_machine.run(input_rx) => {
            info!("state machine exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the IPC status view in sync with the pipeline
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => {
                        debug!(%event, "state event received");
                        server_for_events.observe(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("state event handler exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to listen for shutdown signals"),
            }
        }
    }

    // Cleanup
    lifecycle.advance(Phase::Stopping);
    info!("shutting down...");

    state_machine.shutdown();
    if console.is_running() {
        console.stop();
    }
    server.shutdown().await;
    feedback_task.abort();

    lifecycle.advance(Phase::Stopped);
    info!("ellie-daemon stopped");

    Ok(())
}
