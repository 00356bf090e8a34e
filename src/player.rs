//! Top-level run orchestration
//!
//! Wires resolver, signaling, session, pipeline and sinks together and owns
//! the teardown sequence. Teardown always runs here, in the top-level task,
//! regardless of which trigger set the exit flag.

use crate::config::RunConfig;
use crate::pipeline::{FramePipeline, PipelineEnd};
use crate::resolver::EndpointResolver;
use crate::session::{ConnectionState, PeerSession};
use crate::shutdown::{ExitReason, ShutdownCoordinator};
use crate::signaling::SignalingClient;
use crate::sink::{DisplaySink, Mp4Recorder, PreviewWindow, RecordingSink};
use crate::Result;
use std::time::Duration;
use tracing::{info, warn};

/// Resolve, connect and play until a termination trigger fires.
///
/// Returns the exit reason of a completed run; an `Err` means the run never
/// reached the playing stage (resolution, signaling or transport setup
/// failed).
pub async fn run(config: &RunConfig) -> Result<ExitReason> {
    config.validate()?;

    // The interrupt watcher goes in first so a ctrl-c during resolution or
    // negotiation is already routed through the coordinator.
    let coordinator = ShutdownCoordinator::new();
    coordinator.watch_interrupt();

    let resolver = EndpointResolver::new()?;
    let target = resolver
        .resolve(&config.page_url, config.stream_name.as_deref())
        .await?;
    info!(
        "Resolved play target: api={}, stream={}",
        target.api_endpoint, target.stream_name
    );

    let signaling = SignalingClient::new()?;
    let mut session = PeerSession::start(&config.ice, &target, &signaling).await?;

    spawn_state_watcher(&session, &coordinator);

    let display: Option<Box<dyn DisplaySink>> = if config.display {
        Some(Box::new(PreviewWindow::new()))
    } else {
        None
    };
    let recorder: Option<Box<dyn RecordingSink>> = if config.record {
        Some(Box::new(Mp4Recorder::new(&config.output_path)))
    } else {
        None
    };

    let play_timeout = match config.timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let mut pipeline = FramePipeline::new(coordinator.clone(), play_timeout, display, recorder);
    let end = pipeline.run(&mut session).await;

    // End of stream without an explicit trigger: decide from the session
    // state whether the transport failed or the stream simply ended.
    if end == PipelineEnd::EndOfStream {
        let reason = match session.state() {
            ConnectionState::Failed => {
                ExitReason::TransportFailed("session failed".to_string())
            }
            _ => ExitReason::StreamEnded,
        };
        coordinator.request_exit(reason);
    }

    let frames = pipeline.frames_handled();
    let (display, recorder) = pipeline.into_sinks();

    // Teardown order: stop media delivery, then close the file, then drop
    // the window.
    session.stop().await;
    if let Some(mut recorder) = recorder {
        if let Err(e) = recorder.finalize() {
            warn!("Recording finalize failed: {}", e);
        }
    }
    drop(display);

    let reason = coordinator
        .reason()
        .unwrap_or(ExitReason::StreamEnded);
    info!("Run finished: {} ({} frames handled)", reason, frames);
    Ok(reason)
}

/// Watch session state and map terminal transport events onto the exit flag
fn spawn_state_watcher(session: &PeerSession, coordinator: &ShutdownCoordinator) {
    let mut state_rx = session.state_receiver();
    let coordinator = coordinator.clone();

    tokio::spawn(async move {
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Disconnected => {
                    coordinator.request_exit(ExitReason::StreamEnded);
                    break;
                }
                ConnectionState::Failed => {
                    coordinator.request_exit(ExitReason::TransportFailed(
                        "peer connection failed".to_string(),
                    ));
                    break;
                }
                ConnectionState::Closed => break,
                _ => {}
            }
            if state_rx.changed().await.is_err() {
                break;
            }
        }
    });
}
