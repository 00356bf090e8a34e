//! Frame pipeline
//!
//! Pulls encoded samples from the session and fans them out to the optional
//! display and recording sinks. The loop is the only place that polls the
//! exit flag, the play deadline and the window close state, so every
//! termination path funnels through one cooperative check per iteration.

use crate::media::decode::VideoDecoder;
use crate::media::VideoSample;
use crate::session::PeerSession;
use crate::shutdown::{ExitReason, ShutdownCoordinator};
use crate::sink::{DisplaySink, RecordingSink};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Upper bound on one blocking pull, bounds exit latency while idle
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Anything the pipeline can pull encoded samples from
#[async_trait]
pub trait FrameSource: Send {
    /// Next sample in presentation order; `None` means the source ended
    async fn next_frame(&mut self) -> Option<VideoSample>;
}

#[async_trait]
impl FrameSource for PeerSession {
    async fn next_frame(&mut self) -> Option<VideoSample> {
        PeerSession::next_frame(self).await
    }
}

/// Why the pipeline loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEnd {
    /// The exit flag was set (signal, timeout, window close, state watcher)
    ExitRequested,
    /// The source yielded `None`; the caller decides whether that was a
    /// clean end or a transport failure
    EndOfStream,
}

/// Pull-based fan-out from one frame source to the configured sinks.
///
/// Sinks are independent: a failing sink is logged and disabled, the other
/// keeps running.
pub struct FramePipeline {
    coordinator: ShutdownCoordinator,
    /// `None` disables the play deadline
    play_timeout: Option<Duration>,
    display: Option<Box<dyn DisplaySink>>,
    recorder: Option<Box<dyn RecordingSink>>,
    /// Created on the first displayed frame; recording alone never decodes
    decoder: Option<VideoDecoder>,
    last_pts: Option<Duration>,
    frames_handled: u64,
}

impl FramePipeline {
    pub fn new(
        coordinator: ShutdownCoordinator,
        play_timeout: Option<Duration>,
        display: Option<Box<dyn DisplaySink>>,
        recorder: Option<Box<dyn RecordingSink>>,
    ) -> Self {
        Self {
            coordinator,
            play_timeout,
            display,
            recorder,
            decoder: None,
            last_pts: None,
            frames_handled: 0,
        }
    }

    /// Samples accepted so far (after the ordering guard)
    pub fn frames_handled(&self) -> u64 {
        self.frames_handled
    }

    /// Hand the sinks back for teardown once the loop has returned
    pub fn into_sinks(self) -> (Option<Box<dyn DisplaySink>>, Option<Box<dyn RecordingSink>>) {
        (self.display, self.recorder)
    }

    /// Run until the exit flag is set or the source ends.
    ///
    /// Latency from an exit request to return is bounded by one poll
    /// interval plus one sink dispatch.
    pub async fn run(&mut self, source: &mut dyn FrameSource) -> PipelineEnd {
        let flag = self.coordinator.exit_flag();
        let deadline = self.play_timeout.map(|t| Instant::now() + t);

        loop {
            if flag.is_set() {
                return PipelineEnd::ExitRequested;
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.coordinator.request_exit(ExitReason::TimeoutExpired);
                    return PipelineEnd::ExitRequested;
                }
            }

            if let Some(display) = self.display.as_mut() {
                if display.close_requested() {
                    self.coordinator.request_exit(ExitReason::WindowClosed);
                    return PipelineEnd::ExitRequested;
                }
            }

            match tokio::time::timeout(POLL_INTERVAL, source.next_frame()).await {
                Err(_) => continue, // idle tick, re-check the exit conditions
                Ok(None) => return PipelineEnd::EndOfStream,
                Ok(Some(sample)) => self.handle_sample(sample),
            }
        }
    }

    fn handle_sample(&mut self, sample: VideoSample) {
        // Samples must move strictly forward; drop anything that does not.
        if let Some(last) = self.last_pts {
            if sample.pts <= last {
                warn!(
                    "Dropping out-of-order sample: pts {:?} after {:?}",
                    sample.pts, last
                );
                return;
            }
        }
        self.last_pts = Some(sample.pts);
        self.frames_handled += 1;

        if self.display.is_some() {
            self.dispatch_display(&sample);
        }

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write_video(&sample) {
                warn!("Recording sink failed, disabling it: {}", e);
                self.recorder = None;
            }
        }
    }

    fn dispatch_display(&mut self, sample: &VideoSample) {
        if self.decoder.is_none() {
            match VideoDecoder::new() {
                Ok(decoder) => self.decoder = Some(decoder),
                Err(e) => {
                    warn!("Decoder init failed, disabling display: {}", e);
                    self.display = None;
                    return;
                }
            }
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };

        let frame = match decoder.decode(sample) {
            Ok(Some(frame)) => frame,
            Ok(None) => return, // decoder still buffering
            Err(e) => {
                debug!("Decode error, skipping frame: {}", e);
                return;
            }
        };

        if let Some(display) = self.display.as_mut() {
            if let Err(e) = display.render(&frame) {
                warn!("Display sink failed, disabling it: {}", e);
                self.display = None;
            }
        }
    }
}
