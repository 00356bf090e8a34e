//! WebRTC peer session wrapping a recvonly peer connection
//!
//! `start` builds the local offer, runs the HTTP offer/answer exchange
//! through the signaling client and applies the remote answer. Incoming
//! video is depacketized into access units and handed out through
//! `next_frame`; audio is subscribed so the server paces both tracks, but
//! its packets are drained and dropped.

use crate::config::IceConfig;
use crate::media::h264::{contains_keyframe, H264Depacketizer};
use crate::media::{rtp_ticks_to_pts, VideoSample};
use crate::resolver::StreamTarget;
use crate::session::ConnectionState;
use crate::signaling::SignalingClient;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

/// Transition bookkeeping shared with the transport callbacks.
///
/// All writes funnel through [`SessionShared::transition`], which serializes
/// transitions and drops every event that arrives after `Closed`.
struct SessionShared {
    state_tx: watch::Sender<ConnectionState>,
    transition_lock: Mutex<()>,
    ice_established: AtomicBool,
    first_sample_seen: AtomicBool,
}

impl SessionShared {
    fn new() -> (Arc<Self>, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let shared = Arc::new(Self {
            state_tx,
            transition_lock: Mutex::new(()),
            ice_established: AtomicBool::new(false),
            first_sample_seen: AtomicBool::new(false),
        });
        (shared, state_rx)
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Apply a transition. Returns whether the state actually changed.
    fn transition(&self, next: ConnectionState) -> bool {
        let _guard = self.transition_lock.lock().unwrap_or_else(|e| e.into_inner());

        let current = *self.state_tx.borrow();
        if current == ConnectionState::Closed {
            debug!("Ignoring {} event after close", next);
            return false;
        }
        if current == next {
            return false;
        }
        // Failed and Disconnected are sticky until close.
        if current.is_terminal() && next != ConnectionState::Closed {
            return false;
        }

        info!("Connection state: {} -> {}", current, next);
        self.state_tx.send_replace(next);
        true
    }

    /// Connected requires both ICE establishment and a first media sample
    fn maybe_connected(&self) {
        if self.ice_established.load(Ordering::Acquire)
            && self.first_sample_seen.load(Ordering::Acquire)
            && self.state() == ConnectionState::Connecting
        {
            self.transition(ConnectionState::Connected);
        }
    }
}

/// A live recvonly WebRTC session against a streaming server
pub struct PeerSession {
    peer_connection: Arc<RTCPeerConnection>,
    shared: Arc<SessionShared>,
    state_rx: watch::Receiver<ConnectionState>,
    frames_rx: mpsc::Receiver<VideoSample>,
}

impl PeerSession {
    /// Negotiate and start a session for `target`.
    ///
    /// Builds the offer, waits for ICE gathering, exchanges SDP through
    /// `signaling` and applies the answer. The returned session is in
    /// `Connecting`; it reaches `Connected` once ICE is established and the
    /// first media sample arrives.
    pub async fn start(
        ice: &IceConfig,
        target: &StreamTarget,
        signaling: &SignalingClient,
    ) -> Result<Self> {
        let peer_connection = build_peer_connection(ice).await?;
        let (shared, state_rx) = SessionShared::new();

        // One frame in flight at a time: a slow consumer back-pressures the
        // track reader instead of growing a queue.
        let (frames_tx, frames_rx) = mpsc::channel::<VideoSample>(1);

        register_state_handlers(&peer_connection, &shared);
        register_track_handler(&peer_connection, &shared, frames_tx);

        let offer = peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::Transport(format!("failed to create offer: {e}")))?;

        peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Transport(format!("failed to set local description: {e}")))?;

        // Wait for ICE gathering so the offer carries the candidates; SRS
        // does not do trickle ICE over this API.
        let mut gather_done = peer_connection.gathering_complete_promise().await;
        let _ = gather_done.recv().await;

        let local_description = peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::Transport("no local description after gathering".to_string()))?;

        shared.transition(ConnectionState::Connecting);

        let answer_sdp = match signaling.negotiate(target, &local_description.sdp).await {
            Ok(sdp) => sdp,
            Err(e) => {
                shared.transition(ConnectionState::Failed);
                let _ = peer_connection.close().await;
                return Err(e);
            }
        };

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| Error::Signaling(format!("invalid answer SDP: {e}")))?;

        peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Transport(format!("failed to set remote description: {e}")))?;

        info!("Remote description applied, waiting for media");

        Ok(Self {
            peer_connection,
            shared,
            state_rx,
            frames_rx,
        })
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch channel for observing state transitions
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Pull the next video access unit.
    ///
    /// Returns `None` at end of stream: the track ended, or the session
    /// reached a terminal state.
    pub async fn next_frame(&mut self) -> Option<VideoSample> {
        let mut state_rx = self.state_rx.clone();
        loop {
            if state_rx.borrow().is_terminal() {
                return None;
            }

            tokio::select! {
                frame = self.frames_rx.recv() => return frame,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Stop the session. Idempotent: the first call transitions to `Closed`
    /// and closes the peer connection, later calls are no-ops.
    pub async fn stop(&self) {
        if !self.shared.transition(ConnectionState::Closed) {
            debug!("stop() on an already-closed session");
            return;
        }

        if let Err(e) = self.peer_connection.close().await {
            warn!("Error closing peer connection: {}", e);
        }
    }
}

/// Build the recvonly peer connection with default codecs and interceptors
async fn build_peer_connection(ice: &IceConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| Error::Transport(format!("failed to register codecs: {e}")))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| Error::Transport(format!("failed to register interceptors: {e}")))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: ice.stun_servers.clone(),
            ..Default::default()
        }],
        ..Default::default()
    };

    let peer_connection = Arc::new(
        api.new_peer_connection(rtc_config)
            .await
            .map_err(|e| Error::Transport(format!("failed to create peer connection: {e}")))?,
    );

    for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
        peer_connection
            .add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| Error::Transport(format!("failed to add {kind} transceiver: {e}")))?;
    }

    Ok(peer_connection)
}

/// Map transport state callbacks onto session transitions
fn register_state_handlers(peer_connection: &Arc<RTCPeerConnection>, shared: &Arc<SessionShared>) {
    let shared_pc = Arc::clone(shared);
    peer_connection.on_peer_connection_state_change(Box::new(move |state| {
        let shared = Arc::clone(&shared_pc);
        Box::pin(async move {
            debug!("Peer connection state: {}", state);
            match state {
                RTCPeerConnectionState::Failed => {
                    shared.transition(ConnectionState::Failed);
                }
                RTCPeerConnectionState::Disconnected => {
                    shared.transition(ConnectionState::Disconnected);
                }
                _ => {}
            }
        })
    }));

    let shared_ice = Arc::clone(shared);
    peer_connection.on_ice_connection_state_change(Box::new(move |state| {
        let shared = Arc::clone(&shared_ice);
        Box::pin(async move {
            debug!("ICE connection state: {}", state);
            match state {
                RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                    shared.ice_established.store(true, Ordering::Release);
                    shared.maybe_connected();
                }
                RTCIceConnectionState::Failed => {
                    shared.transition(ConnectionState::Failed);
                }
                _ => {}
            }
        })
    }));
}

/// Spawn per-track readers when the subscribed media arrives
fn register_track_handler(
    peer_connection: &Arc<RTCPeerConnection>,
    shared: &Arc<SessionShared>,
    frames_tx: mpsc::Sender<VideoSample>,
) {
    let shared = Arc::clone(shared);
    let frames_tx = Mutex::new(Some(frames_tx));

    peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
        let mime_type = track.codec().capability.mime_type.to_lowercase();
        info!("Track subscribed: kind={}, mime={}", track.kind(), mime_type);

        if mime_type.contains("h264") {
            let Some(tx) = frames_tx.lock().unwrap_or_else(|e| e.into_inner()).take() else {
                warn!("Second video track ignored");
                return Box::pin(async {});
            };
            let shared = Arc::clone(&shared);
            return Box::pin(async move {
                tokio::spawn(read_video_track(track, shared, tx));
            });
        }

        if track.kind() == RTPCodecType::Audio {
            return Box::pin(async move {
                tokio::spawn(drain_audio_track(track));
            });
        }

        warn!("Ignoring unsupported track: {}", mime_type);
        Box::pin(async {})
    }));
}

/// Read and depacketize the video track until it ends
async fn read_video_track(
    track: Arc<TrackRemote>,
    shared: Arc<SessionShared>,
    frames_tx: mpsc::Sender<VideoSample>,
) {
    let mut depacketizer = H264Depacketizer::new();
    let mut first_rtp_ts: Option<u32> = None;
    let mut frame_count: u64 = 0;
    let mut last_rate_log = Instant::now();

    loop {
        let (packet, _attributes) = match track.read_rtp().await {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Video RTP read ended: {}", e);
                break;
            }
        };

        let rtp_ts = packet.header.timestamp;
        let marker = packet.header.marker;

        let Some((access_unit, frame_ts)) = depacketizer.push(&packet.payload, rtp_ts, marker)
        else {
            continue;
        };

        let base = *first_rtp_ts.get_or_insert(frame_ts);
        let sample = VideoSample {
            is_keyframe: contains_keyframe(&access_unit),
            pts: rtp_ticks_to_pts(frame_ts.wrapping_sub(base)),
            data: access_unit.into(),
        };

        if !shared.first_sample_seen.swap(true, Ordering::AcqRel) {
            info!("First video sample received");
            shared.maybe_connected();
        }

        frame_count += 1;
        let elapsed = last_rate_log.elapsed();
        if elapsed.as_secs() >= 1 {
            debug!(
                "Receiving {:.1} fps",
                frame_count as f64 / elapsed.as_secs_f64()
            );
            frame_count = 0;
            last_rate_log = Instant::now();
        }

        // Bounded channel: waiting here throttles frame delivery when the
        // consumer is slower than the arrival rate.
        if frames_tx.send(sample).await.is_err() {
            debug!("Frame consumer gone, stopping video reader");
            break;
        }
    }

    info!("Video track ended");
}

/// Drain the audio track so the transport keeps pacing; samples are dropped
async fn drain_audio_track(track: Arc<TrackRemote>) {
    let mut packet_count: u64 = 0;
    let mut last_rate_log = Instant::now();

    loop {
        match track.read_rtp().await {
            Ok(_) => {
                packet_count += 1;
                if last_rate_log.elapsed().as_secs() >= 1 {
                    debug!("Drained {} audio packets", packet_count);
                    packet_count = 0;
                    last_rate_log = Instant::now();
                }
            }
            Err(e) => {
                debug!("Audio RTP read ended: {}", e);
                break;
            }
        }
    }
}
