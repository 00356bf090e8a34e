//! WebRTC stream player for SRS-style media servers.
//!
//! Points at a play page (or a direct play API URL), resolves the signaling
//! endpoint, negotiates a recvonly WebRTC session and pulls the H.264 video
//! track through a frame pipeline with optional preview and MP4 recording
//! sinks.
//!
//! The crate is organized around the run lifecycle:
//!
//! - [`resolver`]: turn a page URL into a play API endpoint and stream name
//! - [`signaling`]: the HTTP offer/answer exchange with the server
//! - [`session`]: the peer connection, its state machine and media pull
//! - [`media`]: H.264 depacketization and decode
//! - [`pipeline`]: fan-out from the session to the sinks
//! - [`sink`]: preview window and MP4 recorder
//! - [`shutdown`]: the single exit flag every loop polls
//! - [`player`]: top-level orchestration and teardown
//!
//! # Example
//!
//! ```no_run
//! use srs_player::{player, RunConfig};
//!
//! # async fn demo() -> srs_player::Result<()> {
//! let config = RunConfig {
//!     page_url: "http://localhost:8080/players/rtc_player.html".to_string(),
//!     record: true,
//!     ..Default::default()
//! };
//! let reason = player::run(&config).await?;
//! println!("exited: {reason}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod player;
pub mod resolver;
pub mod session;
pub mod shutdown;
pub mod signaling;
pub mod sink;

pub use config::{IceConfig, RunConfig};
pub use error::{Error, Result};
pub use resolver::{EndpointResolver, StreamTarget};
pub use session::{ConnectionState, PeerSession};
pub use shutdown::{ExitReason, ShutdownCoordinator};
pub use signaling::SignalingClient;

/// Crate version string
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
