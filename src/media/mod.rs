//! Media types shared between the session, pipeline and sinks

pub mod decode;
pub mod h264;

use bytes::Bytes;
use std::time::Duration;

/// One complete encoded H.264 access unit pulled off the track.
///
/// `data` is Annex-B (start-code delimited NAL units) exactly as reassembled
/// from RTP. `pts` is derived from the 90 kHz RTP clock, relative to the
/// first sample of the session.
#[derive(Debug, Clone)]
pub struct VideoSample {
    /// Annex-B encoded access unit
    pub data: Bytes,
    /// Presentation timestamp relative to stream start
    pub pts: Duration,
    /// Whether the access unit contains an IDR slice
    pub is_keyframe: bool,
}

/// A transient decoded frame: packed RGB8 pixels plus the presentation
/// timestamp. Consumed by sinks immediately, never cached.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Frame width in pixels
    pub width: usize,
    /// Frame height in pixels
    pub height: usize,
    /// Packed RGB8 pixel data, `width * height * 3` bytes
    pub data: Vec<u8>,
    /// Presentation timestamp relative to stream start
    pub pts: Duration,
}

/// Convert a 90 kHz RTP timestamp delta to a presentation timestamp
pub fn rtp_ticks_to_pts(ticks: u32) -> Duration {
    Duration::from_micros(u64::from(ticks) * 1_000_000 / 90_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_ticks_to_pts() {
        assert_eq!(rtp_ticks_to_pts(0), Duration::ZERO);
        assert_eq!(rtp_ticks_to_pts(90_000), Duration::from_secs(1));
        // One frame at 30 fps is 3000 ticks.
        assert_eq!(rtp_ticks_to_pts(3000), Duration::from_micros(33_333));
    }
}
