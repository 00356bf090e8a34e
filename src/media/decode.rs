//! H.264 decoding for the preview path
//!
//! Wraps the openh264 decoder: Annex-B access units in, packed RGB8
//! [`FrameBuffer`]s out. The decoder buffers until it has seen SPS/PPS, so
//! early samples legitimately produce no output.

use crate::media::{FrameBuffer, VideoSample};
use crate::{Error, Result};
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use tracing::{debug, info};

/// Stateful H.264 to RGB decoder
pub struct VideoDecoder {
    decoder: Decoder,
    /// Logged once, on the first decoded frame
    reported_size: Option<(usize, usize)>,
}

impl VideoDecoder {
    /// Create a decoder instance
    pub fn new() -> Result<Self> {
        let decoder =
            Decoder::new().map_err(|e| Error::Decode(format!("failed to create decoder: {e}")))?;

        Ok(Self {
            decoder,
            reported_size: None,
        })
    }

    /// Decode one access unit. Returns `None` while the decoder is still
    /// waiting for parameter sets or reordering delay.
    pub fn decode(&mut self, sample: &VideoSample) -> Result<Option<FrameBuffer>> {
        let decoded = self
            .decoder
            .decode(&sample.data)
            .map_err(|e| Error::Decode(format!("decode failed: {e}")))?;

        let Some(yuv) = decoded else {
            debug!("Decoder produced no output yet (pts {:?})", sample.pts);
            return Ok(None);
        };

        let (width, height) = yuv.dimensions();
        if self.reported_size != Some((width, height)) {
            info!("Video resolution: {}x{}", width, height);
            self.reported_size = Some((width, height));
        }

        let mut data = vec![0u8; width * height * 3];
        yuv.write_rgb8(&mut data);

        Ok(Some(FrameBuffer {
            width,
            height,
            data,
            pts: sample.pts,
        }))
    }
}
