//! Preview window sink
//!
//! A minifb window: poll-based, so the UI never owns an event loop of its
//! own. The pipeline pumps events once per iteration through
//! `close_requested`; rendering a frame pumps as a side effect.

use crate::media::FrameBuffer;
use crate::sink::DisplaySink;
use crate::{Error, Result};
use minifb::{Key, Window, WindowOptions};
use tracing::{debug, info};

const WINDOW_TITLE: &str = "SRS WebRTC Player";

/// Poll-based preview window, created lazily on the first frame (the frame
/// carries the dimensions)
pub struct PreviewWindow {
    window: Option<Window>,
    /// 0RGB pixels for minifb
    pixels: Vec<u32>,
    /// Events were pumped by a render since the last poll
    pumped_since_poll: bool,
    /// Latched once the user closes the window or presses ESC
    close_requested: bool,
}

impl PreviewWindow {
    /// Create the sink; the OS window opens on the first rendered frame
    pub fn new() -> Self {
        Self {
            window: None,
            pixels: Vec::new(),
            pumped_since_poll: false,
            close_requested: false,
        }
    }

    fn ensure_window(&mut self, width: usize, height: usize) -> Result<&mut Window> {
        match &mut self.window {
            Some(window) => Ok(window),
            slot => {
                info!("Opening preview window {}x{}", width, height);
                let window = Window::new(WINDOW_TITLE, width, height, WindowOptions::default())
                    .map_err(|e| Error::Sink(format!("failed to open window: {e}")))?;
                Ok(slot.insert(window))
            }
        }
    }
}

impl Default for PreviewWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink for PreviewWindow {
    fn render(&mut self, frame: &FrameBuffer) -> Result<()> {
        if self.close_requested {
            return Err(Error::Sink("window already closed".to_string()));
        }

        self.pixels.resize(frame.width * frame.height, 0);
        for (pixel, rgb) in self.pixels.iter_mut().zip(frame.data.chunks_exact(3)) {
            *pixel = (u32::from(rgb[0]) << 16) | (u32::from(rgb[1]) << 8) | u32::from(rgb[2]);
        }

        let (width, height) = (frame.width, frame.height);
        let pixels = std::mem::take(&mut self.pixels);
        let window = self.ensure_window(width, height)?;

        let result = window
            .update_with_buffer(&pixels, width, height)
            .map_err(|e| Error::Sink(format!("failed to update window: {e}")));
        self.pixels = pixels;
        self.pumped_since_poll = true;
        result
    }

    fn close_requested(&mut self) -> bool {
        if self.close_requested {
            return true;
        }

        let Some(window) = self.window.as_mut() else {
            return false;
        };

        // Keep events flowing even when no frame arrived this iteration.
        if !self.pumped_since_poll {
            window.update();
        }
        self.pumped_since_poll = false;

        if !window.is_open() || window.is_key_down(Key::Escape) {
            debug!("Preview window close requested");
            self.close_requested = true;
            self.window = None;
        }

        self.close_requested
    }
}
