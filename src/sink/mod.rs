//! Frame sinks: preview display and MP4 recording
//!
//! Both sinks are best-effort from the pipeline's point of view; a failing
//! sink is disabled for the rest of the run without stopping the other.

pub mod display;
pub mod record;

use crate::media::{FrameBuffer, VideoSample};
use crate::Result;

pub use display::PreviewWindow;
pub use record::Mp4Recorder;

/// A preview surface for decoded frames.
///
/// Not `Send`: the pipeline owns its sinks and is awaited on the root task,
/// never spawned, and window handles are thread-bound on most platforms.
pub trait DisplaySink {
    /// Render one decoded frame
    fn render(&mut self, frame: &FrameBuffer) -> Result<()>;

    /// Pump window events without blocking and report whether the user
    /// asked to close (window closed or ESC). Called once per pipeline
    /// iteration.
    fn close_requested(&mut self) -> bool;
}

/// A persistent sink for encoded video samples with a write/finalize contract
pub trait RecordingSink: Send {
    /// Append one encoded access unit in presentation order
    fn write_video(&mut self, sample: &VideoSample) -> Result<()>;

    /// Flush buffered samples and write the container index. The file is
    /// only guaranteed playable after this returns. Idempotent.
    fn finalize(&mut self) -> Result<()>;
}
