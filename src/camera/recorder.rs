//! Camera frame sources.

use crossbeam_channel::Receiver;
use image::DynamicImage;

use crate::error::Result;

/// One decoded frame, or the error that took its place.
pub type ImageEvent = Result<DynamicImage>;

/// A video capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Identifier to select the device with, e.g. `/dev/video0`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

/// A source of camera frames.
///
/// The image pipeline classifies inline and applies no dropping of its
/// own, so recorders must deliver frames through a capacity-bounded
/// non-blocking send and discard a frame when the consumer has not yet
/// taken the previous one.
pub trait ImageRecorder: Send {
    /// Frame events, bounded to a single in-flight frame.
    fn events(&self) -> Receiver<ImageEvent>;

    /// Stops the recorder. No further events are sent.
    fn close(&mut self) -> Result<()>;
}
