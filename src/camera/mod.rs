//! Camera frame capture and classification.
//!
//! An [`ImageRecorder`] delivers decoded frames over a bounded channel,
//! dropping frames while the consumer is busy; [`ImageClassifier`]
//! normalizes each frame to the model's input shape and classifies it
//! inline, one frame at a time, in arrival order.

pub mod classifier;
pub mod ffmpegcam;
pub mod recorder;

pub use classifier::{ClassifyEvent, ImageClassifier, ImageClassifierOpts};
pub use ffmpegcam::{FfmpegRecorder, FfmpegRecorderOpts};
pub use recorder::{Device, ImageEvent, ImageRecorder};
