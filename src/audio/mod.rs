//! Continuous audio capture and classification.
//!
//! An [`AudioRecorder`] yields a raw stream of mono 16-bit little-endian
//! PCM samples; [`AudioClassifier`] slices that stream into model-sized
//! windows and classifies them, dropping windows while a classification is
//! still in flight rather than queueing them.

pub mod audiocmd;
pub mod classifier;
pub mod recorder;
pub mod window;

pub use classifier::{AudioClassifier, ClassifyEvent};
pub use recorder::{AudioRecorder, Device, WavRecorder};
pub use window::SampleWindow;
