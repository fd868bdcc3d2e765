//! Audio capture sources.

use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::{EimrunError, Result};

/// An audio capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Identifier to select the device with, e.g. `hw:0,0`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

/// A source of mono 16-bit little-endian PCM samples.
///
/// Recorders are started and stopped by the caller, independently of any
/// pipeline consuming them. Closing a recorder makes pending reads on its
/// stream fail, which is how a pipeline learns its source is gone.
pub trait AudioRecorder: Send {
    /// Takes the raw PCM byte stream. The stream can be taken once;
    /// subsequent calls fail.
    fn reader(&mut self) -> Result<Box<dyn Read + Send>>;

    /// Stops the source.
    fn close(&mut self) -> Result<()>;
}

/// Plays a WAV file as a capture source.
///
/// Multi-channel files are mixed down to mono. Only 16-bit integer and
/// 32-bit float samples are supported.
pub struct WavRecorder {
    reader: Option<Box<dyn Read + Send>>,
}

impl std::fmt::Debug for WavRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavRecorder").finish_non_exhaustive()
    }
}

impl WavRecorder {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut wav = hound::WavReader::open(path).map_err(|e| EimrunError::Read {
            message: format!("opening {}: {e}", path.display()),
        })?;
        let spec = wav.spec();
        let channels = usize::from(spec.channels.max(1));

        let mono: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, bits) if bits <= 16 => {
                let samples: std::result::Result<Vec<i16>, _> = wav.samples::<i16>().collect();
                let samples = samples.map_err(|e| EimrunError::Read {
                    message: format!("reading {}: {e}", path.display()),
                })?;
                mix_down(&samples, channels)
            }
            (hound::SampleFormat::Float, 32) => {
                let samples: std::result::Result<Vec<f32>, _> = wav.samples::<f32>().collect();
                let samples = samples.map_err(|e| EimrunError::Read {
                    message: format!("reading {}: {e}", path.display()),
                })?;
                let as_i16: Vec<i16> = samples
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
                    .collect();
                mix_down(&as_i16, channels)
            }
            (format, bits) => {
                return Err(EimrunError::InvalidInput {
                    message: format!(
                        "unsupported wav format {format:?}/{bits}bit in {}",
                        path.display()
                    ),
                });
            }
        };

        let mut bytes = Vec::with_capacity(mono.len() * 2);
        for sample in mono {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        Ok(WavRecorder {
            reader: Some(Box::new(Cursor::new(bytes))),
        })
    }
}

fn mix_down(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| (frame.iter().map(|&s| i32::from(s)).sum::<i32>() / frame.len() as i32) as i16)
        .collect()
}

impl AudioRecorder for WavRecorder {
    fn reader(&mut self) -> Result<Box<dyn Read + Send>> {
        self.reader.take().ok_or_else(|| EimrunError::Read {
            message: "audio stream already taken".to_string(),
        })
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}
