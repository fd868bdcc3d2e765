//! The image framing pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use image::DynamicImage;
use image::imageops::FilterType;
use log::{debug, warn};

use crate::camera::recorder::ImageEvent;
use crate::error::{EimrunError, Result};
use crate::runner::Runner;
use crate::runner::protocol::{ClassifyResponse, ModelParameters, SensorType};

/// Options for an [`ImageClassifier`].
#[derive(Debug, Clone, Default)]
pub struct ImageClassifierOpts {
    /// When set, every normalized frame is written here as
    /// `image-<seq>.png`. Sequence numbers start at 2; slot 1 belongs to
    /// the handshake transaction.
    pub trace_dir: Option<PathBuf>,
}

/// Outcome of classifying one frame.
#[derive(Debug)]
pub enum ClassifyEvent {
    /// One frame was classified.
    Classified {
        response: ClassifyResponse,
        /// Wall-clock time the classify round trip took.
        elapsed: Duration,
        /// The frame as delivered by the recorder, before normalization.
        image: DynamicImage,
    },
    /// The recorder reported an error, or classification of one frame
    /// failed. Neither ends the stream.
    Failed(EimrunError),
}

/// Classifies camera frames one at a time, in arrival order.
///
/// Unlike the audio pipeline there is no internal worker and no internal
/// dropping: each frame is normalized and classified inline, and
/// backpressure is the recorder's responsibility (see
/// [`crate::camera::ImageRecorder`]).
pub struct ImageClassifier {
    events: Receiver<ClassifyEvent>,
    stop: Sender<()>,
}

impl std::fmt::Debug for ImageClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageClassifier").finish_non_exhaustive()
    }
}

impl ImageClassifier {
    /// Starts the pipeline on a recorder's frame events.
    ///
    /// Fails with [`EimrunError::SensorMismatch`] unless the runner's
    /// model was trained on camera input. Closing the classifier stops its
    /// loop; the recorder and the runner stay owned by the caller.
    pub fn start(
        runner: Arc<dyn Runner>,
        frames: Receiver<ImageEvent>,
        opts: ImageClassifierOpts,
    ) -> Result<Self> {
        let params = runner.model_parameters().clone();
        if params.sensor_type != SensorType::Camera {
            return Err(EimrunError::SensorMismatch {
                expected: SensorType::Camera,
                actual: params.sensor_type,
            });
        }

        let (event_tx, event_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(1);

        thread::spawn(move || {
            let mut seq: u64 = 2;
            loop {
                select! {
                    recv(stop_rx) -> _ => return,
                    recv(frames) -> frame => {
                        let Ok(frame) = frame else { return };
                        let event = match frame {
                            Err(e) => ClassifyEvent::Failed(e),
                            Ok(img) => {
                                let event = classify_one(
                                    runner.as_ref(),
                                    &params,
                                    img,
                                    opts.trace_dir.as_deref(),
                                    seq,
                                );
                                seq += 1;
                                event
                            }
                        };
                        if event_tx.send(event).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(ImageClassifier {
            events: event_rx,
            stop: stop_tx,
        })
    }

    /// Stream of classification events, one per delivered frame, in
    /// arrival order. Bounded to one event; consumers must drain it.
    pub fn events(&self) -> &Receiver<ClassifyEvent> {
        &self.events
    }

    /// Signals the pipeline to stop on the next frame or control signal.
    /// Does not stop the recorder or the runner.
    pub fn close(&self) {
        let _ = self.stop.try_send(());
    }
}

/// Normalizes one frame to the model's input shape and classifies it.
fn classify_one(
    runner: &dyn Runner,
    params: &ModelParameters,
    source: DynamicImage,
    trace_dir: Option<&Path>,
    seq: u64,
) -> ClassifyEvent {
    let width = params.image_input_width;
    let height = params.image_input_height;

    let mut img = source.clone();
    if img.width() != width || img.height() != height {
        debug!(
            "resizing image from {}x{} to {width}x{height}",
            img.width(),
            img.height()
        );
        // Center crop keeps the aspect ratio; nearest keeps it fast.
        img = img.resize_to_fill(width, height, FilterType::Nearest);
    }

    let features: Vec<f64>;
    let normalized: DynamicImage;
    if params.image_channel_count == 3 {
        let rgba = match img {
            DynamicImage::ImageRgba8(pixels) => pixels,
            other => {
                debug!("converting to rgba image");
                other.to_rgba8()
            }
        };
        // Row-major, one 24-bit packed RGB integer per pixel.
        features = rgba
            .pixels()
            .map(|p| {
                let [r, g, b, _] = p.0;
                f64::from((u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b))
            })
            .collect();
        normalized = DynamicImage::ImageRgba8(rgba);
    } else {
        let gray = match img {
            DynamicImage::ImageLuma8(pixels) => pixels,
            other => {
                debug!("converting to gray image");
                other.to_luma8()
            }
        };
        // One grayscale intensity per pixel.
        features = gray.pixels().map(|p| f64::from(p.0[0])).collect();
        normalized = DynamicImage::ImageLuma8(gray);
    }

    write_trace(trace_dir, seq, &normalized);

    let start = Instant::now();
    match runner.classify(&features) {
        Ok(response) => ClassifyEvent::Classified {
            response,
            elapsed: start.elapsed(),
            image: source,
        },
        Err(e) => ClassifyEvent::Failed(e),
    }
}

fn write_trace(trace_dir: Option<&Path>, seq: u64, img: &DynamicImage) {
    let Some(dir) = trace_dir else {
        return;
    };
    let path = dir.join(format!("image-{seq}.png"));
    if let Err(e) = img.save(&path) {
        warn!("trace, writing {}: {e}", path.display());
        return;
    }
    debug!("trace {}", path.display());
}
