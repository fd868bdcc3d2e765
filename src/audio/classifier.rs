//! The audio windowing pipeline.

use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TrySendError, bounded};
use log::debug;

use crate::audio::window::SampleWindow;
use crate::error::{EimrunError, Result};
use crate::runner::Runner;
use crate::runner::protocol::{ClassifyResponse, SensorType};

/// Outcome of classifying one audio window.
#[derive(Debug)]
pub enum ClassifyEvent {
    /// One window was classified.
    Classified {
        response: ClassifyResponse,
        /// Wall-clock time the classify round trip took.
        elapsed: Duration,
        /// The window snapshot that was classified, oldest sample first.
        samples: Vec<f64>,
    },
    /// Classification of one window failed, or — for a `Read` error — the
    /// capture source failed and the event stream is about to end.
    Failed(EimrunError),
}

/// Continuously reads audio, classifies model-sized windows, and emits
/// events.
///
/// Capture and classification run on separate threads coupled by a
/// rendezvous channel: when the classify worker is still busy with the
/// previous window, the next snapshot is dropped rather than queued, so
/// the event stream never lags capture by more than the one in-flight
/// classification. Under sustained overload the latest window wins.
pub struct AudioClassifier {
    events: Receiver<ClassifyEvent>,
}

impl std::fmt::Debug for AudioClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClassifier").finish_non_exhaustive()
    }
}

impl AudioClassifier {
    /// Starts the pipeline on a raw stream of mono 16-bit little-endian
    /// PCM samples. Every `interval`, one interval's worth of samples is
    /// read and appended to the sliding window.
    ///
    /// Fails with [`EimrunError::SensorMismatch`] unless the runner's
    /// model was trained on microphone input. The runner and the capture
    /// source remain owned by the caller; closing the source ends this
    /// pipeline's event stream.
    pub fn start(
        runner: Arc<dyn Runner>,
        stream: Box<dyn Read + Send>,
        interval: Duration,
    ) -> Result<Self> {
        let params = runner.model_parameters().clone();
        if params.sensor_type != SensorType::Microphone {
            return Err(EimrunError::SensorMismatch {
                expected: SensorType::Microphone,
                actual: params.sensor_type,
            });
        }

        let interval_samples = (params.frequency * interval.as_secs_f64()).round() as usize;
        if interval_samples == 0 {
            return Err(EimrunError::InvalidInput {
                message: format!(
                    "interval {interval:?} holds no samples at {}Hz",
                    params.frequency
                ),
            });
        }
        if params.input_features_count == 0 {
            return Err(EimrunError::InvalidInput {
                message: "model reports an input features count of zero".to_string(),
            });
        }

        let (event_tx, event_rx) = bounded(1);
        // Rendezvous: a try_send only succeeds while the worker is waiting,
        // which is exactly the drop-when-busy policy.
        let (window_tx, window_rx) = bounded::<Vec<f64>>(0);

        let worker_runner = runner.clone();
        let worker_events = event_tx.clone();
        thread::spawn(move || {
            for samples in window_rx {
                let start = Instant::now();
                let event = match worker_runner.classify(&samples) {
                    Ok(response) => ClassifyEvent::Classified {
                        response,
                        elapsed: start.elapsed(),
                        samples,
                    },
                    Err(e) => ClassifyEvent::Failed(e),
                };
                if worker_events.send(event).is_err() {
                    return;
                }
            }
        });

        let mut stream = stream;
        thread::spawn(move || {
            let mut window = SampleWindow::new(params.input_features_count);
            let mut buf = vec![0u8; 2 * interval_samples];
            let mut samples = vec![0f64; interval_samples];

            loop {
                // A short read or stream closure ends this pipeline.
                if let Err(e) = stream.read_exact(&mut buf) {
                    let _ = event_tx.send(ClassifyEvent::Failed(EimrunError::Read {
                        message: format!("reading audio: {e}"),
                    }));
                    // Dropping the window sender ends the classify worker;
                    // the event channel closes once both threads are gone.
                    return;
                }

                for (sample, bytes) in samples.iter_mut().zip(buf.chunks_exact(2)) {
                    *sample = f64::from(i16::from_le_bytes([bytes[0], bytes[1]]));
                }
                window.push(&samples);

                if !window.is_full() {
                    continue;
                }

                match window_tx.try_send(window.snapshot()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!("dropping window, classifier still busy");
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        });

        Ok(AudioClassifier { events: event_rx })
    }

    /// Stream of classification events.
    ///
    /// Bounded to one event; consumers must drain it. The channel closes
    /// after the capture source has failed or been closed and the
    /// in-flight classification, if any, has finished.
    pub fn events(&self) -> &Receiver<ClassifyEvent> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;
    use std::io::Cursor;

    /// Raw little-endian PCM for the given samples.
    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Paces reads so the classify worker is parked at its rendezvous
    /// before each window arrives, making event counts deterministic.
    struct SlowReader<R> {
        inner: R,
        delay: Duration,
    }

    impl<R: Read> Read for SlowReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            thread::sleep(self.delay);
            self.inner.read(buf)
        }
    }

    fn paced(samples: &[i16]) -> Box<dyn Read + Send> {
        Box::new(SlowReader {
            inner: Cursor::new(pcm(samples)),
            delay: Duration::from_millis(10),
        })
    }

    /// Collects events until the channel closes.
    fn drain(classifier: &AudioClassifier) -> Vec<ClassifyEvent> {
        let mut events = Vec::new();
        while let Ok(event) = classifier
            .events()
            .recv_timeout(Duration::from_millis(2000))
        {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_sensor_mismatch_rejected_before_capture() {
        let runner = Arc::new(MockRunner::new().with_sensor_type(SensorType::Camera));
        let stream = Box::new(Cursor::new(Vec::<u8>::new()));
        let err = AudioClassifier::start(runner, stream, Duration::from_millis(100)).unwrap_err();
        match err {
            EimrunError::SensorMismatch { expected, actual } => {
                assert_eq!(expected, SensorType::Microphone);
                assert_eq!(actual, SensorType::Camera);
            }
            other => panic!("expected SensorMismatch, got: {other:?}"),
        }
    }

    #[test]
    fn test_zero_length_interval_rejected() {
        let runner = Arc::new(MockRunner::new().with_frequency(10.0));
        let stream = Box::new(Cursor::new(Vec::<u8>::new()));
        let err = AudioClassifier::start(runner, stream, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, EimrunError::InvalidInput { .. }));
    }

    #[test]
    fn test_classifies_first_full_window() {
        // 100Hz model, 40ms interval => 4 samples per read; window of 8.
        let runner = Arc::new(
            MockRunner::new()
                .with_frequency(100.0)
                .with_input_features_count(8),
        );
        let stream = paced(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let classifier =
            AudioClassifier::start(runner.clone(), stream, Duration::from_millis(40)).unwrap();
        let events = drain(&classifier);

        // One classified window, then the terminal read error at EOF.
        let classified: Vec<&ClassifyEvent> = events
            .iter()
            .filter(|e| matches!(e, ClassifyEvent::Classified { .. }))
            .collect();
        assert_eq!(classified.len(), 1);
        match classified[0] {
            ClassifyEvent::Classified { samples, .. } => {
                assert_eq!(samples, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
            }
            _ => unreachable!(),
        }
        assert!(matches!(
            events.last(),
            Some(ClassifyEvent::Failed(EimrunError::Read { .. }))
        ));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_windows_slide_across_intervals() {
        // Window of 4, 2 samples per interval: windows [1..4], [3..6], [5..8].
        let runner = Arc::new(
            MockRunner::new()
                .with_frequency(100.0)
                .with_input_features_count(4),
        );
        let stream = paced(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let classifier =
            AudioClassifier::start(runner.clone(), stream, Duration::from_millis(20)).unwrap();
        let events = drain(&classifier);

        // With an instant mock and paced reads, every window gets through
        // the rendezvous.
        assert_eq!(
            runner.calls(),
            vec![
                vec![1.0, 2.0, 3.0, 4.0],
                vec![3.0, 4.0, 5.0, 6.0],
                vec![5.0, 6.0, 7.0, 8.0],
            ]
        );
        assert!(matches!(
            events.last(),
            Some(ClassifyEvent::Failed(EimrunError::Read { .. }))
        ));
    }

    #[test]
    fn test_busy_classifier_drops_windows_without_deadlock() {
        // 40 intervals of 2 samples with a window of 2 would produce 40
        // classifications; a slow model must force drops instead of a
        // backlog.
        let runner = Arc::new(
            MockRunner::new()
                .with_frequency(100.0)
                .with_input_features_count(2)
                .with_delay(Duration::from_millis(80)),
        );
        let samples: Vec<i16> = (0..80).collect();
        let stream = Box::new(SlowReader {
            inner: Cursor::new(pcm(&samples)),
            delay: Duration::from_millis(1),
        });

        let classifier =
            AudioClassifier::start(runner.clone(), stream, Duration::from_millis(20)).unwrap();
        let events = drain(&classifier);

        let classified = events
            .iter()
            .filter(|e| matches!(e, ClassifyEvent::Classified { .. }))
            .count();
        assert!(classified >= 1, "at least the first window is classified");
        assert!(
            runner.call_count() < 40,
            "slow classification must drop windows, saw {} calls",
            runner.call_count()
        );
        // The terminal read error may arrive before the in-flight window's
        // event; only its presence is ordered, not its position.
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ClassifyEvent::Failed(EimrunError::Read { .. })))
        );
    }

    #[test]
    fn test_classify_error_does_not_end_stream() {
        // Model errors are wrapped into events; only read errors are
        // terminal.
        let runner = Arc::new(
            MockRunner::new()
                .with_frequency(100.0)
                .with_input_features_count(2)
                .with_failure("boom"),
        );
        let stream = paced(&[1, 2, 3, 4]);

        let classifier =
            AudioClassifier::start(runner.clone(), stream, Duration::from_millis(20)).unwrap();
        let events = drain(&classifier);

        let model_errors = events
            .iter()
            .filter(|e| matches!(e, ClassifyEvent::Failed(EimrunError::Model { .. })))
            .count();
        assert!(model_errors >= 1);
        // The stream still ends with the read error once the source dries up.
        assert!(matches!(
            events.last(),
            Some(ClassifyEvent::Failed(EimrunError::Read { .. }))
        ));
    }

    #[test]
    fn test_short_read_is_terminal() {
        // 3 bytes cannot hold the 2 samples an interval needs.
        let runner = Arc::new(
            MockRunner::new()
                .with_frequency(100.0)
                .with_input_features_count(2),
        );
        let stream = Box::new(Cursor::new(vec![0u8; 3]));

        let classifier = AudioClassifier::start(runner, stream, Duration::from_millis(20)).unwrap();
        let events = drain(&classifier);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ClassifyEvent::Failed(EimrunError::Read { .. })
        ));
    }
}
