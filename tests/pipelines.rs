//! Cross-module pipeline behavior, driven through the public API with a
//! mock runner standing in for a model process.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use image::{DynamicImage, RgbImage};

use eimrun::audio::{AudioClassifier, ClassifyEvent as AudioEvent};
use eimrun::camera::{ClassifyEvent as CameraEvent, ImageClassifier, ImageClassifierOpts};
use eimrun::{EimrunError, MockRunner, SensorType};

fn pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Paces reads so pipeline scheduling is deterministic.
struct SlowReader {
    inner: Cursor<Vec<u8>>,
    delay: Duration,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        thread::sleep(self.delay);
        self.inner.read(buf)
    }
}

#[test]
fn audio_pipeline_rejects_non_microphone_models() {
    let runner = Arc::new(MockRunner::new().with_sensor_type(SensorType::Accelerometer));
    let stream = Box::new(Cursor::new(Vec::<u8>::new()));
    let err = AudioClassifier::start(runner, stream, Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, EimrunError::SensorMismatch { .. }));
}

#[test]
fn image_pipeline_rejects_non_camera_models() {
    let runner = Arc::new(MockRunner::new());
    let (_tx, rx) = bounded(1);
    let err = ImageClassifier::start(runner, rx, ImageClassifierOpts::default()).unwrap_err();
    assert!(matches!(err, EimrunError::SensorMismatch { .. }));
}

#[test]
fn audio_pipeline_emits_results_then_clean_end_of_stream() {
    let runner = Arc::new(
        MockRunner::new()
            .with_frequency(100.0)
            .with_input_features_count(4),
    );
    let stream = Box::new(SlowReader {
        inner: Cursor::new(pcm(&[1, 2, 3, 4, 5, 6])),
        delay: Duration::from_millis(10),
    });

    let classifier =
        AudioClassifier::start(runner.clone(), stream, Duration::from_millis(20)).unwrap();

    let mut classified = 0;
    let mut failures = Vec::new();
    // The channel must close on its own once the source is exhausted;
    // a blocked receive here would be the bug.
    while let Ok(event) = classifier.events().recv_timeout(Duration::from_secs(2)) {
        match event {
            AudioEvent::Classified { samples, .. } => {
                classified += 1;
                assert_eq!(samples.len(), 4);
            }
            AudioEvent::Failed(e) => failures.push(e),
        }
    }

    assert_eq!(classified, 2, "windows [1..4] and [3..6] both classify");
    assert_eq!(failures.len(), 1, "exactly one terminal read error");
    assert!(matches!(failures[0], EimrunError::Read { .. }));
    assert_eq!(runner.calls()[0], vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(runner.calls()[1], vec![3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn audio_pipeline_drops_windows_under_sustained_overload() {
    // 30 windows' worth of input against a model that takes 60ms per
    // call: capture must never back up behind classification.
    let runner = Arc::new(
        MockRunner::new()
            .with_frequency(100.0)
            .with_input_features_count(2)
            .with_delay(Duration::from_millis(60)),
    );
    let samples: Vec<i16> = (0..60).collect();
    let stream = Box::new(SlowReader {
        inner: Cursor::new(pcm(&samples)),
        delay: Duration::from_millis(2),
    });

    let classifier =
        AudioClassifier::start(runner.clone(), stream, Duration::from_millis(20)).unwrap();

    let mut events = Vec::new();
    while let Ok(event) = classifier.events().recv_timeout(Duration::from_secs(2)) {
        events.push(event);
    }

    let classified = events
        .iter()
        .filter(|e| matches!(e, AudioEvent::Classified { .. }))
        .count();
    assert!(classified >= 1);
    assert!(
        runner.call_count() < 30,
        "overloaded pipeline must drop, saw {} calls",
        runner.call_count()
    );
    // The first window through is the oldest one available, not a
    // queued-up backlog: latest-window-wins discards old windows.
    assert!(
        events
            .iter()
            .any(|e| matches!(e, AudioEvent::Failed(EimrunError::Read { .. })))
    );
}

#[test]
fn image_pipeline_classifies_in_arrival_order_and_stops_on_close() {
    let runner = Arc::new(MockRunner::new().with_image_shape(1, 1, 3));
    let (tx, rx) = bounded(1);
    let classifier =
        ImageClassifier::start(runner.clone(), rx, ImageClassifierOpts::default()).unwrap();

    for rgb in [[255u8, 0, 0], [0, 255, 0], [0, 0, 255]] {
        tx.send(Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            1,
            1,
            image::Rgb(rgb),
        ))))
        .unwrap();
        let event = classifier
            .events()
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert!(matches!(event, CameraEvent::Classified { .. }));
    }

    assert_eq!(
        runner.calls(),
        vec![
            vec![f64::from(0xff0000u32)],
            vec![f64::from(0x00ff00u32)],
            vec![f64::from(0x0000ffu32)],
        ]
    );

    classifier.close();
    thread::sleep(Duration::from_millis(100));
    assert!(
        classifier
            .events()
            .recv_timeout(Duration::from_millis(200))
            .is_err(),
        "closed pipeline must not emit further events"
    );
}

#[test]
fn image_pipeline_wraps_model_errors_per_frame() {
    let runner = Arc::new(
        MockRunner::new()
            .with_image_shape(1, 1, 1)
            .with_failure("gpu fell over"),
    );
    let (tx, rx) = bounded(1);
    let classifier =
        ImageClassifier::start(runner, rx, ImageClassifierOpts::default()).unwrap();

    tx.send(Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
        1,
        1,
        image::Rgb([9, 9, 9]),
    ))))
    .unwrap();

    match classifier
        .events()
        .recv_timeout(Duration::from_secs(2))
        .unwrap()
    {
        CameraEvent::Failed(EimrunError::Model { message }) => {
            assert_eq!(message, "gpu fell over");
        }
        other => panic!("expected model failure event, got: {other:?}"),
    }
}
