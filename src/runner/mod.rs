//! Model process supervision and the typed request/response call.
//!
//! [`ProcessRunner`] owns one external model process and its socket;
//! [`Runner`] is the seam the pipelines classify through, so tests and
//! examples can substitute [`MockRunner`].

pub mod process;
pub mod protocol;

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub use process::{ProcessRunner, RunnerOpts};

use crate::error::{EimrunError, Result};
use protocol::{ClassifyResponse, ModelParameters, Project, SensorType};

/// A running model that can classify feature vectors.
pub trait Runner: Send + Sync {
    /// Parameters reported by the model at handshake.
    fn model_parameters(&self) -> &ModelParameters;

    /// Project metadata reported at handshake.
    fn project(&self) -> &Project;

    /// Runs the model on `features` and returns the decoded result.
    ///
    /// Concurrent callers are serialized; only one transaction is in
    /// flight at a time.
    fn classify(&self, features: &[f64]) -> Result<ClassifyResponse>;
}

/// In-memory [`Runner`] for tests and examples.
///
/// Records every feature vector it is asked to classify and returns a
/// configurable canned response, optionally after a fixed delay — useful
/// for exercising the pipelines' drop-when-busy behavior.
pub struct MockRunner {
    params: ModelParameters,
    project: Project,
    response: ClassifyResponse,
    fail_message: Option<String>,
    delay: Duration,
    calls: Mutex<Vec<Vec<f64>>>,
    call_count: AtomicUsize,
}

impl MockRunner {
    /// Creates a microphone mock: 16kHz, one-second window, labels a/b.
    pub fn new() -> Self {
        let mut params = ModelParameters {
            sensor: 1,
            frequency: 16000.0,
            input_features_count: 16000,
            labels: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        params.resolve();

        let mut classification = BTreeMap::new();
        classification.insert("a".to_string(), 0.25);
        classification.insert("b".to_string(), 0.75);
        let response = ClassifyResponse {
            status: protocol::ResponseStatus {
                id: 0,
                success: true,
                error: None,
            },
            result: protocol::ClassifyResult {
                classification: Some(classification),
                bounding_boxes: None,
                anomaly: None,
            },
            timing: protocol::Timing::default(),
        };

        MockRunner {
            params,
            project: Project {
                deploy_version: 1,
                id: 1,
                name: "mock".to_string(),
                owner: "tests".to_string(),
            },
            response,
            fail_message: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Sets the sensor kind (and the matching numeric code).
    pub fn with_sensor_type(mut self, sensor_type: SensorType) -> Self {
        self.params.sensor = match sensor_type {
            SensorType::Unknown => 0,
            SensorType::Microphone => 1,
            SensorType::Accelerometer => 2,
            SensorType::Camera => 3,
        };
        self.params.resolve();
        self
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.params.frequency = frequency;
        self
    }

    pub fn with_input_features_count(mut self, count: usize) -> Self {
        self.params.input_features_count = count;
        self
    }

    /// Configures a camera model of the given input shape.
    pub fn with_image_shape(mut self, width: u32, height: u32, channels: u32) -> Self {
        self.params.sensor = 3;
        self.params.resolve();
        self.params.image_input_width = width;
        self.params.image_input_height = height;
        self.params.image_channel_count = channels;
        self.params.input_features_count = (width * height) as usize;
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.params.labels = labels.iter().map(|s| s.to_string()).collect();
        self.params.label_count = labels.len();
        self
    }

    /// Sets the canned response returned by every classify call.
    pub fn with_response(mut self, response: ClassifyResponse) -> Self {
        self.response = response;
        self
    }

    /// Makes every classify call fail with a model error.
    pub fn with_failure(mut self, message: &str) -> Self {
        self.fail_message = Some(message.to_string());
        self
    }

    /// Delays every classify call, simulating a slow model.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Feature vectors received so far, in call order.
    pub fn calls(&self) -> Vec<Vec<f64>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of classify calls received so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner for MockRunner {
    fn model_parameters(&self) -> &ModelParameters {
        &self.params
    }

    fn project(&self) -> &Project {
        &self.project
    }

    fn classify(&self, features: &[f64]) -> Result<ClassifyResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(features.to_vec());
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match &self.fail_message {
            Some(message) => Err(EimrunError::Model {
                message: message.clone(),
            }),
            None => Ok(self.response.clone()),
        }
    }
}
