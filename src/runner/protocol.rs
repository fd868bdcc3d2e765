//! JSON messages exchanged with a model process.
//!
//! The transport carries newline-free JSON documents; the model process
//! appends a single `0x00` byte after each of its messages as a separator.
//! Responses are correlated to requests by strict ordering on the socket,
//! not by the `id` field, which exists for tracing only.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// How a model reports its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Scoring values for a fixed set of labels.
    #[default]
    Classification,
    /// Bounding boxes for recognized objects.
    ObjectDetection,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelType::Classification => "classification",
            ModelType::ObjectDetection => "object_detection",
        };
        write!(f, "{s}")
    }
}

/// The kind of physical input a model was trained on.
///
/// A pipeline only attaches to a runner whose sensor type matches: the
/// audio pipeline requires [`SensorType::Microphone`], the camera pipeline
/// [`SensorType::Camera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    #[default]
    Unknown,
    Microphone,
    Accelerometer,
    Camera,
}

impl SensorType {
    /// Maps the numeric `sensor` code from the hello response.
    /// Unrecognized codes map to [`SensorType::Unknown`] rather than failing.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => SensorType::Microphone,
            2 => SensorType::Accelerometer,
            3 => SensorType::Camera,
            _ => SensorType::Unknown,
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SensorType::Unknown => "unknown",
            SensorType::Microphone => "microphone",
            SensorType::Accelerometer => "accelerometer",
            SensorType::Camera => "camera",
        };
        write!(f, "{s}")
    }
}

/// Model parameters reported by the model process at handshake.
///
/// Read once; never refreshed for the lifetime of a runner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    /// Absent or unrecognized wire values decode as classification.
    #[serde(deserialize_with = "de_model_type")]
    pub model_type: ModelType,

    /// Numeric sensor code as sent on the wire.
    pub sensor: i64,

    /// Sensor kind derived from [`ModelParameters::sensor`]; resolved after
    /// decoding, not itself a wire field.
    #[serde(skip)]
    pub sensor_type: SensorType,

    pub interval_ms: f64,
    pub frequency: f64,

    /// Number of features one classify call must carry.
    pub input_features_count: usize,

    // For camera models only.
    pub image_input_height: u32,
    pub image_input_width: u32,
    pub image_channel_count: u32,

    /// Labels in resulting classifications.
    pub labels: Vec<String>,
    pub label_count: usize,

    pub has_anomaly: f64,
}

impl ModelParameters {
    /// Fills in the fields derived from raw wire values.
    pub(crate) fn resolve(&mut self) {
        self.sensor_type = SensorType::from_code(self.sensor);
    }

    /// True when the model reports an anomaly score next to its results.
    pub fn anomaly_detection(&self) -> bool {
        self.has_anomaly != 0.0
    }

    /// Duration of one full input window, for time-series sensors.
    fn window_secs(&self) -> Option<f64> {
        if self.frequency > 0.0 {
            Some(self.input_features_count as f64 / self.frequency)
        } else {
            None
        }
    }
}

fn de_model_type<'de, D>(deserializer: D) -> Result<ModelType, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        Some("object_detection") => ModelType::ObjectDetection,
        _ => ModelType::Classification,
    })
}

fn fmt_secs(secs: f64) -> String {
    if secs >= 1.0 && secs.fract().abs() < 1e-9 {
        format!("{}s", secs as u64)
    } else {
        format!("{}ms", (secs * 1000.0).round() as u64)
    }
}

impl fmt::Display for ModelParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.sensor_type, self.window_secs()) {
            (SensorType::Microphone, Some(secs)) => {
                write!(
                    f,
                    "microphone, frequency {}Hz, window length {}",
                    self.frequency,
                    fmt_secs(secs)
                )?;
            }
            (SensorType::Accelerometer, Some(secs)) => {
                write!(
                    f,
                    "accelerometer, frequency {}Hz, window length {}",
                    self.frequency,
                    fmt_secs(secs / 3.0)
                )?;
            }
            (SensorType::Camera, _) => {
                write!(
                    f,
                    "camera, {}x{} ({} channels)",
                    self.image_input_width, self.image_input_height, self.image_channel_count
                )?;
            }
            _ => {
                write!(
                    f,
                    "model type {}, sensor type {} ({})",
                    self.model_type, self.sensor_type, self.sensor
                )?;
            }
        }
        if !self.labels.is_empty() {
            write!(f, ", classes {}", self.labels.join(","))?;
        }
        Ok(())
    }
}

/// Project metadata stored in the model. Purely descriptive.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub deploy_version: i64,
    pub id: i64,
    pub name: String,
    pub owner: String,
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (v{})", self.owner, self.name, self.deploy_version)
    }
}

/// Status fields present in every response from the model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseStatus {
    pub id: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub(crate) trait ResponseEnvelope {
    fn status(&self) -> &ResponseStatus;
}

/// First request on a fresh connection, asking for model parameters.
#[derive(Debug, Serialize)]
pub(crate) struct HelloRequest {
    pub id: u64,
    pub hello: u32,
}

impl HelloRequest {
    pub fn new(id: u64) -> Self {
        HelloRequest { id, hello: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub(crate) struct HelloResponse {
    #[serde(flatten)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub model_parameters: ModelParameters,
    #[serde(default)]
    pub project: Project,
}

impl ResponseEnvelope for HelloResponse {
    fn status(&self) -> &ResponseStatus {
        &self.status
    }
}

/// A request to classify one feature vector.
///
/// The feature count is interpreted by the model; the client does not
/// validate it.
#[derive(Debug, Serialize)]
pub(crate) struct ClassifyRequest<'a> {
    pub id: u64,
    pub classify: &'a [f64],
}

/// One detected object in an object-detection result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundingBox {
    pub label: String,
    pub value: f64,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Result body of a classify response.
///
/// Exactly one of `classification` and `bounding_boxes` is populated,
/// determined by the model type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_boxes: Option<Vec<BoundingBox>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<f64>,
}

/// Per-stage processing times reported by the model, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub dsp: f64,
    pub classification: f64,
    pub anomaly: f64,
}

/// Decoded reply to a classify request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassifyResponse {
    #[serde(flatten)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub result: ClassifyResult,
    #[serde(default)]
    pub timing: Timing,
}

impl ResponseEnvelope for ClassifyResponse {
    fn status(&self) -> &ResponseStatus {
        &self.status
    }
}

impl fmt::Display for ClassifyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.status.success {
            return write!(f, "error: {}", self.status.error.as_deref().unwrap_or(""));
        }
        let ms = format!("{}ms", self.timing.classification as i64);
        let anomaly = match self.result.anomaly {
            Some(a) if a != 0.0 => format!(" anomaly={a:.4}"),
            _ => String::new(),
        };
        if let Some(classification) = &self.result.classification {
            let kv: Vec<String> = classification
                .iter()
                .map(|(label, value)| format!("{label}={value:.4}"))
                .collect();
            write!(f, "classification in {ms}: {}{anomaly}", kv.join(" "))
        } else if let Some(boxes) = &self.result.bounding_boxes {
            let parts: Vec<String> = boxes
                .iter()
                .map(|b| {
                    format!(
                        "x={},y={},width={},height={},label={},value={:.4}",
                        b.x, b.y, b.width, b.height, b.label, b.value
                    )
                })
                .collect();
            write!(f, "boundingboxes in {ms}: {}{anomaly}", parts.join(", "))
        } else {
            write!(f, "(result without classification and bounding boxes)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_type_from_code_mapping() {
        assert_eq!(SensorType::from_code(1), SensorType::Microphone);
        assert_eq!(SensorType::from_code(2), SensorType::Accelerometer);
        assert_eq!(SensorType::from_code(3), SensorType::Camera);
        assert_eq!(SensorType::from_code(0), SensorType::Unknown);
        assert_eq!(SensorType::from_code(4), SensorType::Unknown);
        assert_eq!(SensorType::from_code(-1), SensorType::Unknown);
    }

    #[test]
    fn test_hello_request_json() {
        let req = HelloRequest::new(1);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"id":1,"hello":1}"#);
    }

    #[test]
    fn test_classify_request_json() {
        let features = [0.25, 0.75];
        let req = ClassifyRequest {
            id: 2,
            classify: &features,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"id":2,"classify":[0.25,0.75]}"#);
    }

    #[test]
    fn test_hello_response_decodes_model_and_project() {
        let json = r#"{"id":1,"success":true,"model_parameters":{"model_type":"classification","sensor":1,"frequency":16000,"input_features_count":32000,"labels":["noise","yes"]},"project":{"id":1,"name":"p","owner":"o","deploy_version":1}}"#;
        let mut resp: HelloResponse = serde_json::from_str(json).unwrap();
        resp.model_parameters.resolve();

        assert!(resp.status.success);
        assert_eq!(resp.status.id, 1);
        let mp = &resp.model_parameters;
        assert_eq!(mp.model_type, ModelType::Classification);
        assert_eq!(mp.sensor_type, SensorType::Microphone);
        assert_eq!(mp.frequency, 16000.0);
        assert_eq!(mp.input_features_count, 32000);
        assert_eq!(mp.labels, vec!["noise".to_string(), "yes".to_string()]);

        assert_eq!(resp.project.id, 1);
        assert_eq!(resp.project.name, "p");
        assert_eq!(resp.project.owner, "o");
        assert_eq!(resp.project.deploy_version, 1);
    }

    #[test]
    fn test_absent_model_type_defaults_to_classification() {
        let json = r#"{"sensor":1,"frequency":16000}"#;
        let mp: ModelParameters = serde_json::from_str(json).unwrap();
        assert_eq!(mp.model_type, ModelType::Classification);
    }

    #[test]
    fn test_empty_model_type_defaults_to_classification() {
        let json = r#"{"model_type":"","sensor":1}"#;
        let mp: ModelParameters = serde_json::from_str(json).unwrap();
        assert_eq!(mp.model_type, ModelType::Classification);
    }

    #[test]
    fn test_unknown_model_type_defaults_to_classification() {
        let json = r#"{"model_type":"something_new"}"#;
        let mp: ModelParameters = serde_json::from_str(json).unwrap();
        assert_eq!(mp.model_type, ModelType::Classification);
    }

    #[test]
    fn test_object_detection_model_type() {
        let json = r#"{"model_type":"object_detection","sensor":3}"#;
        let mut mp: ModelParameters = serde_json::from_str(json).unwrap();
        mp.resolve();
        assert_eq!(mp.model_type, ModelType::ObjectDetection);
        assert_eq!(mp.sensor_type, SensorType::Camera);
    }

    #[test]
    fn test_classify_response_decodes_classification_and_timing() {
        let json = r#"{"id":2,"success":true,"result":{"classification":{"a":0.25,"b":0.75}},"timing":{"dsp":3,"classification":7,"anomaly":0}}"#;
        let resp: ClassifyResponse = serde_json::from_str(json).unwrap();
        assert!(resp.status.success);

        let classification = resp.result.classification.as_ref().unwrap();
        let mut expected = BTreeMap::new();
        expected.insert("a".to_string(), 0.25);
        expected.insert("b".to_string(), 0.75);
        assert_eq!(classification, &expected);

        assert!(resp.result.bounding_boxes.is_none());
        assert_eq!(resp.timing.dsp, 3.0);
        assert_eq!(resp.timing.classification, 7.0);
        assert_eq!(resp.timing.anomaly, 0.0);
    }

    #[test]
    fn test_classify_response_decodes_bounding_boxes() {
        let json = r#"{"id":3,"success":true,"result":{"bounding_boxes":[{"label":"cat","value":0.9,"x":10,"y":20,"width":30,"height":40}]},"timing":{"dsp":1,"classification":2,"anomaly":0}}"#;
        let resp: ClassifyResponse = serde_json::from_str(json).unwrap();
        let boxes = resp.result.bounding_boxes.as_ref().unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(
            boxes[0],
            BoundingBox {
                label: "cat".to_string(),
                value: 0.9,
                x: 10,
                y: 20,
                width: 30,
                height: 40,
            }
        );
        assert!(resp.result.classification.is_none());
    }

    #[test]
    fn test_failed_response_carries_error_string() {
        let json = r#"{"id":4,"success":false,"error":"boom"}"#;
        let resp: ClassifyResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.status.success);
        assert_eq!(resp.status.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_classification_display_sorted_by_label() {
        let json = r#"{"id":2,"success":true,"result":{"classification":{"yes":0.75,"noise":0.25}},"timing":{"classification":12}}"#;
        let resp: ClassifyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            resp.to_string(),
            "classification in 12ms: noise=0.2500 yes=0.7500"
        );
    }

    #[test]
    fn test_display_includes_anomaly_when_nonzero() {
        let json = r#"{"id":2,"success":true,"result":{"classification":{"a":1.0},"anomaly":0.5},"timing":{"classification":1}}"#;
        let resp: ClassifyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            resp.to_string(),
            "classification in 1ms: a=1.0000 anomaly=0.5000"
        );
    }

    #[test]
    fn test_model_parameters_display_microphone() {
        let mut mp = ModelParameters {
            sensor: 1,
            frequency: 16000.0,
            input_features_count: 32000,
            labels: vec!["noise".to_string(), "yes".to_string()],
            ..Default::default()
        };
        mp.resolve();
        assert_eq!(
            mp.to_string(),
            "microphone, frequency 16000Hz, window length 2s, classes noise,yes"
        );
    }

    #[test]
    fn test_model_parameters_display_camera() {
        let mut mp = ModelParameters {
            sensor: 3,
            image_input_width: 96,
            image_input_height: 96,
            image_channel_count: 3,
            ..Default::default()
        };
        mp.resolve();
        assert_eq!(mp.to_string(), "camera, 96x96 (3 channels)");
    }

    #[test]
    fn test_project_display() {
        let project = Project {
            deploy_version: 3,
            id: 7,
            name: "gestures".to_string(),
            owner: "lab".to_string(),
        };
        assert_eq!(project.to_string(), "lab/gestures (v3)");
    }
}
