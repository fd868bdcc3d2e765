//! Uploading measurement payloads to the ingestion service.
//!
//! Payloads are signed with HMAC-SHA256: the envelope is serialized with a
//! zeroed signature placeholder, the MAC is computed over those exact
//! bytes, and the real signature is spliced over the placeholder, so the
//! bytes on the wire are the bytes that were signed.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::defaults;
use crate::error::{EimrunError, Result};

/// A sensor for which values are uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    pub units: String,
}

/// Measurement data to upload for processing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub device_type: String,
    pub interval_ms: i64,
    /// All sensors in this payload.
    pub sensors: Vec<Sensor>,
    /// One row per measurement; each row holds one value per sensor.
    pub values: Vec<Vec<f64>>,
}

impl CollectPayload {
    /// Appends one set of measurements, one value per sensor.
    pub fn add_data(&mut self, row: Vec<f64>) -> Result<()> {
        if row.len() != self.sensors.len() {
            return Err(EimrunError::InvalidInput {
                message: format!(
                    "invalid data, got {} values, expect value for each of {} sensors",
                    row.len(),
                    self.sensors.len()
                ),
            });
        }
        self.values.push(row);
        Ok(())
    }
}

#[derive(Serialize)]
struct Protected {
    ver: &'static str,
    alg: &'static str,
    iat: u64,
}

#[derive(Serialize)]
struct CollectEnvelope<'a> {
    protected: Protected,
    signature: String,
    payload: &'a CollectPayload,
}

/// Upload options.
#[derive(Debug, Clone, Default)]
pub struct UploadOpts {
    /// Label attached to the sample.
    pub label: Option<String>,
    /// Reject the upload when an identical sample already exists.
    pub disallow_duplicates: bool,
}

/// Holds account keys and uploads payloads.
pub struct Collector {
    client: reqwest::blocking::Client,
    /// Base URL payloads are sent to. Resolved from `EI_HOST` at
    /// construction; may be overridden afterwards.
    pub base_url: String,
    hmac_key: Vec<u8>,
    api_key: String,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Creates a collector for the given API key and hex-encoded HMAC key.
    pub fn new(api_key: &str, hmac_key_hex: &str) -> Result<Self> {
        let hmac_key = hex::decode(hmac_key_hex).map_err(|e| EimrunError::InvalidInput {
            message: format!("parsing hmac key: {e}"),
        })?;
        Ok(Collector {
            client: reqwest::blocking::Client::new(),
            base_url: base_url_for_host(std::env::var("EI_HOST").ok().as_deref()),
            hmac_key,
            api_key: api_key.to_string(),
        })
    }

    /// Uploads the payload and returns the name of the stored sample.
    ///
    /// `category` must be `split`, `training`, or `testing`; `split` is
    /// routed to training or testing deterministically from the payload's
    /// content.
    pub fn upload(
        &self,
        filename: &str,
        category: &str,
        payload: &CollectPayload,
        opts: &UploadOpts,
    ) -> Result<String> {
        let category = match category {
            "training" | "testing" => category,
            "split" => resolve_split(payload)?,
            other => {
                return Err(EimrunError::InvalidInput {
                    message: format!(
                        "invalid category {other:?}, need one of: split, training, testing"
                    ),
                });
            }
        };

        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let body = signed_body(payload, &self.hmac_key, iat)?;

        let url = format!("{}/api/{category}/data", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-file-name", filename)
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(label) = &opts.label
            && !label.is_empty()
        {
            request = request.header("x-label", label);
        }
        if opts.disallow_duplicates {
            request = request.header("x-disallow-duplicates", "1");
        }

        let response = request.send().map_err(|e| EimrunError::Transport {
            message: format!("http request: {e}"),
        })?;

        let code = response.status();
        let text = response.text().map_err(|e| EimrunError::Transport {
            message: format!("reading response message: {e}"),
        })?;
        if !code.is_success() {
            let status = if text.is_empty() {
                code.to_string()
            } else {
                text
            };
            return Err(EimrunError::Http {
                code: code.as_u16(),
                status,
            });
        }
        Ok(text)
    }
}

/// Serializes the envelope with a zeroed signature, signs those bytes, and
/// splices the real signature in.
fn signed_body(payload: &CollectPayload, hmac_key: &[u8], iat: u64) -> Result<Vec<u8>> {
    let placeholder = "0".repeat(64);
    let envelope = CollectEnvelope {
        protected: Protected {
            ver: "v1",
            alg: "HS256",
            iat,
        },
        signature: placeholder.clone(),
        payload,
    };
    let mut body = serde_json::to_vec(&envelope).map_err(|e| EimrunError::InvalidInput {
        message: format!("encoding payload: {e}"),
    })?;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(hmac_key).map_err(|e| EimrunError::InvalidInput {
            message: format!("hmac key: {e}"),
        })?;
    mac.update(&body);
    let signature = hex::encode(mac.finalize().into_bytes());

    let start = body
        .windows(placeholder.len())
        .position(|window| window == placeholder.as_bytes())
        .ok_or_else(|| EimrunError::InvalidInput {
            message: "signature placeholder not found in encoded payload".to_string(),
        })?;
    body[start..start + signature.len()].copy_from_slice(signature.as_bytes());
    Ok(body)
}

/// Routes a `split` upload to training or testing, decided by the first
/// hex digit other than `f` of the payload's MD5.
fn resolve_split(payload: &CollectPayload) -> Result<&'static str> {
    let encoded = serde_json::to_vec(payload).map_err(|e| EimrunError::InvalidInput {
        message: format!("encoding payload: {e}"),
    })?;
    let digest = hex::encode(Md5::digest(&encoded));
    for c in digest.chars() {
        match c {
            'f' => continue,
            '0'..='9' | 'a' | 'b' => return Ok("training"),
            'c' | 'd' | 'e' => return Ok("testing"),
            _ => break,
        }
    }
    Err(EimrunError::InvalidInput {
        message: "cannot determine category for split".to_string(),
    })
}

/// Resolves the ingestion base URL for an `EI_HOST` value.
fn base_url_for_host(host: Option<&str>) -> String {
    match host {
        Some("localhost") => "http://localhost:4810".to_string(),
        Some(host) if host.ends_with("test.edgeimpulse.com") => {
            format!("http://ingestion.{host}")
        }
        Some(host) if host.ends_with("edgeimpulse.com") => {
            format!("https://ingestion.{host}")
        }
        _ => defaults::INGESTION_BASE_URL.to_string(),
    }
}
