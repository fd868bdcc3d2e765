//! Default constants shared across the crate.

use std::time::Duration;

/// Default audio capture sample rate in Hz.
///
/// Used when a model does not report a frequency and by the recorder
/// defaults. 16kHz is the common rate for keyword-spotting models.
pub const SAMPLE_RATE: u32 = 16000;

/// Name of the socket file a model process is asked to create inside its
/// working directory.
pub const SOCKET_FILE_NAME: &str = "runner.sock";

/// Delay between attempts to connect to a freshly started model process.
pub const SOCKET_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// How many connect attempts are made before startup is declared failed.
pub const SOCKET_RETRY_LIMIT: u32 = 1000;

/// Read deadline for a single request/response transaction.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte the model process appends after every JSON message.
pub const MESSAGE_SEPARATOR: u8 = 0x00;

/// Default interval between audio classifications.
pub const AUDIO_INTERVAL: Duration = Duration::from_millis(250);

/// Default interval between camera frames.
pub const IMAGE_INTERVAL: Duration = Duration::from_secs(1);

/// Default base URL for ingestion uploads.
pub const INGESTION_BASE_URL: &str = "https://ingestion.edgeimpulse.com";

/// Prefix for private temporary directories created by this crate.
pub const TEMP_DIR_PREFIX: &str = "eimrun-";
