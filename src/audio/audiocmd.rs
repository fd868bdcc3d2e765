//! Audio capture by running an external recording program.
//!
//! The recorder spawns `sox`, `rec`, or `arecord` writing raw signed
//! 16-bit little-endian samples to stdout, which becomes the byte stream
//! the audio pipeline reads. Closing the recorder kills the program, which
//! ends the stream with a read error.

use std::fs;
use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::audio::recorder::{AudioRecorder, Device};
use crate::defaults;
use crate::error::{EimrunError, Result};

/// External program used for recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordProgram {
    #[default]
    Sox,
    Rec,
    Arecord,
}

impl RecordProgram {
    fn command(self) -> &'static str {
        match self {
            RecordProgram::Sox => "sox",
            RecordProgram::Rec => "rec",
            RecordProgram::Arecord => "arecord",
        }
    }

    fn install_hint(self) -> &'static str {
        match self {
            RecordProgram::Sox | RecordProgram::Rec => "sudo apt install -y sox",
            RecordProgram::Arecord => "sudo apt install -y alsa-utils",
        }
    }
}

/// Options for a [`CmdRecorder`].
#[derive(Debug, Clone)]
pub struct CmdRecorderOpts {
    pub sample_rate: u32,
    pub channels: u16,
    /// Silence threshold for `rec`, in percent.
    pub threshold: f64,
    pub threshold_start: Option<f64>,
    pub threshold_end: Option<f64>,
    /// Seconds of silence after which `rec` stops.
    pub silence: f64,
    pub record_program: RecordProgram,
    /// Device to record from, as listed by [`list_devices`]. Empty selects
    /// the default device.
    pub device_id: Option<String>,
}

impl Default for CmdRecorderOpts {
    fn default() -> Self {
        CmdRecorderOpts {
            sample_rate: defaults::SAMPLE_RATE,
            channels: 1,
            threshold: 0.5,
            threshold_start: None,
            threshold_end: None,
            silence: 1.0,
            record_program: RecordProgram::default(),
            device_id: None,
        }
    }
}

/// A recording program running as a child process.
pub struct CmdRecorder {
    child: Child,
    stdout: Option<ChildStdout>,
}

impl CmdRecorder {
    /// Starts the recording program.
    pub fn start(opts: &CmdRecorderOpts) -> Result<Self> {
        let args = build_args(opts)?;
        debug!(
            "recording {} channels at {}Hz: {} {}",
            opts.channels,
            opts.sample_rate,
            opts.record_program.command(),
            args.join(" ")
        );

        let mut child = Command::new(opts.record_program.command())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    EimrunError::ToolNotFound {
                        tool: opts.record_program.command().to_string(),
                        hint: opts.record_program.install_hint().to_string(),
                    }
                } else {
                    EimrunError::Read {
                        message: format!("starting recorder: {e}"),
                    }
                }
            })?;

        let stdout = child.stdout.take();
        Ok(CmdRecorder { child, stdout })
    }
}

impl AudioRecorder for CmdRecorder {
    fn reader(&mut self) -> Result<Box<dyn Read + Send>> {
        match self.stdout.take() {
            Some(stdout) => Ok(Box::new(stdout)),
            None => Err(EimrunError::Read {
                message: "audio stream already taken".to_string(),
            }),
        }
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.child.kill();
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for CmdRecorder {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Builds the argument list for the recording program. All programs are
/// asked for raw signed 16-bit output on stdout.
fn build_args(opts: &CmdRecorderOpts) -> Result<Vec<String>> {
    let rate = opts.sample_rate.to_string();
    let channels = opts.channels.to_string();

    let args = match opts.record_program {
        RecordProgram::Sox => {
            let mut args = match &opts.device_id {
                None => vec!["-d".to_string()],
                Some(id) if cfg!(target_os = "macos") => {
                    vec!["-t".to_string(), "coreaudio".to_string(), id.clone()]
                }
                Some(id) => vec!["-t".to_string(), "alsa".to_string(), id.clone()],
            };
            args.extend(
                [
                    "-q", // no progress output
                    "-r", &rate, "-c", "1", "-e", "signed-integer", "-b", "16", "-t", "raw", "-",
                ]
                .iter()
                .map(|s| s.to_string()),
            );
            args
        }
        RecordProgram::Rec => {
            let threshold_start = match opts.threshold_start {
                Some(t) => t.to_string(),
                None => format!("{}%", opts.threshold),
            };
            let threshold_end = match opts.threshold_end {
                Some(t) => t.to_string(),
                None => format!("{}%", opts.threshold),
            };
            vec![
                "-q".to_string(),
                "-r".to_string(),
                rate,
                "-c".to_string(),
                channels,
                "-e".to_string(),
                "signed-integer".to_string(),
                "-b".to_string(),
                "16".to_string(),
                "-t".to_string(),
                "raw".to_string(),
                "-".to_string(),
                // End recording on silence.
                "silence".to_string(),
                "1".to_string(),
                "0.1".to_string(),
                threshold_start,
                "1".to_string(),
                opts.silence.to_string(),
                threshold_end,
            ]
        }
        RecordProgram::Arecord => {
            let mut args = Vec::new();
            if let Some(id) = &opts.device_id {
                args.push("-D".to_string());
                args.push(id.clone());
            }
            args.extend(
                ["-q", "-r", &rate, "-c", &channels, "-t", "raw", "-f", "S16_LE", "-"]
                    .iter()
                    .map(|s| s.to_string()),
            );
            args
        }
    };
    Ok(args)
}

/// Returns the audio recording devices available on the system.
///
/// On Linux this parses `/proc/asound/cards`; on macOS it parses the
/// device listing `sox` prints while probing CoreAudio. When nothing is
/// found, a single default-microphone placeholder is returned.
pub fn list_devices() -> Result<Vec<Device>> {
    let mut devices = Vec::new();

    if let Ok(cards) = fs::read_to_string("/proc/asound/cards") {
        devices = parse_asound_cards(&cards);
    } else if cfg!(target_os = "macos") {
        // The command is meant to fail; its probe output lists the devices.
        let output = Command::new("sox")
            .args(["-V6", "-n", "-t", "coreaudio", "doesnotexist"])
            .output()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    EimrunError::ToolNotFound {
                        tool: "sox".to_string(),
                        hint: RecordProgram::Sox.install_hint().to_string(),
                    }
                } else {
                    EimrunError::Read {
                        message: format!("listing devices with sox: {e}"),
                    }
                }
            })?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        devices = parse_sox_devices(&combined);
    }

    if devices.is_empty() {
        devices.push(Device {
            id: String::new(),
            name: "Default microphone".to_string(),
        });
    }
    Ok(devices)
}

/// Parses `/proc/asound/cards` lines such as
/// ` 0 [PCH            ]: HDA-Intel - HDA Intel PCH`.
fn parse_asound_cards(cards: &str) -> Vec<Device> {
    let mut devices = Vec::new();
    for line in cards.lines() {
        let Some((index, rest)) = line.trim_start().split_once(" [") else {
            continue;
        };
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Some((_, name)) = rest.split_once("]: ") else {
            continue;
        };
        devices.push(Device {
            id: format!("hw:{index},0"),
            name: name.trim().to_string(),
        });
    }
    devices
}

/// Parses the `Found Audio Device` lines from sox's CoreAudio probing.
fn parse_sox_devices(output: &str) -> Vec<Device> {
    const MARKER: &str = "sox INFO coreaudio: Found Audio Device \"";
    let mut devices: Vec<Device> = Vec::new();
    for line in output.lines() {
        let Some(rest) = line.strip_prefix(MARKER) else {
            continue;
        };
        let Some(id) = rest.strip_suffix('"') else {
            continue;
        };
        if devices.iter().any(|d| d.id == id) {
            continue;
        }
        devices.push(Device {
            id: id.to_string(),
            name: id.to_string(),
        });
    }
    devices
}
