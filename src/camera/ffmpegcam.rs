//! Camera capture by running ffmpeg.
//!
//! ffmpeg writes interval-paced JPEG frames into a private temporary
//! directory; a filesystem watcher picks them up, decodes them, and
//! try-sends them on a bounded channel — dropping a frame when the
//! classifier has not yet taken the previous one, which is the producer
//! side of the image pipeline's backpressure contract.

use std::fs;
use std::io;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TrySendError, bounded, unbounded};
use log::debug;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tempfile::TempDir;

use crate::camera::recorder::{Device, ImageEvent, ImageRecorder};
use crate::defaults;
use crate::error::{EimrunError, Result};
use crate::tempdir;

const INSTALL_HINT: &str = "sudo apt install -y ffmpeg v4l-utils";

/// Options for an [`FfmpegRecorder`].
#[derive(Debug, Clone)]
pub struct FfmpegRecorderOpts {
    /// How often to capture a frame.
    pub interval: Duration,
    /// Device to record from, as listed by [`list_devices`]. Unset selects
    /// the first listed device.
    pub device_id: Option<String>,
}

impl Default for FfmpegRecorderOpts {
    fn default() -> Self {
        FfmpegRecorderOpts {
            interval: defaults::IMAGE_INTERVAL,
            device_id: None,
        }
    }
}

/// A camera frame source backed by an ffmpeg child process.
pub struct FfmpegRecorder {
    events: Receiver<ImageEvent>,
    child: Child,
    watcher: Option<RecommendedWatcher>,
    temp_dir: Option<TempDir>,
}

/// Returns the video capture devices available on the system, parsed from
/// `v4l2-ctl --list-devices`.
pub fn list_devices() -> Result<Vec<Device>> {
    let output = Command::new("v4l2-ctl")
        .arg("--list-devices")
        .output()
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                EimrunError::ToolNotFound {
                    tool: "v4l2-ctl".to_string(),
                    hint: INSTALL_HINT.to_string(),
                }
            } else {
                EimrunError::Read {
                    message: format!("listing devices using v4l2-ctl: {e}"),
                }
            }
        })?;
    if !output.status.success() {
        return Err(EimrunError::Read {
            message: format!("listing devices using v4l2-ctl: {}", output.status),
        });
    }
    let devices = parse_v4l2_devices(&String::from_utf8_lossy(&output.stdout));
    if devices.is_empty() {
        return Err(EimrunError::Read {
            message: "no camera devices available".to_string(),
        });
    }
    Ok(devices)
}

/// Parses `v4l2-ctl --list-devices` output: an unindented device name
/// followed by indented device-node lines. `bcm2835-*` helper nodes are
/// skipped.
fn parse_v4l2_devices(output: &str) -> Vec<Device> {
    let mut current = String::new();
    let mut devices = Vec::new();
    for line in output.lines() {
        if !line.starts_with('\t') {
            current = line.trim().to_string();
            continue;
        }
        if current.is_empty() || current.starts_with("bcm2835-") {
            continue;
        }
        let id = line.trim();
        if id.is_empty() {
            continue;
        }
        devices.push(Device {
            name: format!("{current} ({id})"),
            id: id.to_string(),
        });
    }
    devices
}

impl FfmpegRecorder {
    /// Starts ffmpeg and the frame watcher.
    pub fn start(opts: &FfmpegRecorderOpts) -> Result<Self> {
        let device_id = match &opts.device_id {
            Some(id) => id.clone(),
            None => list_devices()?.remove(0).id,
        };

        let temp_dir = tempdir::temp_dir()?;
        debug!("writing camera frames to {}", temp_dir.path().display());

        let framerate = (1.0 / opts.interval.as_secs_f64()).round().max(1.0) as u32;
        let args = [
            "-framerate",
            &framerate.to_string(),
            "-video_size",
            "640x480",
            "-c:v",
            "mjpeg",
            "-i",
            &device_id,
            "-f",
            "image2",
            "-c:v",
            "copy",
            "-bsf:v",
            "mjpeg2jpeg",
            "-qscale:v",
            "2",
            "frame%d.jpg",
        ]
        .map(String::from);
        debug!("starting ffmpeg with args {args:?}");

        let child = Command::new("ffmpeg")
            .args(&args)
            .current_dir(temp_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    EimrunError::ToolNotFound {
                        tool: "ffmpeg".to_string(),
                        hint: INSTALL_HINT.to_string(),
                    }
                } else {
                    EimrunError::Read {
                        message: format!("starting ffmpeg: {e}"),
                    }
                }
            })?;
        let (event_tx, event_rx) = bounded(1);
        let (fs_tx, fs_rx) = unbounded();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = fs_tx.send(res);
        });
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                let mut child = child;
                let _ = child.kill();
                let _ = child.wait();
                return Err(EimrunError::Read {
                    message: format!("new file change watcher: {e}"),
                });
            }
        };
        if let Err(e) = watcher.watch(temp_dir.path(), RecursiveMode::NonRecursive) {
            let mut child = child;
            let _ = child.kill();
            let _ = child.wait();
            return Err(EimrunError::Read {
                message: format!("watching frame dir: {e}"),
            });
        }

        let interval = opts.interval;
        thread::spawn(move || {
            let mut last: Option<Instant> = None;
            for res in fs_rx {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        let failed = Err(EimrunError::Read {
                            message: format!("watching for changes: {e}"),
                        });
                        if event_tx.send(failed).is_err() {
                            return;
                        }
                        continue;
                    }
                };
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for path in &event.paths {
                    if path.extension().is_none_or(|ext| ext != "jpg") {
                        continue;
                    }
                    // Frames arrive faster than the configured interval
                    // when ffmpeg catches up; skip the extras.
                    if last.is_some_and(|t| t.elapsed() < interval.mul_f64(0.9)) {
                        let _ = fs::remove_file(path);
                        continue;
                    }
                    let img = match image::open(path) {
                        Ok(img) => img,
                        Err(e) => {
                            debug!(
                                "decoding jpeg {}: {e} (may be partially written)",
                                path.display()
                            );
                            continue;
                        }
                    };
                    let _ = fs::remove_file(path);
                    match event_tx.try_send(Ok(img)) {
                        Ok(()) => last = Some(Instant::now()),
                        Err(TrySendError::Full(_)) => {
                            debug!("dropping image, classifier still busy");
                        }
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            }
        });

        Ok(FfmpegRecorder {
            events: event_rx,
            child,
            watcher: Some(watcher),
            temp_dir: Some(temp_dir),
        })
    }
}

impl ImageRecorder for FfmpegRecorder {
    fn events(&self) -> Receiver<ImageEvent> {
        self.events.clone()
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.child.kill();
        let _ = self.child.wait();
        // Dropping the watcher ends the frame thread; dropping the temp
        // dir removes any remaining frames.
        self.watcher = None;
        self.temp_dir = None;
        Ok(())
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v4l2_devices() {
        let output = "HD Webcam: HD Webcam (usb-0000:00:14.0-1):\n\
\t/dev/video0\n\
\t/dev/video1\n\
\n\
bcm2835-codec-decode (platform:bcm2835-codec):\n\
\t/dev/video10\n";
        let devices = parse_v4l2_devices(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "/dev/video0");
        assert_eq!(
            devices[0].name,
            "HD Webcam: HD Webcam (usb-0000:00:14.0-1): (/dev/video0)"
        );
        assert_eq!(devices[1].id, "/dev/video1");
    }

    #[test]
    fn test_parse_v4l2_devices_skips_bcm2835() {
        let output = "bcm2835-isp (platform:bcm2835-isp):\n\t/dev/video13\n";
        assert!(parse_v4l2_devices(output).is_empty());
    }

    #[test]
    fn test_parse_v4l2_devices_empty() {
        assert!(parse_v4l2_devices("").is_empty());
    }
}
