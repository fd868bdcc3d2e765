use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use log::warn;

use eimrun::audio::audiocmd::{self, CmdRecorder, CmdRecorderOpts};
use eimrun::audio::{AudioClassifier, AudioRecorder, WavRecorder};
use eimrun::camera::{
    FfmpegRecorder, FfmpegRecorderOpts, ImageClassifier, ImageClassifierOpts, ImageRecorder,
    ffmpegcam,
};
use eimrun::cli::{Cli, Commands};
use eimrun::config::Config;
use eimrun::maf::Maf;
use eimrun::runner::{ProcessRunner, Runner, RunnerOpts};
use eimrun::{audio, camera, defaults};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Installs a SIGINT flag handler so event loops can exit and drop their
/// runners and recorders, cleaning up model processes and temp dirs.
fn install_sigint_handler() {
    let handler = handle_sigint as extern "C" fn(libc::c_int);
    // SAFETY: the handler only stores to an atomic.
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    install_sigint_handler();

    let config = Config::load_or_default(cli.config.as_deref())?.with_env_overrides();
    let trace_dir = cli.trace_dir.or_else(|| config.trace_dir.clone());

    match cli.command {
        Commands::Classify { model, features } => run_classify(trace_dir, &model, &features),
        Commands::Audio {
            model,
            interval,
            maf,
            device,
            wav,
        } => {
            let interval = interval
                .unwrap_or_else(|| Duration::from_millis(config.audio.interval_ms));
            run_audio(&config, trace_dir, &model, interval, maf, device, wav)
        }
        Commands::Image {
            model,
            interval,
            device,
        } => {
            let interval = interval
                .unwrap_or_else(|| Duration::from_millis(config.camera.interval_ms));
            run_image(&config, trace_dir, &model, interval, device)
        }
        Commands::Devices => run_devices(),
        #[cfg(feature = "ingest")]
        Commands::Collect {
            payload,
            category,
            label,
            disallow_duplicates,
            base_url,
            api_key,
            hmac_key,
        } => run_collect(
            &config,
            &payload,
            &category,
            label,
            disallow_duplicates,
            base_url,
            api_key,
            hmac_key,
        ),
    }
}

fn start_runner(model: &Path, trace_dir: Option<PathBuf>) -> Result<ProcessRunner> {
    let runner = ProcessRunner::start(
        model,
        RunnerOpts {
            work_dir: None,
            trace_dir,
        },
    )
    .with_context(|| format!("starting model {}", model.display()))?;
    println!("project {}", runner.project());
    println!("model {}", runner.model_parameters());
    Ok(runner)
}

fn run_classify(trace_dir: Option<PathBuf>, model: &Path, features: &[PathBuf]) -> Result<()> {
    let runner = start_runner(model, trace_dir)?;
    for file in features {
        let data =
            read_features(file).with_context(|| format!("reading {}", file.display()))?;
        match runner.classify(&data) {
            Ok(response) => println!("{response}"),
            Err(e) => eprintln!("eimrun: classify {}: {e}", file.display()),
        }
    }
    runner.close();
    Ok(())
}

/// Reads a file of comma-separated features. Entries are floats or
/// integer literals (`0x`/`0o`/`0b` prefixes included).
fn read_features(path: &Path) -> Result<Vec<f64>> {
    let contents = fs::read_to_string(path)?;
    let mut features = Vec::new();
    for entry in contents.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        features.push(parse_feature(entry).with_context(|| format!("parsing {entry:?}"))?);
    }
    Ok(features)
}

fn parse_feature(entry: &str) -> Result<f64> {
    if let Ok(value) = entry.parse::<f64>() {
        return Ok(value);
    }
    let (sign, magnitude) = match entry.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, entry.strip_prefix('+').unwrap_or(entry)),
    };
    let value = if let Some(hex) = magnitude
        .strip_prefix("0x")
        .or_else(|| magnitude.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)?
    } else if let Some(oct) = magnitude.strip_prefix("0o") {
        i64::from_str_radix(oct, 8)?
    } else if let Some(bin) = magnitude.strip_prefix("0b") {
        i64::from_str_radix(bin, 2)?
    } else {
        magnitude.parse::<i64>()?
    };
    Ok(sign * value as f64)
}

fn run_audio(
    config: &Config,
    trace_dir: Option<PathBuf>,
    model: &Path,
    interval: Duration,
    maf_size: Option<usize>,
    device: Option<String>,
    wav: Option<PathBuf>,
) -> Result<()> {
    let runner = Arc::new(start_runner(model, trace_dir)?);

    let mut recorder: Box<dyn AudioRecorder> = match wav {
        Some(path) => Box::new(WavRecorder::open(&path)?),
        None => {
            let frequency = runner.model_parameters().frequency;
            let opts = CmdRecorderOpts {
                sample_rate: if frequency > 0.0 {
                    frequency as u32
                } else {
                    defaults::SAMPLE_RATE
                },
                device_id: device.or_else(|| config.audio.device.clone()),
                record_program: config.audio.record_program,
                ..Default::default()
            };
            Box::new(CmdRecorder::start(&opts)?)
        }
    };

    let stream = recorder.reader()?;
    let classifier = AudioClassifier::start(runner.clone(), stream, interval)?;

    let mut maf = match maf_size {
        Some(size) if size > 0 => Some(Maf::new(size, &runner.model_parameters().labels)?),
        _ => None,
    };

    while !interrupted() {
        match classifier.events().recv_timeout(Duration::from_millis(100)) {
            Ok(audio::ClassifyEvent::Classified { mut response, .. }) => {
                if let (Some(maf), Some(classification)) =
                    (maf.as_mut(), response.result.classification.take())
                {
                    match maf.update(&classification) {
                        Ok(smoothed) => response.result.classification = Some(smoothed),
                        Err(e) => {
                            warn!("update moving average filter: {e}");
                            response.result.classification = Some(classification);
                        }
                    }
                }
                println!("{response}");
            }
            Ok(audio::ClassifyEvent::Failed(e)) => eprintln!("eimrun: {e}"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    recorder.close()?;
    runner.close();
    Ok(())
}

fn run_image(
    config: &Config,
    trace_dir: Option<PathBuf>,
    model: &Path,
    interval: Duration,
    device: Option<String>,
) -> Result<()> {
    let runner = Arc::new(start_runner(model, trace_dir.clone())?);

    let mut recorder = FfmpegRecorder::start(&FfmpegRecorderOpts {
        interval,
        device_id: device.or_else(|| config.camera.device.clone()),
    })?;
    let classifier =
        ImageClassifier::start(runner.clone(), recorder.events(), ImageClassifierOpts {
            trace_dir,
        })?;

    while !interrupted() {
        match classifier.events().recv_timeout(Duration::from_millis(100)) {
            Ok(camera::ClassifyEvent::Classified { response, .. }) => println!("{response}"),
            Ok(camera::ClassifyEvent::Failed(e)) => eprintln!("eimrun: {e}"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    classifier.close();
    recorder.close()?;
    runner.close();
    Ok(())
}

fn run_devices() -> Result<()> {
    println!("audio devices:");
    match audiocmd::list_devices() {
        Ok(devices) => {
            for device in devices {
                println!("  {}: {}", device.id, device.name);
            }
        }
        Err(e) => eprintln!("  eimrun: {e}"),
    }

    println!("camera devices:");
    match ffmpegcam::list_devices() {
        Ok(devices) => {
            for device in devices {
                println!("  {}: {}", device.id, device.name);
            }
        }
        Err(e) => eprintln!("  eimrun: {e}"),
    }
    Ok(())
}

#[cfg(feature = "ingest")]
#[allow(clippy::too_many_arguments)]
fn run_collect(
    config: &Config,
    payload_path: &Path,
    category: &str,
    label: Option<String>,
    disallow_duplicates: bool,
    base_url: Option<String>,
    api_key: Option<String>,
    hmac_key: Option<String>,
) -> Result<()> {
    use eimrun::ingest::{CollectPayload, Collector, UploadOpts};

    let api_key = api_key
        .or_else(|| config.ingest.api_key.clone())
        .context("no api key; pass --api-key or set [ingest] api_key")?;
    let hmac_key = hmac_key
        .or_else(|| config.ingest.hmac_key.clone())
        .context("no hmac key; pass --hmac-key or set [ingest] hmac_key")?;

    let contents = fs::read_to_string(payload_path)
        .with_context(|| format!("reading {}", payload_path.display()))?;
    let payload: CollectPayload = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", payload_path.display()))?;

    let mut collector = Collector::new(&api_key, &hmac_key)?;
    if let Some(base_url) = base_url.or_else(|| config.ingest.base_url.clone()) {
        collector.base_url = base_url;
    }

    let filename = payload_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "sample".to_string());
    let opts = UploadOpts {
        label,
        disallow_duplicates,
    };
    let name = collector.upload(&filename, category, &payload, &opts)?;
    println!("uploaded: sample name: {name}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feature_formats() {
        assert_eq!(parse_feature("1.5").unwrap(), 1.5);
        assert_eq!(parse_feature("-2").unwrap(), -2.0);
        assert_eq!(parse_feature("0x10").unwrap(), 16.0);
        assert_eq!(parse_feature("-0x10").unwrap(), -16.0);
        assert_eq!(parse_feature("0b101").unwrap(), 5.0);
        assert_eq!(parse_feature("0o17").unwrap(), 15.0);
        assert!(parse_feature("nope").is_err());
    }

    #[test]
    fn test_read_features_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.txt");
        fs::write(&path, "0x12, 3.5, -7,\n").unwrap();
        assert_eq!(read_features(&path).unwrap(), vec![18.0, 3.5, -7.0]);
    }
}
