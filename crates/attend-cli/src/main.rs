use anyhow::{bail, Result};
use attend_core::enroll::validate_identity;
use attend_core::{
    gallery, DirEnrollmentStore, EnrollmentStore, FaceAnalyzer, LabelledFace, QuitSignal,
    RecognitionSession, SessionResult,
};
use attend_hw::Camera;
use attend_report::{HttpNotifier, ReportStore};
use attend_vision::OnnxAnalyzer;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

/// Frames tried per requested sample before `register --capture` gives up.
const CAPTURE_ATTEMPTS_PER_SAMPLE: usize = 20;

#[derive(Parser)]
#[command(name = "attend", about = "Face-recognition attendance logger")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and log attendance for recognized faces
    Run {
        /// Stop after this many frames (0 = unlimited)
        #[arg(long)]
        frames: Option<u64>,
        /// Keep running until Ctrl-C instead of stopping at the first recognition
        #[arg(long)]
        continuous: bool,
        /// Maximum descriptor distance for a match
        #[arg(long)]
        tolerance: Option<f32>,
        /// Scale frames by this factor before analysis (e.g. 0.25)
        #[arg(long)]
        downsample: Option<f32>,
    },
    /// Register a person from image files or camera captures
    Register {
        /// Identity name (becomes the enrollment directory name)
        #[arg(short, long)]
        name: String,
        /// Image files to enroll
        #[arg(long, num_args = 1.., required_unless_present = "capture", conflicts_with = "capture")]
        image: Vec<PathBuf>,
        /// Number of frames with a face to capture from the camera
        #[arg(long)]
        capture: Option<usize>,
    },
    /// Show the attendance report for a day
    Report {
        /// Day to report (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
        /// Write the day's records to a JSON file
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Show registered, present and absent counts for today
    Status,
    /// List capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Run {
            frames,
            continuous,
            tolerance,
            downsample,
        } => {
            if continuous {
                config.frame_budget = None;
                config.early_exit = false;
            }
            if let Some(frames) = frames {
                config.frame_budget = (frames > 0).then_some(frames);
            }
            if let Some(tolerance) = tolerance {
                config.tolerance = tolerance;
            }
            if let Some(downsample) = downsample {
                config.downsample = downsample;
            }

            let quit = QuitSignal::new();
            let ctrl_c = {
                let quit = quit.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("quit requested");
                        quit.trigger();
                    }
                })
            };

            let result = blocking(move || run_session(&config, quit)).await;
            ctrl_c.abort();
            let result = result?;

            print_result(&result);
            if result.termination.is_abnormal() {
                bail!("session ended abnormally: {}", result.termination);
            }
        }
        Commands::Register {
            name,
            image,
            capture,
        } => match capture {
            Some(count) => blocking(move || register_capture(&config, &name, count)).await?,
            None => register_images(&config, &name, &image)?,
        },
        Commands::Report { date, json, export } => {
            let day = date.unwrap_or_else(|| Local::now().date_naive());
            report(&config, day, json, export)?;
        }
        Commands::Status => status(&config)?,
        Commands::Devices => devices(),
    }

    Ok(())
}

/// Run camera and model work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

fn run_session(config: &Config, quit: QuitSignal) -> Result<SessionResult> {
    let store = DirEnrollmentStore::open(&config.enrollment_dir)?;
    let mut analyzer = OnnxAnalyzer::load(&config.model_dir)?;
    let gallery = gallery::load(&store, &mut analyzer)?;
    if gallery.is_empty() {
        tracing::warn!(dir = %config.enrollment_dir.display(), "gallery is empty; no one can be recognized");
    }

    let mut report = ReportStore::open(&config.report_path)?;
    let notifier = config
        .notify_url
        .as_ref()
        .map(|url| HttpNotifier::new(url.clone()).with_timeout(config.notify_timeout()));

    let mut camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)?;
    camera.warm_up(config.warmup_frames)?;

    let mut session = RecognitionSession::new(gallery, config.session_config(), &mut analyzer, &mut report)
        .with_quit_signal(quit)
        .with_observer(|seq: u64, faces: &[LabelledFace]| {
            for face in faces {
                tracing::debug!(seq, label = face.display_label(), distance = ?face.distance, "face");
            }
        });
    if let Some(notifier) = &notifier {
        session = session.with_notifier(notifier);
    }

    let result = session.run(camera)?;

    if let Some(notifier) = &notifier {
        let unsent = notifier.flush(config.notify_timeout());
        if unsent > 0 {
            tracing::warn!(unsent, "remote notifications still pending at exit");
        }
    }
    Ok(result)
}

fn print_result(result: &SessionResult) {
    println!("Session ended: {}", result.termination);
    println!("Frames processed: {}", result.frames_processed);
    if result.recognized.is_empty() {
        println!("Recognized: none");
    } else {
        let names: Vec<&str> = result.recognized.iter().map(String::as_str).collect();
        println!("Recognized: {}", names.join(", "));
    }
    println!("New attendance records: {}", result.commits);
}

fn register_images(config: &Config, name: &str, images: &[PathBuf]) -> Result<()> {
    validate_identity(name)?;
    let store = DirEnrollmentStore::open(&config.enrollment_dir)?;
    for image in images {
        let dest = store.add_sample(name, image)?;
        println!("Enrolled {} as {}", image.display(), dest.display());
    }
    Ok(())
}

fn register_capture(config: &Config, name: &str, count: usize) -> Result<()> {
    validate_identity(name)?;
    let store = DirEnrollmentStore::open(&config.enrollment_dir)?;
    let mut analyzer = OnnxAnalyzer::load(&config.model_dir)?;
    let mut camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)?;
    camera.warm_up(config.warmup_frames)?;

    let max_attempts = count.saturating_mul(CAPTURE_ATTEMPTS_PER_SAMPLE);
    let mut saved = 0;
    let mut attempts = 0;
    while saved < count && attempts < max_attempts {
        attempts += 1;
        let frame = camera.capture_frame()?;
        let faces = analyzer.analyze(&frame)?;
        if faces.len() != 1 {
            tracing::debug!(faces = faces.len(), "need exactly one face; retrying");
            continue;
        }
        let path = store.add_frame(name, &frame)?;
        saved += 1;
        println!("Captured {saved}/{count}: {}", path.display());
    }

    if saved < count {
        bail!("captured {saved} of {count} samples; make sure exactly one face is clearly visible");
    }
    Ok(())
}

fn report(config: &Config, day: NaiveDate, json: bool, export: Option<PathBuf>) -> Result<()> {
    let store = ReportStore::open(&config.report_path)?;

    if let Some(path) = export {
        let count = store.export_json(day, &path)?;
        println!("Exported {count} record(s) for {day} to {}", path.display());
        return Ok(());
    }

    let records = store.records_for(day)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No attendance recorded for {day}");
    } else {
        println!("{:<24} TIME", "IDENTITY");
        for record in &records {
            println!("{:<24} {}", record.identity, record.time.format("%H:%M:%S"));
        }
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let store = DirEnrollmentStore::open(&config.enrollment_dir)?;
    let report = ReportStore::open(&config.report_path)?;
    let today = Local::now().date_naive();

    let registered = store.identities()?;
    let present: BTreeSet<String> = report
        .records_for(today)?
        .into_iter()
        .map(|r| r.identity)
        .collect();
    let absent: Vec<&str> = registered
        .iter()
        .filter(|identity| !present.contains(*identity))
        .map(String::as_str)
        .collect();

    println!("Date:       {today}");
    println!("Registered: {}", store.count_identities()?);
    println!("Present:    {}", present.len());
    println!("Absent:     {}", absent.len());
    if !absent.is_empty() {
        println!("  {}", absent.join(", "));
    }
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No capture devices found");
        return;
    }
    for device in devices {
        println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from(["attend", "run", "--continuous", "--downsample", "0.25"]).unwrap();
        match cli.command {
            Commands::Run { continuous, downsample, frames, .. } => {
                assert!(continuous);
                assert_eq!(downsample, Some(0.25));
                assert_eq!(frames, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_register_needs_a_source() {
        assert!(Cli::try_parse_from(["attend", "register", "--name", "alice"]).is_err());
        assert!(Cli::try_parse_from([
            "attend", "register", "--name", "alice", "--image", "a.jpg", "--capture", "3"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["attend", "register", "--name", "alice", "--capture", "3"]).is_ok());
    }

    #[test]
    fn test_report_date_parses() {
        let cli = Cli::try_parse_from(["attend", "report", "--date", "2026-10-19"]).unwrap();
        match cli.command {
            Commands::Report { date, .. } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 10, 19));
            }
            _ => panic!("expected report"),
        }
        assert!(Cli::try_parse_from(["attend", "report", "--date", "19/10/2026"]).is_err());
    }

    #[test]
    fn test_report_and_status_on_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::defaults(dir.path());
        config.enrollment_dir = dir.path().join("faces");
        config.report_path = dir.path().join("attendance.db");

        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        ReportStore::open(&config.report_path)
            .unwrap()
            .record("alice", day.and_hms_opt(9, 0, 0).unwrap())
            .unwrap();

        let export = dir.path().join("report.json");
        report(&config, day, false, Some(export.clone())).unwrap();
        let text = std::fs::read_to_string(&export).unwrap();
        assert!(text.contains("alice"));

        status(&config).unwrap();
    }

    #[test]
    fn test_register_images_rejects_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::defaults(dir.path());
        assert!(register_images(&config, "../evil", &[]).is_err());
    }
}
