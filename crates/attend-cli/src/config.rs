use anyhow::{Context, Result};
use attend_core::SessionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration: built-in defaults, then the optional TOML file named
/// by `ATTEND_CONFIG`, then `ATTEND_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Root of the `<identity>/<sample>` enrollment tree.
    pub enrollment_dir: PathBuf,
    /// Path to the SQLite attendance report.
    pub report_path: PathBuf,
    /// Directory containing det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// Maximum descriptor distance for a match.
    pub tolerance: f32,
    /// Frames per session; `None` runs until quit.
    pub frame_budget: Option<u64>,
    pub early_exit: bool,
    pub downsample: f32,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    /// Base URL; the identity is appended. Unset disables notification.
    pub notify_url: Option<String>,
    pub notify_timeout_ms: u64,
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    camera_width: Option<u32>,
    camera_height: Option<u32>,
    enrollment_dir: Option<PathBuf>,
    report_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    tolerance: Option<f32>,
    frame_budget: Option<u64>,
    early_exit: Option<bool>,
    downsample: Option<f32>,
    warmup_frames: Option<usize>,
    notify_url: Option<String>,
    notify_timeout_ms: Option<u64>,
}

impl Config {
    /// Defaults rooted at `data_dir` (normally `$XDG_DATA_HOME/attend`).
    pub fn defaults(data_dir: &Path) -> Self {
        let session = SessionConfig::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            enrollment_dir: data_dir.join("known_faces"),
            report_path: data_dir.join("attendance.db"),
            model_dir: data_dir.join("models"),
            tolerance: session.tolerance,
            frame_budget: session.frame_budget,
            early_exit: session.early_exit,
            downsample: session.downsample,
            warmup_frames: 4,
            notify_url: None,
            notify_timeout_ms: attend_report::notify::DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }

    /// Load from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(&|key: &str| std::env::var(key).ok())
    }

    /// Load with `env` standing in for the process environment.
    fn load_from(env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::defaults(&data_dir(env));

        if let Some(path) = env("ATTEND_CONFIG") {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            config.apply_toml(&text).with_context(|| format!("parsing config file {path}"))?;
            tracing::debug!(path = %path, "loaded config file");
        }

        config.apply_env(env);
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(text)?;
        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.camera_width {
            self.camera_width = v;
        }
        if let Some(v) = file.camera_height {
            self.camera_height = v;
        }
        if let Some(v) = file.enrollment_dir {
            self.enrollment_dir = v;
        }
        if let Some(v) = file.report_path {
            self.report_path = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.tolerance {
            self.tolerance = v;
        }
        if let Some(v) = file.frame_budget {
            self.frame_budget = budget(v);
        }
        if let Some(v) = file.early_exit {
            self.early_exit = v;
        }
        if let Some(v) = file.downsample {
            self.downsample = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if file.notify_url.is_some() {
            self.notify_url = file.notify_url.filter(|u| !u.is_empty());
        }
        if let Some(v) = file.notify_timeout_ms {
            self.notify_timeout_ms = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        if let Some(v) = env("ATTEND_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        self.camera_width = env_parse(env, "ATTEND_CAMERA_WIDTH", self.camera_width);
        self.camera_height = env_parse(env, "ATTEND_CAMERA_HEIGHT", self.camera_height);
        if let Some(v) = env("ATTEND_ENROLLMENT_DIR") {
            self.enrollment_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ATTEND_REPORT_PATH") {
            self.report_path = PathBuf::from(v);
        }
        if let Some(v) = env("ATTEND_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.tolerance = env_parse(env, "ATTEND_TOLERANCE", self.tolerance);
        let current = self.frame_budget.unwrap_or(0);
        self.frame_budget = budget(env_parse(env, "ATTEND_FRAME_BUDGET", current));
        if let Some(v) = env("ATTEND_EARLY_EXIT") {
            self.early_exit = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        self.downsample = env_parse(env, "ATTEND_DOWNSAMPLE", self.downsample);
        self.warmup_frames = env_parse(env, "ATTEND_WARMUP_FRAMES", self.warmup_frames);
        if let Some(v) = env("ATTEND_NOTIFY_URL") {
            self.notify_url = Some(v).filter(|u| !u.is_empty());
        }
        self.notify_timeout_ms = env_parse(env, "ATTEND_NOTIFY_TIMEOUT_MS", self.notify_timeout_ms);
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tolerance: self.tolerance,
            frame_budget: self.frame_budget,
            early_exit: self.early_exit,
            downsample: self.downsample,
        }
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

/// 0 means unlimited.
fn budget(frames: u64) -> Option<u64> {
    (frames > 0).then_some(frames)
}

fn data_dir(env: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attend")
}

fn env_parse<T: FromStr>(env: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable value");
            default
        }),
        None => default,
    }
}
