//! Enrollment store: identity-keyed collections of sample images.

use crate::frame::Frame;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SAMPLE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid identity name: {0:?}")]
    InvalidName(String),
    #[error("invalid sample {path}: {reason}")]
    InvalidSample { path: PathBuf, reason: String },
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

impl EnrollError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        EnrollError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read-only view of enrolled identities and their samples.
///
/// Listings must come back in a stable order: the gallery's tie-break and
/// first-valid-sample policy both depend on it.
pub trait EnrollmentStore {
    fn identities(&self) -> Result<Vec<String>, EnrollError>;
    fn samples(&self, identity: &str) -> Result<Vec<String>, EnrollError>;
    fn read_sample(&self, identity: &str, sample: &str) -> Result<Frame, EnrollError>;
}

/// Directory-backed store: `<root>/<identity>/<sample>.{png,jpg,jpeg}`.
pub struct DirEnrollmentStore {
    root: PathBuf,
}

impl DirEnrollmentStore {
    /// Open the store, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EnrollError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| EnrollError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of enrolled identities (directories), regardless of sample validity.
    pub fn count_identities(&self) -> Result<usize, EnrollError> {
        Ok(self.identities()?.len())
    }

    /// Copy an image file into the identity's directory.
    ///
    /// The image must decode. An existing sample with the same file name is
    /// never overwritten; a numeric suffix is added instead.
    pub fn add_sample(&self, identity: &str, source: &Path) -> Result<PathBuf, EnrollError> {
        validate_identity(identity)?;

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|e| SAMPLE_EXTENSIONS.contains(&e.as_str()))
            .ok_or_else(|| EnrollError::InvalidSample {
                path: source.to_path_buf(),
                reason: "expected a .png, .jpg or .jpeg file".into(),
            })?;
        image::open(source).map_err(|e| EnrollError::InvalidSample {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;

        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(identity)
            .to_string();
        let dir = self.identity_dir(identity)?;
        let dest = free_path(&dir, &stem, &ext);

        fs::copy(source, &dest).map_err(|e| EnrollError::io(&dest, e))?;
        tracing::info!(identity, sample = %dest.display(), "sample enrolled");
        Ok(dest)
    }

    /// Store a captured frame as a JPEG sample named `<identity>_<n>.jpg`.
    pub fn add_frame(&self, identity: &str, frame: &Frame) -> Result<PathBuf, EnrollError> {
        validate_identity(identity)?;
        let dir = self.identity_dir(identity)?;
        let dest = numbered_path(&dir, identity, "jpg");

        frame.image.save(&dest)?;
        tracing::info!(identity, sample = %dest.display(), "captured sample enrolled");
        Ok(dest)
    }

    fn identity_dir(&self, identity: &str) -> Result<PathBuf, EnrollError> {
        let dir = self.root.join(identity);
        fs::create_dir_all(&dir).map_err(|e| EnrollError::io(&dir, e))?;
        Ok(dir)
    }
}

impl EnrollmentStore for DirEnrollmentStore {
    fn identities(&self) -> Result<Vec<String>, EnrollError> {
        let entries = fs::read_dir(&self.root).map_err(|e| EnrollError::io(&self.root, e))?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn samples(&self, identity: &str) -> Result<Vec<String>, EnrollError> {
        validate_identity(identity)?;
        let dir = self.root.join(identity);
        if !dir.is_dir() {
            return Err(EnrollError::UnknownIdentity(identity.to_string()));
        }
        let entries = fs::read_dir(&dir).map_err(|e| EnrollError::io(&dir, e))?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| is_sample_name(name))
            .collect();
        names.sort();
        Ok(names)
    }

    fn read_sample(&self, identity: &str, sample: &str) -> Result<Frame, EnrollError> {
        validate_identity(identity)?;
        let path = self.root.join(identity).join(sample);
        let image = image::open(&path)
            .map_err(|e| EnrollError::InvalidSample {
                path: path.clone(),
                reason: e.to_string(),
            })?
            .to_rgb8();
        Ok(Frame::new(image, 0))
    }
}

/// Reject names that are empty or could escape the store root.
pub fn validate_identity(name: &str) -> Result<(), EnrollError> {
    let invalid = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.contains("..");
    if invalid {
        return Err(EnrollError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn is_sample_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SAMPLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// First unused `<stem>.<ext>`, then `<stem>_1.<ext>`, `<stem>_2.<ext>`, ...
fn free_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{ext}"));
    if !candidate.exists() {
        return candidate;
    }
    numbered_path(dir, stem, ext)
}

/// First unused `<stem>_<n>.<ext>` counting from 1.
fn numbered_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    (1u64..)
        .map(|n| dir.join(format!("{stem}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| dir.join(format!("{stem}.{ext}")))
}
