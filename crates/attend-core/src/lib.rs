//! attend-core: Gallery loading, face matching and the live attendance session.
//!
//! Face detection, frame capture and report persistence are reached through
//! the `FaceAnalyzer`, `FrameSource` and `AttendanceSink` traits; concrete
//! implementations live in the sibling crates.

pub mod analyzer;
pub mod attendance;
pub mod enroll;
pub mod frame;
pub mod gallery;
pub mod session;
pub mod types;

pub use analyzer::{AnalyzerError, DetectedFace, FaceAnalyzer};
pub use attendance::{AttendanceRecord, AttendanceSink, CommitOutcome, NoopNotifier, Notifier, SinkError};
pub use enroll::{DirEnrollmentStore, EnrollError, EnrollmentStore};
pub use frame::{Frame, FrameError, FrameSource};
pub use gallery::Gallery;
pub use session::{
    LabelledFace, QuitSignal, RecognitionSession, SessionConfig, SessionError, SessionResult,
    SessionState, TerminationReason,
};
pub use types::{BoundingBox, Descriptor, DistanceMatcher, GalleryEntry, MatchResult, Matcher};
