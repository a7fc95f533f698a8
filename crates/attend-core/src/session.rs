//! Live recognition session.
//!
//! A session owns its gallery and session log for one run over a frame
//! source. Each frame is analyzed, every detected face is matched against
//! the gallery, and the first sighting of an identity on a given day is
//! committed to the attendance sink. The loop is synchronous: acquisition,
//! analysis, matching and commits all happen on the calling thread.

use crate::analyzer::FaceAnalyzer;
use crate::attendance::{AttendanceSink, CommitOutcome, NoopNotifier, Notifier};
use crate::frame::{Frame, FrameSource};
use crate::gallery::Gallery;
use crate::types::{BoundingBox, DistanceMatcher, Matcher};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Label given to detections that match no gallery entry.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Default match tolerance for L2-normalized ArcFace descriptors
/// (Euclidean 1.10 is roughly cosine similarity 0.40).
pub const DEFAULT_TOLERANCE: f32 = 1.10;

pub const DEFAULT_FRAME_BUDGET: u64 = 400;

static NOOP_NOTIFIER: NoopNotifier = NoopNotifier;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Maximum descriptor distance for a match (inclusive).
    pub tolerance: f32,
    /// Stop after this many acquired frames; `None` runs until quit or device error.
    pub frame_budget: Option<u64>,
    /// Stop as soon as any identity has been credited in this session.
    pub early_exit: bool,
    /// Scale factor applied before analysis; 1.0 analyzes full frames.
    pub downsample: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            frame_budget: Some(DEFAULT_FRAME_BUDGET),
            early_exit: true,
            downsample: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    Quit,
    BudgetExhausted,
    EarlyExit,
    DeviceError(String),
}

impl TerminationReason {
    /// Only device failure is an abnormal end.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, TerminationReason::DeviceError(_))
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Quit => write!(f, "quit signal"),
            TerminationReason::BudgetExhausted => write!(f, "frame budget exhausted"),
            TerminationReason::EarlyExit => write!(f, "early exit on recognition"),
            TerminationReason::DeviceError(e) => write!(f, "device error: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped(TerminationReason),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session is not idle (state: {0:?})")]
    NotIdle(SessionState),
}

/// Cloneable quit flag, checked before each frame acquisition.
#[derive(Clone, Default)]
pub struct QuitSignal(Arc<AtomicBool>);

impl QuitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A detection as it should be drawn, in full-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelledFace {
    pub bbox: BoundingBox,
    pub label: Option<String>,
    pub distance: Option<f32>,
}

impl LabelledFace {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

#[derive(Debug, Clone)]
pub struct SessionResult {
    /// Identities credited during this session (new rows or already on record).
    pub recognized: BTreeSet<String>,
    /// Number of new attendance rows written.
    pub commits: usize,
    pub frames_processed: u64,
    pub termination: TerminationReason,
}

type Clock<'a> = Box<dyn Fn() -> NaiveDateTime + 'a>;
type Observer<'a> = Box<dyn FnMut(u64, &[LabelledFace]) + 'a>;

/// One run of the recognition loop.
pub struct RecognitionSession<'a> {
    gallery: Gallery,
    config: SessionConfig,
    analyzer: &'a mut dyn FaceAnalyzer,
    sink: &'a mut dyn AttendanceSink,
    notifier: &'a dyn Notifier,
    matcher: Box<dyn Matcher + 'a>,
    quit: QuitSignal,
    clock: Clock<'a>,
    observer: Option<Observer<'a>>,
    /// Identity -> day it was credited.
    log: HashMap<String, NaiveDate>,
    state: SessionState,
}

impl<'a> RecognitionSession<'a> {
    pub fn new(
        gallery: Gallery,
        config: SessionConfig,
        analyzer: &'a mut dyn FaceAnalyzer,
        sink: &'a mut dyn AttendanceSink,
    ) -> Self {
        Self {
            gallery,
            config,
            analyzer,
            sink,
            notifier: &NOOP_NOTIFIER,
            matcher: Box::new(DistanceMatcher),
            quit: QuitSignal::new(),
            clock: Box::new(|| chrono::Local::now().naive_local()),
            observer: None,
            log: HashMap::new(),
            state: SessionState::Idle,
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_quit_signal(mut self, quit: QuitSignal) -> Self {
        self.quit = quit;
        self
    }

    pub fn with_matcher(mut self, matcher: impl Matcher + 'a) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Replace the wall clock used for attendance timestamps.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Receive every analyzed frame's labelled detections (overlay hook).
    pub fn with_observer(mut self, observer: impl FnMut(u64, &[LabelledFace]) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Whether `identity` has been credited for `day` in this session.
    pub fn is_logged(&self, identity: &str, day: NaiveDate) -> bool {
        self.log.get(identity) == Some(&day)
    }

    /// Run the loop until quit, budget, early exit, or device failure.
    ///
    /// The source is dropped before this returns on every path. A device
    /// failure is reported through `SessionResult::termination`, not as an error.
    pub fn run<S: FrameSource>(&mut self, mut source: S) -> Result<SessionResult, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::NotIdle(self.state.clone()));
        }
        self.state = SessionState::Running;

        tracing::info!(
            gallery = self.gallery.len(),
            tolerance = self.config.tolerance,
            frame_budget = ?self.config.frame_budget,
            early_exit = self.config.early_exit,
            downsample = self.config.downsample,
            "recognition session started"
        );

        let mut recognized = BTreeSet::new();
        let mut commits = 0usize;
        let mut frames_processed = 0u64;

        let termination = loop {
            if self.quit.is_triggered() {
                break TerminationReason::Quit;
            }
            if self
                .config
                .frame_budget
                .is_some_and(|budget| frames_processed >= budget)
            {
                break TerminationReason::BudgetExhausted;
            }

            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, frames = frames_processed, "frame acquisition failed");
                    break TerminationReason::DeviceError(e.to_string());
                }
            };
            frames_processed += 1;

            self.process_frame(&frame, &mut recognized, &mut commits);

            if self.config.early_exit && !recognized.is_empty() {
                break TerminationReason::EarlyExit;
            }
        };

        drop(source);

        tracing::info!(
            reason = %termination,
            frames = frames_processed,
            recognized = recognized.len(),
            commits,
            "recognition session stopped"
        );
        self.state = SessionState::Stopped(termination.clone());

        Ok(SessionResult {
            recognized,
            commits,
            frames_processed,
            termination,
        })
    }

    fn process_frame(
        &mut self,
        frame: &Frame,
        recognized: &mut BTreeSet<String>,
        commits: &mut usize,
    ) {
        let factor = self.config.downsample;
        let downsampled = factor > 0.0 && factor < 1.0;
        let small;
        let target = if downsampled {
            small = frame.downsample(factor);
            &small
        } else {
            frame
        };

        let faces = match self.analyzer.analyze(target) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "frame analysis failed; skipping frame");
                return;
            }
        };
        tracing::debug!(seq = frame.sequence, faces = faces.len(), "frame analyzed");

        let now = (self.clock)();
        let mut labelled = Vec::with_capacity(faces.len());

        for face in faces {
            let result = self.matcher.compare(
                &face.descriptor,
                self.gallery.entries(),
                self.config.tolerance,
            );
            if let Some(identity) = &result.identity {
                self.credit(identity, now, recognized, commits);
            }

            let bbox = if downsampled {
                face.bbox.scaled(1.0 / factor)
            } else {
                face.bbox
            };
            labelled.push(LabelledFace {
                bbox,
                label: result.identity,
                distance: result.distance,
            });
        }

        if let Some(observer) = self.observer.as_mut() {
            observer(frame.sequence, &labelled);
        }
    }

    /// Commit attendance for a matched identity unless already credited today.
    fn credit(
        &mut self,
        identity: &str,
        now: NaiveDateTime,
        recognized: &mut BTreeSet<String>,
        commits: &mut usize,
    ) {
        let today = now.date();
        if self.is_logged(identity, today) {
            return;
        }

        match self.sink.commit(identity, now) {
            Ok(outcome) => {
                self.log.insert(identity.to_string(), today);
                recognized.insert(identity.to_string());
                match outcome {
                    CommitOutcome::Recorded => {
                        *commits += 1;
                        tracing::info!(identity, at = %now, "attendance recorded");
                        self.notifier.notify(identity, now);
                    }
                    CommitOutcome::AlreadyPresent => {
                        tracing::info!(identity, day = %today, "attendance already on record");
                    }
                }
            }
            Err(e) => {
                // Not logged, so the next sighting retries.
                tracing::warn!(identity, error = %e, "attendance commit failed");
            }
        }
    }
}
