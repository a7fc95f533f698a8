//! Gallery loading: one descriptor per enrolled identity.

use crate::analyzer::FaceAnalyzer;
use crate::enroll::{EnrollError, EnrollmentStore};
use crate::types::{Descriptor, GalleryEntry};

/// The (identity, descriptor) pairs in use for one session.
///
/// Insertion order is preserved and identities are unique.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Returns `false` (and keeps the existing entry) if the
    /// identity is already present.
    pub fn insert(&mut self, identity: impl Into<String>, descriptor: Descriptor) -> bool {
        let identity = identity.into();
        if self.contains(&identity) {
            return false;
        }
        self.entries.push(GalleryEntry { identity, descriptor });
        true
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.iter().any(|e| e.identity == identity)
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build a gallery from the enrollment store.
///
/// For each identity the first sample (in store order) that yields at least
/// one face provides the descriptor; the first detected face is used.
/// Unreadable samples and identities without a usable sample are logged and
/// skipped. Only a failure to list identities is returned as an error.
pub fn load<S, A>(store: &S, analyzer: &mut A) -> Result<Gallery, EnrollError>
where
    S: EnrollmentStore + ?Sized,
    A: FaceAnalyzer + ?Sized,
{
    let identities = store.identities()?;
    let mut gallery = Gallery::new();

    for identity in &identities {
        if gallery.contains(identity) {
            continue;
        }

        let samples = match store.samples(identity) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "cannot list samples; skipping identity");
                continue;
            }
        };

        match first_descriptor(store, analyzer, identity, &samples) {
            Some(descriptor) => {
                gallery.insert(identity.clone(), descriptor);
            }
            None => {
                tracing::warn!(
                    identity = %identity,
                    samples = samples.len(),
                    "no usable sample; identity cannot be recognized this session"
                );
            }
        }
    }

    tracing::info!(
        identities = identities.len(),
        loaded = gallery.len(),
        "gallery loaded"
    );
    Ok(gallery)
}

fn first_descriptor<S, A>(
    store: &S,
    analyzer: &mut A,
    identity: &str,
    samples: &[String],
) -> Option<Descriptor>
where
    S: EnrollmentStore + ?Sized,
    A: FaceAnalyzer + ?Sized,
{
    for sample in samples {
        let frame = match store.read_sample(identity, sample) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(identity, sample = %sample, error = %e, "unreadable sample");
                continue;
            }
        };

        match analyzer.analyze(&frame) {
            Ok(faces) => {
                if let Some(face) = faces.into_iter().next() {
                    tracing::debug!(identity, sample = %sample, "descriptor selected");
                    return Some(face.descriptor);
                }
                tracing::debug!(identity, sample = %sample, "no face in sample");
            }
            Err(e) => {
                tracing::warn!(identity, sample = %sample, error = %e, "sample analysis failed");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalyzerError, DetectedFace};
    use crate::frame::Frame;
    use crate::types::BoundingBox;
    use image::RgbImage;
    use std::collections::BTreeMap;

    /// Samples are encoded as a 1x1 frame whose red channel selects the outcome:
    /// 0 = no face, 255 = analyzer error, anything else = one face with descriptor [r].
    struct MemStore {
        samples: BTreeMap<String, Vec<(String, Option<u8>)>>,
    }

    impl EnrollmentStore for MemStore {
        fn identities(&self) -> Result<Vec<String>, EnrollError> {
            Ok(self.samples.keys().cloned().collect())
        }

        fn samples(&self, identity: &str) -> Result<Vec<String>, EnrollError> {
            self.samples
                .get(identity)
                .map(|s| s.iter().map(|(n, _)| n.clone()).collect())
                .ok_or_else(|| EnrollError::UnknownIdentity(identity.into()))
        }

        fn read_sample(&self, identity: &str, sample: &str) -> Result<Frame, EnrollError> {
            let value = self.samples[identity]
                .iter()
                .find(|(n, _)| n == sample)
                .and_then(|(_, v)| *v)
                .ok_or_else(|| EnrollError::InvalidSample {
                    path: sample.into(),
                    reason: "corrupt".into(),
                })?;
            Ok(Frame::new(RgbImage::from_pixel(1, 1, image::Rgb([value, 0, 0])), 0))
        }
    }

    struct PixelAnalyzer;

    impl FaceAnalyzer for PixelAnalyzer {
        fn analyze(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
            let r = frame.image.get_pixel(0, 0)[0];
            match r {
                0 => Ok(vec![]),
                255 => Err(AnalyzerError::Detection("boom".into())),
                v => Ok(vec![DetectedFace {
                    bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0 },
                    descriptor: Descriptor::new(vec![v as f32]),
                }]),
            }
        }
    }

    fn store(layout: Vec<(&str, Vec<(&str, Option<u8>)>)>) -> MemStore {
        MemStore {
            samples: layout
                .into_iter()
                .map(|(id, s)| {
                    (
                        id.to_string(),
                        s.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_valid_sample_wins() {
        let s = store(vec![(
            "alice",
            vec![("1.jpg", Some(10)), ("2.jpg", Some(20)), ("3.jpg", Some(30))],
        )]);
        let gallery = load(&s, &mut PixelAnalyzer).unwrap();

        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.entries()[0].descriptor.values, vec![10.0]);
    }

    #[test]
    fn test_skips_corrupt_faceless_and_failing_samples() {
        let s = store(vec![(
            "alice",
            vec![("1.jpg", None), ("2.jpg", Some(0)), ("3.jpg", Some(255)), ("4.jpg", Some(42))],
        )]);
        let gallery = load(&s, &mut PixelAnalyzer).unwrap();

        assert_eq!(gallery.entries()[0].descriptor.values, vec![42.0]);
    }

    #[test]
    fn test_identity_without_usable_sample_is_omitted() {
        let s = store(vec![
            ("alice", vec![("1.jpg", None)]),
            ("bob", vec![("1.jpg", Some(7))]),
            ("carol", vec![]),
        ]);
        let gallery = load(&s, &mut PixelAnalyzer).unwrap();

        assert_eq!(gallery.len(), 1);
        assert!(gallery.contains("bob"));
        assert!(!gallery.contains("alice"));
        assert!(!gallery.contains("carol"));
    }

    #[test]
    fn test_insert_refuses_duplicates() {
        let mut gallery = Gallery::new();
        assert!(gallery.insert("alice", Descriptor::new(vec![1.0])));
        assert!(!gallery.insert("alice", Descriptor::new(vec![2.0])));
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.entries()[0].descriptor.values, vec![1.0]);
    }

    #[test]
    fn test_preserves_store_order() {
        let s = store(vec![("bob", vec![("1.jpg", Some(2))]), ("alice", vec![("1.jpg", Some(1))])]);
        let gallery = load(&s, &mut PixelAnalyzer).unwrap();

        let names: Vec<_> = gallery.entries().iter().map(|e| e.identity.as_str()).collect();
        // BTreeMap lists identities alphabetically.
        assert_eq!(names, vec!["alice", "bob"]);
    }
}
