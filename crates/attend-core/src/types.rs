use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in pixel coordinates of the frame it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Rescale a box by `factor` (e.g. `1.0 / downsample` to map back to full-frame coordinates).
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }
}

/// Face descriptor: a fixed-length embedding produced by the vision capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another descriptor.
    ///
    /// Returns `None` when the lengths differ; such a pair is never a match.
    pub fn distance(&self, other: &Descriptor) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }
}

/// One enrolled identity with the descriptor chosen for it at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub identity: String,
    pub descriptor: Descriptor,
}

/// Result of matching a probe descriptor against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity, `None` for "Unknown".
    pub identity: Option<String>,
    /// Distance to the closest comparable gallery entry, within tolerance or not.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }
}

/// Strategy for comparing a probe descriptor against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[GalleryEntry], tolerance: f32) -> MatchResult;
}

/// Minimum-distance matcher.
///
/// Every gallery entry is scored; the closest one within `tolerance` wins.
/// On an exact tie the earlier gallery entry is kept, so the result only
/// depends on gallery insertion order.
pub struct DistanceMatcher;

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &[GalleryEntry], tolerance: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let Some(dist) = probe.distance(&entry.descriptor) else {
                tracing::debug!(
                    identity = %entry.identity,
                    probe_len = probe.values.len(),
                    entry_len = entry.descriptor.values.len(),
                    "descriptor length mismatch, skipping entry"
                );
                continue;
            };
            if !dist.is_finite() {
                tracing::debug!(identity = %entry.identity, "non-finite distance, skipping entry");
                continue;
            }
            // Strict `<` keeps the first entry on ties.
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }

        match best {
            Some((idx, dist)) if dist <= tolerance => MatchResult {
                identity: Some(gallery[idx].identity.clone()),
                distance: Some(dist),
            },
            Some((_, dist)) => MatchResult {
                identity: None,
                distance: Some(dist),
            },
            None => MatchResult {
                identity: None,
                distance: None,
            },
        }
    }
}
