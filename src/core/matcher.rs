//! Nearest-neighbour identity matching over face embeddings.

use serde::{Deserialize, Serialize};

pub type Embedding = Vec<f32>;

/// Identity reported when no candidate clears the acceptance rules.
pub const UNKNOWN_IDENTITY: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub identity: String,
    pub embedding: Embedding,
}

impl GalleryEntry {
    pub fn new(identity: impl Into<String>, embedding: Embedding) -> Self {
        Self { identity: identity.into(), embedding }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub identity: String,
    /// Distance of the accepted entry, or the smallest distance observed.
    pub distance: f32,
    pub confidence: f32,
    pub accepted: bool,
    /// Number of candidate embeddings that were evaluated.
    pub faces: usize,
    /// Some candidate was inside the tolerance but under the confidence threshold.
    pub low_confidence: bool,
}

impl MatchResult {
    fn unknown(distance: f32, faces: usize, low_confidence: bool) -> Self {
        Self {
            identity: UNKNOWN_IDENTITY.to_string(),
            distance,
            confidence: confidence_for(distance),
            accepted: false,
            faces,
            low_confidence,
        }
    }

    pub fn no_face(&self) -> bool {
        self.faces == 0
    }
}

/// `1 - distance`, or zero when nothing was compared.
pub fn confidence_for(distance: f32) -> f32 {
    if distance.is_finite() {
        1.0 - distance
    } else {
        0.0
    }
}

/// Euclidean distance; vectors of different length never match.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Index and distance of the closest gallery entry. Ties keep the earlier entry.
pub fn nearest(candidate: &[f32], gallery: &[GalleryEntry]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, entry) in gallery.iter().enumerate() {
        let distance = euclidean_distance(candidate, &entry.embedding);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ if distance.is_nan() => {}
            _ => best = Some((index, distance)),
        }
    }
    best
}

/// Decide which enrolled identity, if any, the captured faces belong to.
///
/// Candidates are evaluated in order and the first accepted one wins. A
/// candidate is accepted when its nearest gallery entry is strictly closer
/// than `tolerance` and `1 - distance >= confidence_threshold`.
pub fn match_identity(
    candidates: &[Embedding],
    gallery: &[GalleryEntry],
    tolerance: f32,
    confidence_threshold: f32,
) -> MatchResult {
    if candidates.is_empty() {
        return MatchResult::unknown(f32::INFINITY, 0, false);
    }

    let mut min_distance = f32::INFINITY;
    let mut low_confidence = false;

    for candidate in candidates {
        let Some((index, distance)) = nearest(candidate, gallery) else {
            continue;
        };
        min_distance = min_distance.min(distance);

        if distance >= tolerance {
            continue;
        }

        let confidence = 1.0 - distance;
        if confidence >= confidence_threshold {
            return MatchResult {
                identity: gallery[index].identity.clone(),
                distance,
                confidence,
                accepted: true,
                faces: candidates.len(),
                low_confidence: false,
            };
        }
        low_confidence = true;
    }

    MatchResult::unknown(min_distance, candidates.len(), low_confidence)
}
