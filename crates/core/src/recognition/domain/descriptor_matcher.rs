use crate::recognition::domain::identity::{Descriptor, Identity};
use crate::shared::constants::DEFAULT_MATCH_THRESHOLD;

/// Nearest identity for a probe descriptor.
///
/// `distance` is `f64::INFINITY` and `identity` is `None` when no reference
/// descriptor was comparable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult<'a> {
    pub distance: f64,
    pub identity: Option<&'a Identity>,
}

/// Outcome of applying the acceptance threshold to a [`MatchResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Recognized { id: String, distance: f64 },
    Unknown,
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Exhaustive nearest-neighbour search over every reference descriptor of
/// every identity.
///
/// Only a strictly smaller distance replaces the current best, so ties keep
/// the first candidate in snapshot order. References whose length differs
/// from the probe are not candidates.
pub fn find_best_match<'a>(probe: &[f32], identities: &'a [Identity]) -> MatchResult<'a> {
    let mut best = MatchResult {
        distance: f64::INFINITY,
        identity: None,
    };
    for identity in identities {
        for reference in &identity.descriptors {
            if reference.len() != probe.len() {
                continue;
            }
            let distance = euclidean_distance(probe, reference);
            if distance < best.distance {
                best = MatchResult {
                    distance,
                    identity: Some(identity),
                };
            }
        }
    }
    best
}

/// Holds the current identity snapshot and the acceptance threshold.
///
/// The snapshot is replaced wholesale after each successful registration
/// round trip; it is never edited in place.
pub struct DescriptorMatcher {
    identities: Vec<Identity>,
    threshold: f64,
}

impl DescriptorMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            identities: Vec::new(),
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn snapshot(&self) -> &[Identity] {
        &self.identities
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn replace_snapshot(&mut self, identities: Vec<Identity>) {
        log::debug!(
            "Identity snapshot replaced: {} -> {} identities",
            self.identities.len(),
            identities.len()
        );
        self.identities = identities;
    }

    pub fn best_match(&self, probe: &[f32]) -> MatchResult<'_> {
        find_best_match(probe, &self.identities)
    }

    /// Lower thresholds are stricter.
    pub fn identify(&self, probe: &Descriptor) -> Recognition {
        let best = self.best_match(probe);
        match best.identity {
            Some(identity) if best.distance < self.threshold => Recognition::Recognized {
                id: identity.id.clone(),
                distance: best.distance,
            },
            _ => Recognition::Unknown,
        }
    }
}

impl Default for DescriptorMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}
