//! Correspondence building
//!
//! Reciprocal nearest-neighbor matching in descriptor space, followed by an
//! optional tuple test that keeps only correspondences taking part in at
//! least one triplet whose pairwise distances agree between the two sets.

use fgr_core::{Error, PointSet, Result};
use fgr_point_cloud::FPFHFeature;
use nalgebra::Point3;
use rand::seq::index::sample;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::FastGlobalRegistrationOption;

/// Smallest correspondence count that fixes a rigid transform.
pub const MIN_CORRESPONDENCES: usize = 3;

/// A putative match between `source[source]` and `target[target]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correspondence {
    pub source: usize,
    pub target: usize,
}

impl Correspondence {
    pub fn new(source: usize, target: usize) -> Self {
        Self { source, target }
    }
}

impl From<(usize, usize)> for Correspondence {
    fn from((source, target): (usize, usize)) -> Self {
        Self::new(source, target)
    }
}

/// Index of the descriptor in `candidates` closest to `query`.
///
/// Zero descriptors carry no information and are never matched. Ties go to
/// the lowest index.
fn nearest_descriptor(query: &FPFHFeature, candidates: &[FPFHFeature]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (j, candidate) in candidates.iter().enumerate() {
        if candidate.is_zero() {
            continue;
        }
        let d = query.distance_squared(candidate);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((j, d)),
        }
    }
    best.map(|(j, _)| j)
}

fn nearest_all(queries: &[FPFHFeature], candidates: &[FPFHFeature]) -> Vec<Option<usize>> {
    queries
        .par_iter()
        .map(|q| {
            if q.is_zero() {
                None
            } else {
                nearest_descriptor(q, candidates)
            }
        })
        .collect()
}

/// Mutual nearest neighbors between two descriptor sets, ordered by source
/// index.
pub fn reciprocal_correspondences(
    source_features: &[FPFHFeature],
    target_features: &[FPFHFeature],
) -> Vec<Correspondence> {
    let source_to_target = nearest_all(source_features, target_features);
    let target_to_source = nearest_all(target_features, source_features);

    source_to_target
        .iter()
        .enumerate()
        .filter_map(|(i, j)| {
            let j = (*j)?;
            (target_to_source[j] == Some(i)).then(|| Correspondence::new(i, j))
        })
        .collect()
}

/// Tuple-consistency pruning.
///
/// Draws `max_count` triplets of distinct correspondences from `rng`. A
/// triplet is accepted when every source edge length `ls` and matching
/// target edge length `lt` satisfy `ls * scale < lt < ls / scale`. The
/// output lists every correspondence of an accepted triplet once, in order
/// of first acceptance.
pub fn tuple_consistency_filter<R: Rng + ?Sized>(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    correspondences: &[Correspondence],
    scale: f64,
    max_count: usize,
    rng: &mut R,
) -> Vec<Correspondence> {
    let n = correspondences.len();
    if n < MIN_CORRESPONDENCES {
        return Vec::new();
    }

    let mut accepted = vec![false; n];
    let mut kept = Vec::new();

    for _ in 0..max_count {
        let picked = sample(&mut *rng, n, 3);
        let idx = [picked.index(0), picked.index(1), picked.index(2)];

        let consistent = [(0, 1), (1, 2), (2, 0)].iter().all(|&(a, b)| {
            let ca = correspondences[idx[a]];
            let cb = correspondences[idx[b]];
            let ls = (source[ca.source] - source[cb.source]).norm();
            let lt = (target[ca.target] - target[cb.target]).norm();
            ls * scale < lt && lt < ls / scale
        });

        if consistent {
            for &k in &idx {
                if !accepted[k] {
                    accepted[k] = true;
                    kept.push(correspondences[k]);
                }
            }
        }
    }

    kept
}

/// Fail unless at least `MIN_CORRESPONDENCES` correspondences are left.
pub(crate) fn require_minimum(found: usize) -> Result<()> {
    if found < MIN_CORRESPONDENCES {
        return Err(Error::InsufficientCorrespondences {
            found,
            required: MIN_CORRESPONDENCES,
        });
    }
    Ok(())
}

/// Fail if either point set is empty.
pub(crate) fn require_non_empty(source: &PointSet, target: &PointSet) -> Result<()> {
    if source.is_empty() || target.is_empty() {
        return Err(Error::insufficient_data(format!(
            "cannot register point sets of {} and {} points",
            source.len(),
            target.len()
        )));
    }
    Ok(())
}

/// Full correspondence stage: reciprocal matching, then the tuple test when
/// enabled by `option`.
pub fn build_correspondences<R: Rng + ?Sized>(
    source: &PointSet,
    target: &PointSet,
    source_features: &[FPFHFeature],
    target_features: &[FPFHFeature],
    option: &FastGlobalRegistrationOption,
    rng: &mut R,
) -> Result<Vec<Correspondence>> {
    require_non_empty(source, target)?;
    for (name, set, features) in [
        ("source", source, source_features),
        ("target", target, target_features),
    ] {
        if set.len() != features.len() {
            return Err(Error::configuration(format!(
                "{} has {} points but {} descriptors",
                name,
                set.len(),
                features.len()
            )));
        }
    }

    let matches = reciprocal_correspondences(source_features, target_features);
    tracing::debug!("{} reciprocal correspondences", matches.len());
    require_minimum(matches.len())?;

    if !option.tuple_test {
        return Ok(matches);
    }

    let kept = tuple_consistency_filter(
        source.points(),
        target.points(),
        &matches,
        option.tuple_scale,
        option.tuple_max_count,
        rng,
    );
    tracing::debug!(
        "{} of {} correspondences passed the tuple test",
        kept.len(),
        matches.len()
    );
    require_minimum(kept.len())?;
    Ok(kept)
}
