//! Point cloud feature extraction
//!
//! Turns a `PointSet` into one rotation-invariant descriptor per point:
//!
//! - `neighbors`: R*-tree radius queries over a point set
//! - `normals`: PCA normals on radius neighborhoods, oriented away from the centroid
//! - `fpfh`: Fast Point Feature Histograms (3 x 11 bins)
//!
//! Every stage runs in parallel over points with Rayon and produces the same
//! output for any thread count.
//!
//! # Usage
//!
//! ```no_run
//! use fgr_core::test_utils::make_bumpy_sphere;
//! use fgr_point_cloud::{compute_fpfh_features, FeatureOption};
//!
//! let cloud = make_bumpy_sphere(600);
//! let option = FeatureOption::default()
//!     .with_normals_search_radius(0.3)
//!     .with_fpfh_search_radius(0.45);
//! let features = compute_fpfh_features(&cloud, &option).unwrap();
//! assert_eq!(features.len(), cloud.len());
//! ```

pub mod fpfh;
pub mod neighbors;
pub mod normals;

pub use fpfh::{compute_fpfh_with_normals, FPFHFeature, FPFH_BINS, FPFH_DIM};
pub use neighbors::NeighborIndex;
pub use normals::estimate_normals;

use fgr_core::{Error, PointSet, Result};
use serde::{Deserialize, Serialize};

/// Parameters of the feature extractor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureOption {
    /// Radius of the neighborhood used to fit normals
    pub normals_search_radius: f64,
    /// Radius of the neighborhood used to build FPFH histograms
    pub fpfh_search_radius: f64,
    /// Minimum number of other points inside the normals radius
    pub min_neighbors: usize,
}

impl Default for FeatureOption {
    fn default() -> Self {
        Self {
            normals_search_radius: 0.1,
            fpfh_search_radius: 0.25,
            min_neighbors: 3,
        }
    }
}

impl FeatureOption {
    pub fn with_normals_search_radius(mut self, radius: f64) -> Self {
        self.normals_search_radius = radius;
        self
    }

    pub fn with_fpfh_search_radius(mut self, radius: f64) -> Self {
        self.fpfh_search_radius = radius;
        self
    }

    pub fn with_min_neighbors(mut self, min_neighbors: usize) -> Self {
        self.min_neighbors = min_neighbors;
        self
    }

    /// Same option with both radii multiplied by `factor`.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            normals_search_radius: self.normals_search_radius * factor,
            fpfh_search_radius: self.fpfh_search_radius * factor,
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, radius) in [
            ("normals_search_radius", self.normals_search_radius),
            ("fpfh_search_radius", self.fpfh_search_radius),
        ] {
            if !(radius.is_finite() && radius > 0.0) {
                return Err(Error::configuration(format!(
                    "{name} must be positive and finite, got {radius}"
                )));
            }
        }
        if self.min_neighbors < 2 {
            return Err(Error::configuration(format!(
                "min_neighbors must be at least 2 to fit a plane, got {}",
                self.min_neighbors
            )));
        }
        Ok(())
    }
}

/// Compute one FPFH descriptor per point of `cloud`.
///
/// Fails with `Error::InsufficientData` for an empty set or when a point has
/// fewer than `min_neighbors` neighbors inside the normals radius. Points
/// with degenerate neighborhoods (coincident or colinear) get an all-zero
/// descriptor instead.
pub fn compute_fpfh_features(cloud: &PointSet, option: &FeatureOption) -> Result<Vec<FPFHFeature>> {
    option.validate()?;
    if cloud.is_empty() {
        return Err(Error::insufficient_data(
            "cannot extract features from an empty point set",
        ));
    }

    let index = NeighborIndex::new(cloud.points());
    let normals = estimate_normals(cloud, &index, option)?;

    let degenerate = normals.iter().filter(|n| n.is_none()).count();
    if degenerate > 0 {
        tracing::debug!(
            "{} of {} points have degenerate neighborhoods and get empty descriptors",
            degenerate,
            cloud.len()
        );
    }

    Ok(compute_fpfh_with_normals(
        cloud.points(),
        &normals,
        &index,
        option.fpfh_search_radius,
    ))
}
