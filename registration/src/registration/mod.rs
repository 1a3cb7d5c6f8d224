//! Fast Global Registration
//!
//! Aligns two point sets without an initial guess:
//!
//! 1. FPFH descriptors for both sets (`fgr_point_cloud`)
//! 2. Reciprocal descriptor matching, pruned by the tuple test
//! 3. Graduated non-convexity optimization of the rigid pose
//!
//! The pipeline is deterministic: the only randomness (tuple sampling) comes
//! from a generator seeded with `FastGlobalRegistrationOption::seed`.

pub mod correspondence;
pub mod gnc;
pub mod options;

pub use correspondence::{
    build_correspondences, reciprocal_correspondences, tuple_consistency_filter, Correspondence,
    MIN_CORRESPONDENCES,
};
pub use fgr_core::{Error, Result};
pub use gnc::{
    ClosedFormUpdate, GncOptimizer, GncOutcome, IterationReport, LinearizedUpdate,
    Normalization, OptimizationState, PoseUpdate, Termination, INLIER_WEIGHT_THRESHOLD,
    STAGNATION_PATIENCE,
};
pub use options::FastGlobalRegistrationOption;

use fgr_core::timing::timed;
use fgr_core::{PointSet, RigidTransform, StageTimings};
use fgr_point_cloud::{compute_fpfh_features, FPFHFeature};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registration result
///
/// `transformation` maps the source set onto the target set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub transformation: RigidTransform,
    /// RMSE of inlier residuals, in input units
    pub rmse: f64,
    /// Correspondences whose final weight exceeds `INLIER_WEIGHT_THRESHOLD`
    pub inlier_count: usize,
    /// Correspondences handed to the optimizer
    pub correspondence_count: usize,
    pub iterations: usize,
    pub termination: Termination,
    pub timing: StageTimings,
}

impl fmt::Display for RegistrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transformation:")?;
        writeln!(f, "{}", self.transformation)?;
        writeln!(
            f,
            "RMSE: {:.6e} ({} of {} correspondences are inliers)",
            self.rmse, self.inlier_count, self.correspondence_count
        )?;
        writeln!(
            f,
            "Iterations: {} ({:?})",
            self.iterations, self.termination
        )?;
        write!(f, "{}", self.timing)
    }
}

/// Registration engine holding the options and the diagnostics of the last
/// run.
#[derive(Debug, Clone)]
pub struct FastGlobalRegistration {
    option: FastGlobalRegistrationOption,
    last_result: Option<RegistrationResult>,
}

impl FastGlobalRegistration {
    pub fn new(option: FastGlobalRegistrationOption) -> Result<Self> {
        option.validate()?;
        Ok(Self {
            option,
            last_result: None,
        })
    }

    pub fn option(&self) -> &FastGlobalRegistrationOption {
        &self.option
    }

    /// Run the whole pipeline on `source` and `target`.
    pub fn perform_registration(
        &mut self,
        source: &PointSet,
        target: &PointSet,
    ) -> Result<RegistrationResult> {
        self.last_result = None;
        tracing::info!(
            "Fast global registration: {} source points, {} target points",
            source.len(),
            target.len()
        );

        let (features, feature_time) = timed(|| {
            let source_features = compute_fpfh_features(source, &self.option.feature)?;
            let target_features = compute_fpfh_features(target, &self.option.feature)?;
            Ok::<_, Error>((source_features, target_features))
        });
        let (source_features, target_features) = features?;

        let mut result = match_and_optimize(
            source,
            target,
            &source_features,
            &target_features,
            &self.option,
        )?;
        result.timing.feature_extraction = feature_time;

        log_result(&result);
        self.last_result = Some(result.clone());
        Ok(result)
    }

    /// Inlier RMSE of the last successful run.
    pub fn rmse(&self) -> Option<f64> {
        self.last_result.as_ref().map(|r| r.rmse)
    }

    /// Stage timings of the last successful run.
    pub fn timing(&self) -> Option<&StageTimings> {
        self.last_result.as_ref().map(|r| &r.timing)
    }

    pub fn last_result(&self) -> Option<&RegistrationResult> {
        self.last_result.as_ref()
    }
}

fn log_result(result: &RegistrationResult) {
    tracing::info!(
        "Registration finished after {} iterations ({:?}): RMSE {:.6e}, {}/{} inliers, {:.3} ms",
        result.iterations,
        result.termination,
        result.rmse,
        result.inlier_count,
        result.correspondence_count,
        result.timing.total().as_secs_f64() * 1000.0
    );
}

fn match_and_optimize(
    source: &PointSet,
    target: &PointSet,
    source_features: &[FPFHFeature],
    target_features: &[FPFHFeature],
    option: &FastGlobalRegistrationOption,
) -> Result<RegistrationResult> {
    let mut rng = StdRng::seed_from_u64(option.seed);
    let (correspondences, correspondence_time) = timed(|| {
        build_correspondences(
            source,
            target,
            source_features,
            target_features,
            option,
            &mut rng,
        )
    });
    let correspondences = correspondences?;
    tracing::info!("{} correspondences after pruning", correspondences.len());

    let mut result = optimize(source, target, &correspondences, option)?;
    result.timing.correspondence = correspondence_time;
    Ok(result)
}

fn optimize(
    source: &PointSet,
    target: &PointSet,
    correspondences: &[Correspondence],
    option: &FastGlobalRegistrationOption,
) -> Result<RegistrationResult> {
    let (outcome, optimization_time) =
        timed(|| GncOptimizer::new(source, target, correspondences, option)?.run());
    let outcome = outcome?;

    Ok(RegistrationResult {
        transformation: outcome.transformation,
        rmse: outcome.rmse,
        inlier_count: outcome.inlier_count,
        correspondence_count: correspondences.len(),
        iterations: outcome.iterations,
        termination: outcome.termination,
        timing: StageTimings {
            optimization: optimization_time,
            ..StageTimings::default()
        },
    })
}

/// Fast Global Registration on raw point sets
pub fn registration_fgr(
    source: &PointSet,
    target: &PointSet,
    option: FastGlobalRegistrationOption,
) -> Result<RegistrationResult> {
    FastGlobalRegistration::new(option)?.perform_registration(source, target)
}

/// Fast Global Registration from precomputed descriptors
///
/// `source_features[i]` must describe `source[i]`, likewise for the target.
pub fn registration_fgr_based_on_feature_matching(
    source: &PointSet,
    target: &PointSet,
    source_features: &[FPFHFeature],
    target_features: &[FPFHFeature],
    option: FastGlobalRegistrationOption,
) -> Result<RegistrationResult> {
    option.validate()?;
    let result = match_and_optimize(source, target, source_features, target_features, &option)?;
    log_result(&result);
    Ok(result)
}

/// Fast Global Registration from a given correspondence list
///
/// Skips matching and the tuple test; the correspondences go straight to the
/// optimizer.
pub fn registration_fgr_based_on_correspondence(
    source: &PointSet,
    target: &PointSet,
    correspondences: &[Correspondence],
    option: FastGlobalRegistrationOption,
) -> Result<RegistrationResult> {
    option.validate()?;
    let result = optimize(source, target, correspondences, &option)?;
    log_result(&result);
    Ok(result)
}
