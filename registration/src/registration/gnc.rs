//! Graduated Non-Convexity pose optimization
//!
//! Robust alignment of corresponding points under the scaled Geman-McClure
//! kernel, solved through its line-process form: every iteration reweights
//! the correspondences with `w = (mu / (mu + r^2))^2`, refits the pose by
//! weighted least squares and then shrinks `mu` by `div_factor` until it
//! reaches `max_corr_dist^2`. Starting with a large `mu` makes the first
//! iterations nearly quadratic, so no initial alignment is needed.
//!
//! Based on "Fast Global Registration" by Zhou, Park and Koltun (ECCV 2016).

use fgr_core::{Error, GemanMcClure, PointSet, Result, RigidTransform};
use nalgebra::{Matrix3, Matrix6, Point3, SymmetricEigen, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use super::correspondence::{require_minimum, require_non_empty, Correspondence};
use super::FastGlobalRegistrationOption;

/// Consecutive increases of the weighted MSE tolerated before giving up.
pub const STAGNATION_PATIENCE: usize = 5;

/// Final weight above which a correspondence counts as an inlier.
pub const INLIER_WEIGHT_THRESHOLD: f64 = 0.01;

const MIN_TOTAL_WEIGHT: f64 = 1e-12;
const MIN_SINGULAR_RATIO: f64 = 1e-9;
const MIN_EIGEN_RATIO: f64 = 1e-12;

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Annealing finished and the weighted MSE stopped changing
    Converged,
    /// `iteration_number` iterations were run
    IterationLimit,
    /// The weighted MSE kept growing; the best transform seen is returned
    Stagnated,
}

/// Mutable state of one optimization run, in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationState {
    pub transform: RigidTransform,
    pub mu: f64,
}

/// What a single iteration observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    /// `mu` the weights were computed with
    pub mu: f64,
    /// `sum(w r^2) / sum(w)` at the transform the iteration started from
    pub weighted_mse: f64,
}

/// One weighted least-squares solve inside the GNC loop.
pub trait PoseUpdate: Send + Sync {
    /// New estimate of the transform mapping `source` onto `target`.
    ///
    /// `weights[k]` belongs to `correspondences[k]`; `current` is the
    /// estimate the weights were computed at.
    fn solve(
        &self,
        source: &[Point3<f64>],
        target: &[Point3<f64>],
        correspondences: &[Correspondence],
        weights: &[f64],
        current: &RigidTransform,
    ) -> Result<RigidTransform>;
}

/// Weighted Procrustes: exact 6-DOF solution via SVD of the weighted
/// cross-covariance, independent of the current estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedFormUpdate;

impl PoseUpdate for ClosedFormUpdate {
    fn solve(
        &self,
        source: &[Point3<f64>],
        target: &[Point3<f64>],
        correspondences: &[Correspondence],
        weights: &[f64],
        _current: &RigidTransform,
    ) -> Result<RigidTransform> {
        // Compute weighted centroids
        let mut source_centroid = Vector3::zeros();
        let mut target_centroid = Vector3::zeros();
        let mut total_weight = 0.0;

        for (c, &w) in correspondences.iter().zip(weights) {
            source_centroid += source[c.source].coords * w;
            target_centroid += target[c.target].coords * w;
            total_weight += w;
        }

        if total_weight < MIN_TOTAL_WEIGHT {
            return Err(Error::degenerate("total correspondence weight is zero"));
        }

        source_centroid /= total_weight;
        target_centroid /= total_weight;

        // Compute weighted covariance
        let mut covariance = Matrix3::<f64>::zeros();
        for (c, &w) in correspondences.iter().zip(weights) {
            let src = source[c.source].coords - source_centroid;
            let tgt = target[c.target].coords - target_centroid;
            covariance += tgt * src.transpose() * w;
        }

        let svd = covariance.svd(true, true);
        let mut singular: Vec<f64> = svd.singular_values.iter().copied().collect();
        singular.sort_by(|a, b| b.total_cmp(a));
        if singular[0] <= 0.0 || singular[1] < MIN_SINGULAR_RATIO * singular[0] {
            return Err(Error::degenerate(
                "correspondences are collinear or coincident",
            ));
        }

        let (Some(u), Some(vt)) = (svd.u, svd.v_t) else {
            return Err(Error::degenerate("SVD of the cross-covariance failed"));
        };

        // Ensure proper rotation (det = 1)
        let mut rotation = u * vt;
        if rotation.determinant() < 0.0 {
            let mut u_corrected = u;
            u_corrected.set_column(2, &(u.column(2) * -1.0));
            rotation = u_corrected * vt;
        }

        let translation = target_centroid - rotation * source_centroid;
        Ok(RigidTransform::from_rotation_matrix(&rotation, translation))
    }
}

/// Gauss-Newton step on a left-multiplied twist `[v, w]`, linearized around
/// the current estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearizedUpdate;

impl PoseUpdate for LinearizedUpdate {
    fn solve(
        &self,
        source: &[Point3<f64>],
        target: &[Point3<f64>],
        correspondences: &[Correspondence],
        weights: &[f64],
        current: &RigidTransform,
    ) -> Result<RigidTransform> {
        let total_weight: f64 = weights.iter().sum();
        if total_weight < MIN_TOTAL_WEIGHT {
            return Err(Error::degenerate("total correspondence weight is zero"));
        }

        let mut jtj = Matrix6::<f64>::zeros();
        let mut jtr = Vector6::<f64>::zeros();

        for (c, &w) in correspondences.iter().zip(weights) {
            let p = current.transform_point(&source[c.source]);
            let residual = p - target[c.target];

            // d(p)/d[v, w] = [I | -[p]x]
            let skew = p.coords.cross_matrix();
            for row in 0..3 {
                let mut j = Vector6::zeros();
                j[row] = 1.0;
                for col in 0..3 {
                    j[3 + col] = -skew[(row, col)];
                }
                jtj += j * j.transpose() * w;
                jtr += j * (residual[row] * w);
            }
        }

        let eigen = SymmetricEigen::new(jtj);
        let max_eig = eigen.eigenvalues.max();
        let min_eig = eigen.eigenvalues.min();
        if max_eig <= 0.0 || min_eig < MIN_EIGEN_RATIO * max_eig {
            return Err(Error::degenerate(
                "normal equations are ill-conditioned (collinear correspondences)",
            ));
        }

        let solution = jtj
            .cholesky()
            .ok_or_else(|| Error::degenerate("normal equations are not positive definite"))?
            .solve(&jtr);

        Ok(RigidTransform::from_twist(&(-solution)).compose(current))
    }
}

/// Centering and scaling applied to both sets before optimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub source_centroid: Point3<f64>,
    pub target_centroid: Point3<f64>,
    /// Divisor applied to centered coordinates
    pub scale: f64,
    /// Combined diameter of both centered sets, in input units
    pub diameter: f64,
}

impl Normalization {
    pub fn new(source: &PointSet, target: &PointSet, use_absolute_scale: bool) -> Result<Self> {
        let (Some(source_centroid), Some(target_centroid)) = (source.centroid(), target.centroid())
        else {
            return Err(Error::insufficient_data("cannot register an empty point set"));
        };

        let diameter = 2.0 * source.bounding_radius().max(target.bounding_radius());
        if !(diameter > 0.0) {
            return Err(Error::degenerate("both point sets collapse to a single point"));
        }

        Ok(Self {
            source_centroid,
            target_centroid,
            scale: if use_absolute_scale { 1.0 } else { diameter },
            diameter,
        })
    }

    fn apply(points: &[Point3<f64>], centroid: &Point3<f64>, scale: f64) -> Vec<Point3<f64>> {
        points
            .iter()
            .map(|p| Point3::from((p - centroid) / scale))
            .collect()
    }

    /// Map a transform between normalized sets back to input coordinates.
    pub fn denormalize(&self, transform: &RigidTransform) -> RigidTransform {
        let translation = transform.translation * self.scale + self.target_centroid.coords
            - transform.rotation * self.source_centroid.coords;
        RigidTransform::new(transform.rotation, translation)
    }
}

/// Everything a finished optimization reports, in input units.
#[derive(Debug, Clone)]
pub struct GncOutcome {
    pub transformation: RigidTransform,
    pub rmse: f64,
    pub inlier_count: usize,
    pub iterations: usize,
    pub termination: Termination,
    /// Weighted MSE observed by each iteration
    pub mse_history: Vec<f64>,
}

/// GNC optimizer for one pair of point sets and a fixed correspondence list.
pub struct GncOptimizer<'a> {
    source: Vec<Point3<f64>>,
    target: Vec<Point3<f64>>,
    correspondences: &'a [Correspondence],
    normalization: Normalization,
    update: Box<dyn PoseUpdate + 'a>,
    div_factor: f64,
    mu_floor: f64,
    mu_start: f64,
    iteration_number: usize,
    stop_mse: f64,
}

impl<'a> GncOptimizer<'a> {
    /// Optimizer using the update strategy selected by `option.closed_form`.
    pub fn new(
        source: &PointSet,
        target: &PointSet,
        correspondences: &'a [Correspondence],
        option: &FastGlobalRegistrationOption,
    ) -> Result<Self> {
        let update: Box<dyn PoseUpdate> = if option.closed_form {
            Box::new(ClosedFormUpdate)
        } else {
            Box::new(LinearizedUpdate)
        };
        Self::with_update(source, target, correspondences, option, update)
    }

    pub fn with_update(
        source: &PointSet,
        target: &PointSet,
        correspondences: &'a [Correspondence],
        option: &FastGlobalRegistrationOption,
        update: Box<dyn PoseUpdate + 'a>,
    ) -> Result<Self> {
        require_non_empty(source, target)?;
        require_minimum(correspondences.len())?;
        if let Some(c) = correspondences
            .iter()
            .find(|c| c.source >= source.len() || c.target >= target.len())
        {
            return Err(Error::configuration(format!(
                "correspondence ({}, {}) is out of range for sets of {} and {} points",
                c.source,
                c.target,
                source.len(),
                target.len()
            )));
        }

        let normalization = Normalization::new(source, target, option.use_absolute_scale)?;
        let scale = normalization.scale;

        // Start permissive: the whole extent of the data in current units
        let start_scale = normalization.diameter / scale;
        let mu_floor = option.max_corr_dist * option.max_corr_dist;
        let mu_start = (start_scale * start_scale).max(mu_floor);

        Ok(Self {
            source: Normalization::apply(source.points(), &normalization.source_centroid, scale),
            target: Normalization::apply(target.points(), &normalization.target_centroid, scale),
            correspondences,
            normalization,
            update,
            div_factor: option.div_factor,
            mu_floor,
            mu_start,
            iteration_number: option.iteration_number,
            stop_mse: option.stop_mse,
        })
    }

    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    /// Identity transform with `mu` at its starting value.
    pub fn initial_state(&self) -> OptimizationState {
        OptimizationState {
            transform: RigidTransform::identity(),
            mu: self.mu_start,
        }
    }

    /// Squared residual of every correspondence under `transform`.
    fn squared_residuals(&self, transform: &RigidTransform) -> Vec<f64> {
        self.correspondences
            .iter()
            .map(|c| {
                (transform.transform_point(&self.source[c.source]) - self.target[c.target])
                    .norm_squared()
            })
            .collect()
    }

    /// One reweight, solve and anneal step.
    pub fn step(&self, state: &mut OptimizationState) -> Result<IterationReport> {
        let loss = GemanMcClure::new(state.mu);
        let residuals = self.squared_residuals(&state.transform);
        let weights: Vec<f64> = residuals.iter().map(|&r2| loss.weight_squared(r2)).collect();

        let total_weight: f64 = weights.iter().sum();
        let weighted_mse = if total_weight > 0.0 {
            residuals.iter().zip(&weights).map(|(r2, w)| r2 * w).sum::<f64>() / total_weight
        } else {
            f64::INFINITY
        };

        state.transform = self.update.solve(
            &self.source,
            &self.target,
            self.correspondences,
            &weights,
            &state.transform,
        )?;

        let mut annealed = loss;
        annealed.anneal(self.div_factor, self.mu_floor);
        state.mu = annealed.mu;

        Ok(IterationReport {
            mu: loss.mu,
            weighted_mse,
        })
    }

    /// Run the full schedule and report the result in input units.
    pub fn run(&self) -> Result<GncOutcome> {
        let mut state = self.initial_state();
        let mut history: Vec<f64> = Vec::with_capacity(self.iteration_number);
        let mut best = (f64::INFINITY, state.transform);
        let mut increases = 0usize;
        let mut termination = Termination::IterationLimit;

        for iteration in 0..self.iteration_number {
            let evaluated = state.transform;
            let report = self.step(&mut state)?;
            let mse = report.weighted_mse;

            tracing::debug!(
                "GNC iteration {}: mu = {:.6e}, weighted MSE = {:.6e}",
                iteration,
                report.mu,
                mse
            );

            if mse < best.0 {
                best = (mse, evaluated);
            }

            let previous = history.last().copied();
            history.push(mse);

            if let Some(prev) = previous {
                if mse > prev {
                    increases += 1;
                    if increases > STAGNATION_PATIENCE {
                        tracing::warn!(
                            "weighted MSE increased for {} consecutive iterations, keeping the best estimate",
                            increases
                        );
                        termination = Termination::Stagnated;
                        break;
                    }
                } else {
                    increases = 0;
                }

                if report.mu <= self.mu_floor && (mse - prev).abs() < self.stop_mse {
                    termination = Termination::Converged;
                    break;
                }
            }
        }

        let final_transform = match termination {
            Termination::Stagnated => best.1,
            _ => state.transform,
        };

        let (rmse, inlier_count) = self.inlier_rmse(&final_transform, state.mu);

        Ok(GncOutcome {
            transformation: self.normalization.denormalize(&final_transform),
            rmse,
            inlier_count,
            iterations: history.len(),
            termination,
            mse_history: history,
        })
    }

    /// RMSE in input units over correspondences whose weight at `mu` exceeds
    /// `INLIER_WEIGHT_THRESHOLD`.
    fn inlier_rmse(&self, transform: &RigidTransform, mu: f64) -> (f64, usize) {
        let loss = GemanMcClure::new(mu);
        let (sum, count) = self
            .squared_residuals(transform)
            .into_iter()
            .filter(|&r2| loss.weight_squared(r2) > INLIER_WEIGHT_THRESHOLD)
            .fold((0.0, 0usize), |(sum, count), r2| (sum + r2, count + 1));

        if count == 0 {
            return (0.0, 0);
        }
        let scale = self.normalization.scale;
        ((sum / count as f64).sqrt() * scale, count)
    }
}

/// Convenience function for robust pose estimation from correspondences
pub fn optimize_pairwise(
    source: &PointSet,
    target: &PointSet,
    correspondences: &[Correspondence],
    option: &FastGlobalRegistrationOption,
) -> Result<GncOutcome> {
    GncOptimizer::new(source, target, correspondences, option)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgr_core::test_utils::{make_scattered_cube, sample_transform};

    fn identity_pairs(n: usize) -> Vec<Correspondence> {
        (0..n).map(|i| Correspondence::new(i, i)).collect()
    }

    #[test]
    fn test_closed_form_exact_on_clean_pairs() {
        let source = make_scattered_cube(50);
        let truth = sample_transform();
        let target = source.transformed(&truth);
        let pairs = identity_pairs(50);

        let result = ClosedFormUpdate
            .solve(
                source.points(),
                target.points(),
                &pairs,
                &vec![1.0; 50],
                &RigidTransform::identity(),
            )
            .unwrap();
        assert!(result.rotation_distance(&truth) < 1e-9);
        assert!(result.translation_distance(&truth) < 1e-9);
    }

    #[test]
    fn test_linearized_step_reduces_residual() {
        let source = make_scattered_cube(50);
        let truth = RigidTransform::from_scaled_axis(
            Vector3::new(0.05, -0.02, 0.04),
            Vector3::new(0.1, 0.0, -0.05),
        );
        let target = source.transformed(&truth);
        let pairs = identity_pairs(50);
        let weights = vec![1.0; 50];

        let mut estimate = RigidTransform::identity();
        for _ in 0..5 {
            estimate = LinearizedUpdate
                .solve(source.points(), target.points(), &pairs, &weights, &estimate)
                .unwrap();
        }
        assert!(estimate.rotation_distance(&truth) < 1e-6);
        assert!(estimate.translation_distance(&truth) < 1e-6);
    }

    #[test]
    fn test_collinear_pairs_are_degenerate() {
        let line = PointSet::new(
            (0..10)
                .map(|i| Point3::new(i as f64 * 0.1, 0.0, 0.0))
                .collect(),
        );
        let pairs = identity_pairs(10);
        let weights = vec![1.0; 10];
        let identity = RigidTransform::identity();

        for update in [&ClosedFormUpdate as &dyn PoseUpdate, &LinearizedUpdate] {
            let result = update.solve(line.points(), line.points(), &pairs, &weights, &identity);
            assert!(matches!(result, Err(Error::NumericalDegeneracy(_))));
        }
    }

    #[test]
    fn test_zero_weights_are_degenerate() {
        let source = make_scattered_cube(10);
        let pairs = identity_pairs(10);
        let result = ClosedFormUpdate.solve(
            source.points(),
            source.points(),
            &pairs,
            &vec![0.0; 10],
            &RigidTransform::identity(),
        );
        assert!(matches!(result, Err(Error::NumericalDegeneracy(_))));
    }

    #[test]
    fn test_normalization_roundtrip() {
        let source = make_scattered_cube(40);
        let truth = sample_transform();
        let target = source.transformed(&truth);
        let norm = Normalization::new(&source, &target, false).unwrap();

        // The normalized problem has the same rotation and a scaled translation
        let normalized_truth = RigidTransform::new(
            truth.rotation,
            (truth.transform_point(&norm.source_centroid) - norm.target_centroid) / norm.scale,
        );
        let back = norm.denormalize(&normalized_truth);
        assert!(back.rotation_distance(&truth) < 1e-12);
        assert!(back.translation_distance(&truth) < 1e-9);
    }

    #[test]
    fn test_step_anneals_towards_floor() {
        let source = make_scattered_cube(30);
        let target = source.transformed(&sample_transform());
        let pairs = identity_pairs(30);
        let option = FastGlobalRegistrationOption::default();
        let optimizer = GncOptimizer::new(&source, &target, &pairs, &option).unwrap();

        let mut state = optimizer.initial_state();
        assert_eq!(state.mu, 1.0);
        let report = optimizer.step(&mut state).unwrap();
        assert_eq!(report.mu, 1.0);
        assert!((state.mu - 1.0 / 1.4).abs() < 1e-12);

        let floor = option.max_corr_dist * option.max_corr_dist;
        for _ in 0..100 {
            optimizer.step(&mut state).unwrap();
        }
        assert_eq!(state.mu, floor);
    }

    #[test]
    fn test_run_recovers_transform() {
        let source = make_scattered_cube(80);
        let truth = sample_transform();
        let target = source.transformed(&truth);
        let pairs = identity_pairs(80);

        for closed_form in [false, true] {
            let option = FastGlobalRegistrationOption::default().with_closed_form(closed_form);
            let outcome = optimize_pairwise(&source, &target, &pairs, &option).unwrap();
            assert!(outcome.transformation.rotation_distance(&truth) < 1e-6);
            assert!(outcome.transformation.translation_distance(&truth) < 1e-6);
            assert_eq!(outcome.inlier_count, 80);
            assert!(outcome.rmse < 1e-6);
        }
    }

    /// Pushes the estimate further away on every call
    struct Drift;

    impl PoseUpdate for Drift {
        fn solve(
            &self,
            _source: &[Point3<f64>],
            _target: &[Point3<f64>],
            _correspondences: &[Correspondence],
            _weights: &[f64],
            current: &RigidTransform,
        ) -> Result<RigidTransform> {
            Ok(RigidTransform::from_translation(Vector3::new(0.01, 0.0, 0.0)).compose(current))
        }
    }

    #[test]
    fn test_stagnation_returns_best_estimate() {
        let source = make_scattered_cube(20);
        let pairs = identity_pairs(20);
        let option = FastGlobalRegistrationOption::default().with_absolute_scale(true);
        let optimizer =
            GncOptimizer::with_update(&source, &source, &pairs, &option, Box::new(Drift)).unwrap();

        let outcome = optimizer.run().unwrap();
        assert_eq!(outcome.termination, Termination::Stagnated);
        assert_eq!(outcome.iterations, STAGNATION_PATIENCE + 2);
        assert!(outcome.transformation.translation_distance(&RigidTransform::identity()) < 1e-12);
    }

    #[test]
    fn test_empty_set_checked_before_correspondences() {
        let empty = PointSet::default();
        let pairs = identity_pairs(3);
        let option = FastGlobalRegistrationOption::default();
        let result = GncOptimizer::new(&empty, &empty, &pairs, &option);
        assert!(matches!(result, Err(Error::InsufficientData(_))));

        let cube = make_scattered_cube(10);
        let result = GncOptimizer::new(&cube, &empty, &pairs, &option);
        assert!(matches!(result, Err(Error::InsufficientData(_))));
    }

    #[test]
    fn test_iteration_cap_is_reported() {
        let source = make_scattered_cube(40);
        let target = source.transformed(&sample_transform());
        let pairs = identity_pairs(40);
        let option = FastGlobalRegistrationOption::default().with_iteration_number(3);

        let outcome = optimize_pairwise(&source, &target, &pairs, &option).unwrap();
        assert_eq!(outcome.termination, Termination::IterationLimit);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.mse_history.len(), 3);
    }

    #[test]
    fn test_clean_pairs_converge_before_cap() {
        let source = make_scattered_cube(40);
        let target = source.transformed(&sample_transform());
        let pairs = identity_pairs(40);

        for closed_form in [false, true] {
            let option = FastGlobalRegistrationOption::default().with_closed_form(closed_form);
            let outcome = optimize_pairwise(&source, &target, &pairs, &option).unwrap();
            assert_eq!(outcome.termination, Termination::Converged);
            assert!(outcome.iterations < option.iteration_number);
        }
    }

    #[test]
    fn test_out_of_range_correspondence() {
        let source = make_scattered_cube(10);
        let mut pairs = identity_pairs(10);
        pairs.push(Correspondence::new(3, 10));
        let result = GncOptimizer::new(
            &source,
            &source,
            &pairs,
            &FastGlobalRegistrationOption::default(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
