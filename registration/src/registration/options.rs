//! Options for Fast Global Registration

use fgr_core::{Error, Result};
use fgr_point_cloud::FeatureOption;
use serde::{Deserialize, Serialize};

/// Parameters of the whole registration pipeline.
///
/// `max_corr_dist` and `stop_mse` are expressed in normalized units (the
/// combined diameter of both point sets is 1) unless `use_absolute_scale`
/// is set, in which case they are in the units of the input. The feature
/// radii inside `feature` are always in input units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastGlobalRegistrationOption {
    /// Solve every iteration in closed form instead of linearizing
    pub closed_form: bool,
    /// Skip scale normalization and work in input units
    pub use_absolute_scale: bool,
    /// Annealing factor applied to `mu` after every iteration
    pub div_factor: f64,
    /// Residual scale the annealing settles at
    pub max_corr_dist: f64,
    /// Maximum number of optimizer iterations
    pub iteration_number: usize,
    /// Similarity threshold of the tuple test, in (0, 1)
    pub tuple_scale: f64,
    /// Number of triplets drawn by the tuple test
    pub tuple_max_count: usize,
    /// Enable tuple-consistency pruning
    pub tuple_test: bool,
    /// Convergence threshold on the change of the weighted MSE
    pub stop_mse: f64,
    /// Seed of the tuple sampler
    pub seed: u64,
    pub feature: FeatureOption,
}

impl Default for FastGlobalRegistrationOption {
    fn default() -> Self {
        Self {
            closed_form: false,
            use_absolute_scale: false,
            div_factor: 1.4,
            max_corr_dist: 0.025,
            iteration_number: 64,
            tuple_scale: 0.95,
            tuple_max_count: 1000,
            tuple_test: true,
            stop_mse: 1e-10,
            seed: 0,
            feature: FeatureOption::default(),
        }
    }
}

impl FastGlobalRegistrationOption {
    pub fn with_closed_form(mut self, closed_form: bool) -> Self {
        self.closed_form = closed_form;
        self
    }

    pub fn with_absolute_scale(mut self, use_absolute_scale: bool) -> Self {
        self.use_absolute_scale = use_absolute_scale;
        self
    }

    pub fn with_div_factor(mut self, div_factor: f64) -> Self {
        self.div_factor = div_factor;
        self
    }

    pub fn with_max_corr_dist(mut self, max_corr_dist: f64) -> Self {
        self.max_corr_dist = max_corr_dist;
        self
    }

    pub fn with_iteration_number(mut self, iteration_number: usize) -> Self {
        self.iteration_number = iteration_number;
        self
    }

    pub fn with_tuple_scale(mut self, tuple_scale: f64) -> Self {
        self.tuple_scale = tuple_scale;
        self
    }

    pub fn with_tuple_max_count(mut self, tuple_max_count: usize) -> Self {
        self.tuple_max_count = tuple_max_count;
        self
    }

    pub fn with_tuple_test(mut self, tuple_test: bool) -> Self {
        self.tuple_test = tuple_test;
        self
    }

    pub fn with_stop_mse(mut self, stop_mse: f64) -> Self {
        self.stop_mse = stop_mse;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_feature(mut self, feature: FeatureOption) -> Self {
        self.feature = feature;
        self
    }

    /// Check every parameter before any computation starts.
    pub fn validate(&self) -> Result<()> {
        if !(self.div_factor.is_finite() && self.div_factor > 1.0) {
            return Err(Error::configuration(format!(
                "div_factor must be greater than 1, got {}",
                self.div_factor
            )));
        }
        if self.iteration_number == 0 {
            return Err(Error::configuration("iteration_number must be at least 1"));
        }
        if !(self.max_corr_dist.is_finite() && self.max_corr_dist > 0.0) {
            return Err(Error::configuration(format!(
                "max_corr_dist must be positive, got {}",
                self.max_corr_dist
            )));
        }
        if !(self.tuple_scale > 0.0 && self.tuple_scale < 1.0) {
            return Err(Error::configuration(format!(
                "tuple_scale must lie in (0, 1), got {}",
                self.tuple_scale
            )));
        }
        if self.tuple_test && self.tuple_max_count == 0 {
            return Err(Error::configuration(
                "tuple_max_count must be at least 1 when the tuple test is enabled",
            ));
        }
        if !(self.stop_mse >= 0.0) {
            return Err(Error::configuration(format!(
                "stop_mse must be non-negative, got {}",
                self.stop_mse
            )));
        }
        self.feature.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let option = FastGlobalRegistrationOption::default();
        assert!(option.validate().is_ok());
        assert_eq!(option.iteration_number, 64);
        assert!(!option.closed_form);
        assert!(option.tuple_test);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = FastGlobalRegistrationOption::default();
        let bad = [
            base.with_div_factor(1.0),
            base.with_div_factor(0.5),
            base.with_iteration_number(0),
            base.with_max_corr_dist(0.0),
            base.with_max_corr_dist(-1.0),
            base.with_tuple_scale(0.0),
            base.with_tuple_scale(1.0),
            base.with_tuple_max_count(0),
            base.with_stop_mse(-1e-3),
            base.with_stop_mse(f64::NAN),
            base.with_feature(FeatureOption::default().with_fpfh_search_radius(-0.1)),
        ];
        for option in bad.iter() {
            assert!(
                matches!(option.validate(), Err(Error::Configuration(_))),
                "{:?} should be rejected",
                option
            );
        }
    }

    #[test]
    fn test_tuple_count_ignored_without_tuple_test() {
        let option = FastGlobalRegistrationOption::default()
            .with_tuple_test(false)
            .with_tuple_max_count(0);
        assert!(option.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{ "closed_form": true, "max_corr_dist": 0.05, "feature": { "fpfh_search_radius": 0.5 } }"#;
        let option: FastGlobalRegistrationOption = serde_json::from_str(json).unwrap();
        assert!(option.closed_form);
        assert_eq!(option.max_corr_dist, 0.05);
        assert_eq!(option.feature.fpfh_search_radius, 0.5);
        assert_eq!(option.feature.normals_search_radius, 0.1);
        assert_eq!(option.div_factor, 1.4);
    }
}
