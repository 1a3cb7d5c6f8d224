//! Point cloud registration algorithms
//!
//! This crate provides Fast Global Registration (FGR) of 3D point sets:
//! - FPFH descriptor matching with reciprocity and tuple pruning
//! - GNC (Graduated Non-Convexity) pose optimization under Geman-McClure
//! - Closed-form or linearized pose updates
//!
//! # Usage
//!
//! ```no_run
//! use fgr_core::test_utils::{make_bumpy_sphere, sample_transform};
//! use fgr_point_cloud::FeatureOption;
//! use fgr_registration::{registration_fgr, FastGlobalRegistrationOption};
//!
//! let source = make_bumpy_sphere(600);
//! let target = source.transformed(&sample_transform());
//! let option = FastGlobalRegistrationOption::default().with_feature(
//!     FeatureOption::default()
//!         .with_normals_search_radius(0.3)
//!         .with_fpfh_search_radius(0.45),
//! );
//! let result = registration_fgr(&source, &target, option).unwrap();
//! println!("{}", result);
//! ```

pub mod registration;

pub use registration::{
    registration_fgr, registration_fgr_based_on_correspondence,
    registration_fgr_based_on_feature_matching, Correspondence, FastGlobalRegistration,
    FastGlobalRegistrationOption, RegistrationResult,
};

pub use registration::correspondence::{
    build_correspondences, reciprocal_correspondences, tuple_consistency_filter,
};
pub use registration::gnc::{
    ClosedFormUpdate, GncOptimizer, GncOutcome, LinearizedUpdate, OptimizationState, PoseUpdate,
    Termination,
};
