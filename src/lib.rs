pub use fgr_core as core;
pub use fgr_point_cloud as point_cloud;
pub use fgr_registration as registration;

pub use fgr_core::{Error, PointSet, Result, RigidTransform, StageTimings};
pub use fgr_point_cloud::{compute_fpfh_features, FeatureOption};
pub use fgr_registration::{
    registration_fgr, registration_fgr_based_on_correspondence,
    registration_fgr_based_on_feature_matching, FastGlobalRegistration,
    FastGlobalRegistrationOption, RegistrationResult,
};

/// Initialize a single global Rayon thread pool for all CPU-parallel routines.
///
/// Call this once at application startup before running registrations.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `FGR_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> std::result::Result<(), String> {
    fgr_core::init_global_thread_pool(num_threads)
}
