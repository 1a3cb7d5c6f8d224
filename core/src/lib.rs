//! Core types shared by the registration workspace
//!
//! - `PointSet`: ordered, immutable 3D point sequence
//! - `RigidTransform`: SE(3) transform with row-major serialization
//! - `GemanMcClure`: robust kernel driving the graduated non-convexity schedule
//! - `StageTimings`: wall-clock breakdown of a registration run

pub mod point_cloud;
pub mod robust_loss;
pub mod runtime;
pub mod test_utils;
pub mod timing;
pub mod transform;

pub use point_cloud::PointSet;
pub use robust_loss::GemanMcClure;
pub use runtime::{current_cpu_threads, init_global_thread_pool};
pub use timing::StageTimings;
pub use transform::RigidTransform;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Insufficient correspondences: found {found}, need at least {required}")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl Error {
    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::NumericalDegeneracy(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
