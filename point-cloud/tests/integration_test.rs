/// Integration tests for the feature extractor
/// Checks the properties registration relies on: invariance under rigid
/// motion, strict failure on sparse input and thread-count independence.
use fgr_core::test_utils::{make_bumpy_sphere, sample_transform};
use fgr_core::{Error, PointSet};
use fgr_point_cloud::{compute_fpfh_features, FeatureOption, FPFH_DIM};
use nalgebra::Point3;

fn sphere_option() -> FeatureOption {
    FeatureOption::default()
        .with_normals_search_radius(0.3)
        .with_fpfh_search_radius(0.45)
}

#[test]
fn test_descriptors_invariant_under_rigid_motion() {
    let cloud = make_bumpy_sphere(600);
    let moved = cloud.transformed(&sample_transform());
    let option = sphere_option();

    let a = compute_fpfh_features(&cloud, &option).unwrap();
    let b = compute_fpfh_features(&moved, &option).unwrap();
    assert_eq!(a.len(), b.len());

    // Neighborhoods can only differ for points sitting exactly on a radius
    let matching = a
        .iter()
        .zip(b.iter())
        .filter(|(fa, fb)| fa.distance_squared(fb) < 1e-12)
        .count();
    assert!(
        matching * 100 >= a.len() * 95,
        "only {} of {} descriptors survived the motion",
        matching,
        a.len()
    );
}

#[test]
fn test_descriptor_shape() {
    let cloud = make_bumpy_sphere(400);
    let features = compute_fpfh_features(&cloud, &sphere_option().scaled(1.2)).unwrap();
    assert_eq!(features.len(), 400);
    assert_eq!(features[0].histogram.len(), FPFH_DIM);
    assert!(features.iter().all(|f| f.histogram.iter().all(|v| v.is_finite() && *v >= 0.0)));
    assert!(features.iter().all(|f| !f.is_zero()));
}

#[test]
fn test_sparse_cloud_is_rejected() {
    let cloud = PointSet::from_xyz(&[[0.0, 0.0, 0.0], [5.0, 0.0, 0.0], [0.0, 5.0, 0.0]]);
    match compute_fpfh_features(&cloud, &FeatureOption::default()) {
        Err(Error::InsufficientData(msg)) => assert!(msg.contains("point 0")),
        other => panic!("expected InsufficientData, got {:?}", other),
    }
}

#[test]
fn test_colinear_cloud_yields_zero_descriptors() {
    let cloud = PointSet::new(
        (0..20)
            .map(|i| Point3::new(i as f64 * 0.05, 0.0, 0.0))
            .collect(),
    );
    let option = FeatureOption::default()
        .with_normals_search_radius(0.16)
        .with_fpfh_search_radius(0.2);
    let features = compute_fpfh_features(&cloud, &option).unwrap();
    assert!(features.iter().all(|f| f.is_zero()));
}

#[test]
fn test_same_output_for_any_thread_count() {
    let cloud = make_bumpy_sphere(500);
    let option = sphere_option();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap();
    let single = pool.install(|| compute_fpfh_features(&cloud, &option)).unwrap();
    let parallel = compute_fpfh_features(&cloud, &option).unwrap();

    assert_eq!(single, parallel);
}
