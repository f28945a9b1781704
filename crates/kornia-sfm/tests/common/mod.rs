#![allow(dead_code)]

use std::collections::BTreeMap;

use glam::{DQuat, DVec2, DVec3};
use kornia_sfm::camera::{Calibration, PinholeCamera, Pose3};
use kornia_sfm::track::{Keypoints, PairwiseMatches};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SyntheticScene {
    pub num_images: usize,
    pub cameras: BTreeMap<usize, PinholeCamera>,
    pub points: Vec<DVec3>,
    pub keypoints: Vec<Keypoints>,
    pub matches: PairwiseMatches,
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Cameras on an arc looking at a cloud of points around the origin.
///
/// Every point is visible in every image and keypoint `k` of each image is
/// the projection of point `k`, so all image pairs match `(k, k)`.
pub fn synthetic_scene(
    num_images: usize,
    num_points: usize,
    pixel_noise: f64,
    seed: u64,
) -> SyntheticScene {
    let mut rng = StdRng::seed_from_u64(seed);
    let calibration = Calibration::new(500.0, 320.0, 240.0);

    let cameras: BTreeMap<usize, PinholeCamera> = (0..num_images)
        .map(|i| {
            let angle = -0.6 + 1.2 * i as f64 / (num_images.max(2) - 1) as f64;
            let eye = DVec3::new(6.0 * angle.sin(), 0.5, -6.0 * angle.cos());
            let pose = Pose3::look_at(eye, DVec3::ZERO, DVec3::Y);
            (i, PinholeCamera::new(pose, calibration))
        })
        .collect();

    let points: Vec<DVec3> = (0..num_points)
        .map(|_| {
            DVec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            )
        })
        .collect();

    let keypoints: Vec<Keypoints> = cameras
        .values()
        .map(|camera| {
            let coordinates = points
                .iter()
                .map(|&p| {
                    let noise = DVec2::new(
                        rng.random_range(-1.0..=1.0),
                        rng.random_range(-1.0..=1.0),
                    );
                    camera.project(p).unwrap_or_default() + pixel_noise * noise
                })
                .collect();
            Keypoints::new(coordinates)
        })
        .collect();

    let mut matches = PairwiseMatches::new();
    for i1 in 0..num_images {
        for i2 in (i1 + 1)..num_images {
            matches.insert((i1, i2), (0..num_points).map(|k| (k, k)).collect());
        }
    }

    SyntheticScene {
        num_images,
        cameras,
        points,
        keypoints,
        matches,
    }
}

/// Rotate and translate every camera by a random small amount.
pub fn perturb_cameras(
    cameras: &BTreeMap<usize, PinholeCamera>,
    rotation_deg: f64,
    translation: f64,
    seed: u64,
) -> BTreeMap<usize, PinholeCamera> {
    let mut rng = StdRng::seed_from_u64(seed);
    cameras
        .iter()
        .map(|(&index, camera)| {
            let axis = DVec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            )
            .normalize_or(DVec3::Z);
            let dq = DQuat::from_axis_angle(axis, rotation_deg.to_radians());
            let dt = DVec3::new(
                rng.random_range(-translation..=translation),
                rng.random_range(-translation..=translation),
                rng.random_range(-translation..=translation),
            );
            let pose = Pose3::new(
                dq * camera.pose.rotation,
                camera.pose.translation + dt,
            );
            (index, PinholeCamera::new(pose, camera.calibration))
        })
        .collect()
}
