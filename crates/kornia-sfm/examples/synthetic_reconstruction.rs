use std::collections::BTreeMap;

use argh::FromArgs;
use glam::{DQuat, DVec2, DVec3};
use kornia_sfm::camera::{Calibration, CalibrationSharing, PinholeCamera, Pose3};
use kornia_sfm::config::SfmConfig;
use kornia_sfm::pipeline::SfmPipeline;
use kornia_sfm::track::{Keypoints, PairwiseMatches};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reconstructs a synthetic scene and prints the metrics as JSON
#[derive(Debug, FromArgs)]
struct Args {
    /// number of cameras placed on a circle around the scene
    #[argh(option, short = 'n', default = "8")]
    num_cameras: usize,

    /// number of random landmarks
    #[argh(option, short = 'l', default = "200")]
    num_landmarks: usize,

    /// standard deviation of the keypoint noise in pixels
    #[argh(option, short = 's', default = "0.5")]
    pixel_noise: f64,

    /// rotation perturbation of the initial cameras in degrees
    #[argh(option, default = "0.5")]
    rotation_noise_deg: f64,

    /// translation perturbation of the initial cameras
    #[argh(option, default = "0.05")]
    translation_noise: f64,

    /// estimate one calibration for all cameras
    #[argh(switch)]
    shared_calibration: bool,

    /// optional JSON configuration file
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// random seed
    #[argh(option, default = "0")]
    seed: u64,
}

fn uniform_vec3(rng: &mut StdRng, scale: f64) -> DVec3 {
    DVec3::new(
        rng.random_range(-scale..=scale),
        rng.random_range(-scale..=scale),
        rng.random_range(-scale..=scale),
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => SfmConfig::from_json_file(path)?,
        None => SfmConfig::default(),
    };
    if args.shared_calibration {
        config.bundle_adjustment.calibration_sharing = CalibrationSharing::Shared;
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let calibration = Calibration::new(600.0, 320.0, 240.0);

    let ground_truth: BTreeMap<usize, PinholeCamera> = (0..args.num_cameras)
        .map(|i| {
            let angle = std::f64::consts::TAU * i as f64 / args.num_cameras as f64;
            let eye = DVec3::new(8.0 * angle.cos(), 1.0, 8.0 * angle.sin());
            let pose = Pose3::look_at(eye, DVec3::ZERO, DVec3::Y);
            (i, PinholeCamera::new(pose, calibration))
        })
        .collect();

    let landmarks: Vec<DVec3> = (0..args.num_landmarks)
        .map(|_| uniform_vec3(&mut rng, 2.0))
        .collect();

    // keypoint k of every image observes landmark k, hidden ones are left unmatched
    let mut keypoints = Vec::with_capacity(args.num_cameras);
    let mut visible = Vec::with_capacity(args.num_cameras);
    for camera in ground_truth.values() {
        let mut coordinates = Vec::with_capacity(landmarks.len());
        let mut seen = Vec::with_capacity(landmarks.len());
        for &point in &landmarks {
            let uv = camera.project(point);
            seen.push(uv.is_some());
            let noise = DVec2::new(
                rng.random_range(-1.0..=1.0),
                rng.random_range(-1.0..=1.0),
            );
            coordinates.push(uv.unwrap_or_default() + args.pixel_noise * noise);
        }
        keypoints.push(Keypoints::new(coordinates));
        visible.push(seen);
    }

    let mut matches = PairwiseMatches::new();
    for i1 in 0..args.num_cameras {
        for i2 in (i1 + 1)..args.num_cameras {
            let pairs: Vec<(usize, usize)> = (0..landmarks.len())
                .filter(|&k| visible[i1][k] && visible[i2][k])
                .map(|k| (k, k))
                .collect();
            if !pairs.is_empty() {
                matches.insert((i1, i2), pairs);
            }
        }
    }

    let initial: BTreeMap<usize, PinholeCamera> = ground_truth
        .iter()
        .map(|(&i, camera)| {
            let axis = uniform_vec3(&mut rng, 1.0).normalize_or(DVec3::Y);
            let dq = DQuat::from_axis_angle(axis, args.rotation_noise_deg.to_radians());
            let pose = Pose3::new(
                dq * camera.pose.rotation,
                camera.pose.translation + uniform_vec3(&mut rng, args.translation_noise),
            );
            (i, PinholeCamera::new(pose, camera.calibration))
        })
        .collect();

    let pipeline = SfmPipeline::new(config);
    let result = pipeline.run(args.num_cameras, &initial, &matches, &keypoints)?;

    for (index, camera) in result.ba_output.cameras() {
        let truth = &ground_truth[index];
        log::info!(
            "camera {index}: rotation error {:.4} deg, center error {:.4}",
            camera.pose.rotation_angle_deg(&truth.pose),
            camera.center().distance(truth.center())
        );
    }

    let report = serde_json::json!({
        "data_association": result.data_association_metrics,
        "bundle_adjustment": result.bundle_adjustment_metrics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
