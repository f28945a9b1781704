//! Data association: build tracks, triangulate them and assemble a scene.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::PinholeCamera;
use crate::metrics::{ratio, DistributionSummary};
use crate::scene::{SceneError, SceneModel};
use crate::track::{Keypoints, PairwiseMatches, Track2d};
use crate::track_builder::{TrackBuilder, TrackError};
use crate::triangulation::{
    LandmarkInitializer, TriangulationExitCode, TriangulationParams, TriangulationResult,
};

/// Errors raised by [`DataAssociation::run`].
#[derive(Debug, Error)]
pub enum DataAssociationError {
    /// Malformed matches or keypoints.
    #[error(transparent)]
    Track(#[from] TrackError),

    /// Cameras or landmarks inconsistent with the scene.
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// The number of keypoint lists does not match the number of images.
    #[error("expected {num_images} keypoint lists, got {num_keypoint_lists}")]
    KeypointCountMismatch {
        /// Number of images.
        num_images: usize,
        /// Number of keypoint lists provided.
        num_keypoint_lists: usize,
    },
}

/// Parameters of the data association stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataAssociationConfig {
    /// Minimum number of measurements of an accepted landmark.
    pub min_track_len: usize,
    /// Landmark initialization parameters.
    pub triangulation: TriangulationParams,
    /// Seed of the per-track random generators.
    pub random_seed: u64,
}

impl Default for DataAssociationConfig {
    fn default() -> Self {
        Self {
            min_track_len: 2,
            triangulation: TriangulationParams::default(),
            random_seed: 0,
        }
    }
}

impl DataAssociationConfig {
    /// Set the minimum track length.
    pub fn with_min_track_len(mut self, min_track_len: usize) -> Self {
        self.min_track_len = min_track_len;
        self
    }

    /// Set the triangulation parameters.
    pub fn with_triangulation(mut self, triangulation: TriangulationParams) -> Self {
        self.triangulation = triangulation;
        self
    }

    /// Set the random seed.
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }
}

/// Outcome statistics of the data association stage.
///
/// Ratios are taken over the number of input tracks and are zero without tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataAssociationMetrics {
    /// Number of 2D tracks given to triangulation.
    pub num_input_tracks: usize,
    /// Candidate tracks dropped for observing a camera twice.
    pub num_rejected_2d_tracks: usize,
    /// Length of the 2D tracks.
    pub track_length_2d: DistributionSummary,
    /// Mean 2D track length.
    pub mean_track_length_before: f64,
    /// Mean length of the triangulated and accepted tracks.
    pub mean_track_length_after: f64,
    /// Fraction of tracks triangulated successfully.
    pub triangulation_success_ratio: f64,
    /// Fraction of tracks failing cheirality.
    pub cheirality_failure_ratio: f64,
    /// Fraction of tracks with too small a baseline.
    pub small_baseline_failure_ratio: f64,
    /// Fraction of tracks above the reprojection threshold.
    pub exceeds_reproj_thresh_ratio: f64,
    /// Fraction of tracks with fewer than two usable measurements.
    pub insufficient_measurements_ratio: f64,
    /// Landmarks in the final scene.
    pub num_accepted_tracks: usize,
    /// `num_accepted_tracks` over the number of input tracks.
    pub accepted_tracks_ratio: f64,
    /// Cameras in the final scene.
    pub num_cameras: usize,
    /// Mean reprojection error of the accepted tracks.
    pub accepted_track_errors: DistributionSummary,
    /// Mean reprojection error of the rejected tracks, when computable.
    pub rejected_track_errors: DistributionSummary,
}

/// Orchestrates track building, triangulation and scene assembly.
#[derive(Debug, Clone, Default)]
pub struct DataAssociation {
    config: DataAssociationConfig,
}

impl DataAssociation {
    /// Create the stage.
    pub fn new(config: DataAssociationConfig) -> Self {
        Self { config }
    }

    /// Stage configuration.
    pub fn config(&self) -> &DataAssociationConfig {
        &self.config
    }

    /// Build a scene from matches and the current camera estimates.
    ///
    /// Tracks are triangulated in parallel with a generator seeded from the
    /// configured seed and the track index, then accumulated in track order. The
    /// returned scene is the largest connected component.
    pub fn run(
        &self,
        num_images: usize,
        cameras: &BTreeMap<usize, PinholeCamera>,
        matches: &PairwiseMatches,
        keypoints: &[Keypoints],
    ) -> Result<(SceneModel, DataAssociationMetrics), DataAssociationError> {
        if keypoints.len() != num_images {
            return Err(DataAssociationError::KeypointCountMismatch {
                num_images,
                num_keypoint_lists: keypoints.len(),
            });
        }

        let (tracks, report) = TrackBuilder::build_with_report(matches, keypoints)?;

        let mut scene = SceneModel::new(num_images);
        for (&index, camera) in cameras {
            scene.add_camera(index, *camera)?;
        }

        let initializer = LandmarkInitializer::new(cameras, self.config.triangulation.clone());
        let seed = self.config.random_seed;
        let results: Vec<TriangulationResult> = tracks
            .par_iter()
            .enumerate()
            .map(|(idx, track)| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(idx as u64));
                initializer.triangulate(track, &mut rng)
            })
            .collect();

        let mut exit_codes: BTreeMap<TriangulationExitCode, usize> = BTreeMap::new();
        let mut accepted_errors = Vec::new();
        let mut rejected_errors = Vec::new();
        for result in results {
            *exit_codes.entry(result.exit_code).or_default() += 1;
            match result.landmark {
                Some(landmark) if landmark.number_measurements() >= self.config.min_track_len => {
                    accepted_errors.extend(result.avg_reprojection_error);
                    scene.add_landmark(landmark)?;
                }
                _ => rejected_errors.extend(result.avg_reprojection_error),
            }
        }

        let mean_track_length_after = scene.track_length_statistics().0;
        let num_triangulated = scene.number_landmarks();
        let scene = scene.select_largest_connected_component();

        let num_tracks = tracks.len();
        let code_ratio = |code: TriangulationExitCode| {
            ratio(exit_codes.get(&code).copied().unwrap_or(0), num_tracks)
        };
        let track_lengths: Vec<usize> = tracks.iter().map(Track2d::number_measurements).collect();
        let track_length_2d = DistributionSummary::from_counts(&track_lengths);

        let metrics = DataAssociationMetrics {
            num_input_tracks: num_tracks,
            num_rejected_2d_tracks: report.num_rejected,
            track_length_2d,
            mean_track_length_before: track_length_2d.mean,
            mean_track_length_after,
            triangulation_success_ratio: code_ratio(TriangulationExitCode::Success),
            cheirality_failure_ratio: code_ratio(TriangulationExitCode::CheiralityFailure),
            small_baseline_failure_ratio: code_ratio(TriangulationExitCode::SmallBaseline),
            exceeds_reproj_thresh_ratio: code_ratio(TriangulationExitCode::ExceedsReprojThresh),
            insufficient_measurements_ratio: code_ratio(
                TriangulationExitCode::InsufficientMeasurements,
            ),
            num_accepted_tracks: scene.number_landmarks(),
            accepted_tracks_ratio: ratio(scene.number_landmarks(), num_tracks),
            num_cameras: scene.number_cameras(),
            accepted_track_errors: DistributionSummary::from_values(&accepted_errors),
            rejected_track_errors: DistributionSummary::from_values(&rejected_errors),
        };

        log::info!(
            "data association: {} tracks, {} triangulated, {} in the largest component over {} cameras",
            num_tracks,
            num_triangulated,
            metrics.num_accepted_tracks,
            metrics.num_cameras
        );
        log::debug!(
            "mean track length {:.2} before and {:.2} after triangulation",
            metrics.mean_track_length_before,
            metrics.mean_track_length_after
        );

        Ok((scene, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Calibration, Pose3};
    use crate::triangulation::{RansacSampling, TriangulationMode};
    use glam::{DVec2, DVec3};

    struct Fixture {
        cameras: BTreeMap<usize, PinholeCamera>,
        keypoints: Vec<Keypoints>,
        matches: PairwiseMatches,
    }

    /// Three cameras observing four points; every point is matched across all pairs.
    fn fixture() -> Fixture {
        let cameras: BTreeMap<usize, PinholeCamera> = (0..3)
            .map(|i| {
                let eye = DVec3::new(-1.0 + i as f64, 0.2, -5.0);
                let pose = Pose3::look_at(eye, DVec3::ZERO, DVec3::Y);
                (i, PinholeCamera::new(pose, Calibration::new(400.0, 320.0, 240.0)))
            })
            .collect();
        let points = [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(0.5, -0.3, 0.2),
            DVec3::new(-0.4, 0.4, -0.3),
            DVec3::new(0.2, 0.6, 0.5),
        ];
        let keypoints: Vec<Keypoints> = cameras
            .values()
            .map(|c| Keypoints::new(points.iter().map(|p| c.project(*p).unwrap()).collect()))
            .collect();
        let mut matches = PairwiseMatches::new();
        for (i1, i2) in [(0, 1), (0, 2), (1, 2)] {
            matches.insert((i1, i2), (0..points.len()).map(|k| (k, k)).collect());
        }
        Fixture {
            cameras,
            keypoints,
            matches,
        }
    }

    #[test]
    fn test_all_tracks_accepted() {
        let f = fixture();
        let stage = DataAssociation::new(DataAssociationConfig::default().with_min_track_len(3));
        let (scene, metrics) = stage
            .run(3, &f.cameras, &f.matches, &f.keypoints)
            .unwrap();

        assert_eq!(scene.number_landmarks(), 4);
        assert_eq!(scene.number_cameras(), 3);
        assert_eq!(metrics.num_input_tracks, 4);
        assert_eq!(metrics.triangulation_success_ratio, 1.0);
        assert_eq!(metrics.accepted_tracks_ratio, 1.0);
        assert_eq!(metrics.mean_track_length_before, 3.0);
        assert_eq!(metrics.mean_track_length_after, 3.0);
        assert_eq!(metrics.accepted_track_errors.count, 4);
    }

    #[test]
    fn test_min_track_len_rejects() {
        let f = fixture();
        let stage = DataAssociation::new(DataAssociationConfig::default().with_min_track_len(4));
        let (scene, metrics) = stage
            .run(3, &f.cameras, &f.matches, &f.keypoints)
            .unwrap();

        assert_eq!(scene.number_landmarks(), 0);
        assert_eq!(metrics.triangulation_success_ratio, 1.0);
        assert_eq!(metrics.num_accepted_tracks, 0);
        assert_eq!(metrics.accepted_tracks_ratio, 0.0);
        assert_eq!(metrics.rejected_track_errors.count, 4);
    }

    #[test]
    fn test_ratios_reflect_failures() {
        let mut f = fixture();
        // corrupt one observation of the first point beyond repair in direct mode
        f.keypoints[1].coordinates[0] += DVec2::new(150.0, 0.0);
        let triangulation = TriangulationParams::default()
            .with_mode(TriangulationMode::Direct)
            .with_reproj_error_thresh(2.0);
        let stage =
            DataAssociation::new(DataAssociationConfig::default().with_triangulation(triangulation));
        let (scene, metrics) = stage
            .run(3, &f.cameras, &f.matches, &f.keypoints)
            .unwrap();

        assert_eq!(scene.number_landmarks(), 3);
        assert_eq!(metrics.triangulation_success_ratio, 0.75);
        assert_eq!(
            metrics.exceeds_reproj_thresh_ratio + metrics.cheirality_failure_ratio,
            0.25
        );
    }

    #[test]
    fn test_parallel_run_is_deterministic() {
        let f = fixture();
        let triangulation = TriangulationParams::default()
            .with_mode(TriangulationMode::Ransac(RansacSampling::BaselineBiased))
            .with_num_ransac_hypotheses(Some(2));
        let stage = DataAssociation::new(
            DataAssociationConfig::default()
                .with_triangulation(triangulation)
                .with_random_seed(42),
        );
        let a = stage.run(3, &f.cameras, &f.matches, &f.keypoints).unwrap();
        let b = stage.run(3, &f.cameras, &f.matches, &f.keypoints).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn test_empty_matches() {
        let f = fixture();
        let (scene, metrics) = DataAssociation::default()
            .run(3, &f.cameras, &PairwiseMatches::new(), &f.keypoints)
            .unwrap();
        assert_eq!(scene.number_landmarks(), 0);
        assert_eq!(metrics.num_input_tracks, 0);
        assert_eq!(metrics.triangulation_success_ratio, 0.0);
    }

    #[test]
    fn test_malformed_inputs() {
        let f = fixture();
        let stage = DataAssociation::default();
        assert!(matches!(
            stage.run(4, &f.cameras, &f.matches, &f.keypoints),
            Err(DataAssociationError::KeypointCountMismatch { .. })
        ));

        let mut matches = f.matches.clone();
        matches.insert((0, 1), vec![(0, 99)]);
        assert!(matches!(
            stage.run(3, &f.cameras, &matches, &f.keypoints),
            Err(DataAssociationError::Track(_))
        ));
    }
}
