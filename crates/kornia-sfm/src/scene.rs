//! Scene model: cameras and the landmarks they observe.
//!
//! Narrowing operations ([`SceneModel::select_largest_connected_component`],
//! [`SceneModel::filter_landmarks`]) return a new model and leave the input
//! untouched, so callers can report metrics before and after.

use std::collections::{BTreeMap, BTreeSet};

use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::PinholeCamera;
use crate::metrics::{DistributionSummary, SceneMetrics};
use crate::track::{Measurement, Track2d};
use crate::union_find::UnionFind;

/// Errors raised when inserting into a [`SceneModel`].
#[derive(Debug, Error)]
pub enum SceneError {
    /// Camera index is not below the number of images.
    #[error("camera index {index} is out of range for {num_images} images")]
    CameraIndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of images in the scene.
        num_images: usize,
    },

    /// A landmark measurement refers to a camera that is not in the scene.
    #[error("landmark measurement refers to missing camera {camera_index}")]
    MissingCamera {
        /// Index of the missing camera.
        camera_index: usize,
    },

    /// A landmark needs at least one measurement.
    #[error("landmark has no measurements")]
    EmptyLandmark,
}

/// A 3D point with the measurements supporting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Position in world coordinates.
    pub point: DVec3,
    /// Supporting measurements.
    pub measurements: Vec<Measurement>,
}

impl Landmark {
    /// Create a landmark.
    pub fn new(point: DVec3, measurements: Vec<Measurement>) -> Self {
        Self {
            point,
            measurements,
        }
    }

    /// Number of measurements.
    pub fn number_measurements(&self) -> usize {
        self.measurements.len()
    }

    /// Measurement at `idx`.
    pub fn measurement(&self, idx: usize) -> Option<&Measurement> {
        self.measurements.get(idx)
    }

    /// Camera index of every measurement.
    pub fn camera_indices(&self) -> Vec<usize> {
        self.measurements.iter().map(|m| m.camera_index).collect()
    }

    /// The 2D track of this landmark.
    pub fn to_track2d(&self) -> Track2d {
        Track2d::new(self.measurements.clone())
    }
}

/// Cameras indexed by image plus an ordered list of landmarks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneModel {
    num_images: usize,
    cameras: BTreeMap<usize, PinholeCamera>,
    landmarks: Vec<Landmark>,
}

impl SceneModel {
    /// Create an empty scene over `num_images` images.
    pub fn new(num_images: usize) -> Self {
        Self {
            num_images,
            cameras: BTreeMap::new(),
            landmarks: Vec::new(),
        }
    }

    /// Insert or replace the camera of image `index`.
    pub fn add_camera(&mut self, index: usize, camera: PinholeCamera) -> Result<(), SceneError> {
        if index >= self.num_images {
            return Err(SceneError::CameraIndexOutOfRange {
                index,
                num_images: self.num_images,
            });
        }
        self.cameras.insert(index, camera);
        Ok(())
    }

    /// Append a landmark whose cameras are already in the scene.
    pub fn add_landmark(&mut self, landmark: Landmark) -> Result<(), SceneError> {
        if landmark.measurements.is_empty() {
            return Err(SceneError::EmptyLandmark);
        }
        if let Some(m) = landmark
            .measurements
            .iter()
            .find(|m| !self.cameras.contains_key(&m.camera_index))
        {
            return Err(SceneError::MissingCamera {
                camera_index: m.camera_index,
            });
        }
        self.landmarks.push(landmark);
        Ok(())
    }

    /// Number of images the scene was created for.
    pub fn number_images(&self) -> usize {
        self.num_images
    }

    /// Number of cameras with an estimate.
    pub fn number_cameras(&self) -> usize {
        self.cameras.len()
    }

    /// Number of landmarks.
    pub fn number_landmarks(&self) -> usize {
        self.landmarks.len()
    }

    /// Camera of image `index`.
    pub fn camera(&self, index: usize) -> Option<&PinholeCamera> {
        self.cameras.get(&index)
    }

    /// All cameras.
    pub fn cameras(&self) -> &BTreeMap<usize, PinholeCamera> {
        &self.cameras
    }

    /// Landmark at `idx`.
    pub fn landmark(&self, idx: usize) -> Option<&Landmark> {
        self.landmarks.get(idx)
    }

    /// All landmarks.
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    /// Image indices that have a camera, ascending.
    pub fn valid_camera_indices(&self) -> Vec<usize> {
        self.cameras.keys().copied().collect()
    }

    /// Reprojection error of every measurement of `landmark`.
    ///
    /// Measurements whose camera is missing or sees the point behind it are infinite.
    pub fn landmark_measurement_errors(&self, landmark: &Landmark) -> Vec<f64> {
        landmark
            .measurements
            .iter()
            .map(|m| {
                self.cameras
                    .get(&m.camera_index)
                    .map_or(f64::INFINITY, |c| c.reprojection_error(landmark.point, m.uv))
            })
            .collect()
    }

    /// Mean reprojection error of `landmark`.
    pub fn landmark_mean_error(&self, landmark: &Landmark) -> f64 {
        let errors = self.landmark_measurement_errors(landmark);
        if errors.is_empty() {
            return f64::INFINITY;
        }
        errors.iter().sum::<f64>() / errors.len() as f64
    }

    /// Mean reprojection error of each landmark, in landmark order.
    pub fn landmark_reprojection_errors(&self) -> Vec<f64> {
        self.landmarks
            .iter()
            .map(|l| self.landmark_mean_error(l))
            .collect()
    }

    /// Reprojection error of every measurement in the scene.
    pub fn scene_reprojection_errors(&self) -> Vec<f64> {
        self.landmarks
            .iter()
            .flat_map(|l| self.landmark_measurement_errors(l))
            .collect()
    }

    /// Number of measurements of each landmark.
    pub fn track_lengths(&self) -> Vec<usize> {
        self.landmarks
            .iter()
            .map(Landmark::number_measurements)
            .collect()
    }

    /// Mean and median track length, zero for an empty scene.
    pub fn track_length_statistics(&self) -> (f64, f64) {
        let summary = DistributionSummary::from_counts(&self.track_lengths());
        (summary.mean, summary.median)
    }

    /// Camera count, landmark count and distributions of track length and error.
    pub fn aggregate_metrics(&self) -> SceneMetrics {
        SceneMetrics {
            num_cameras: self.cameras.len(),
            num_landmarks: self.landmarks.len(),
            track_length: DistributionSummary::from_counts(&self.track_lengths()),
            reprojection_error: DistributionSummary::from_values(
                &self.landmark_reprojection_errors(),
            ),
        }
    }

    /// Log summary statistics of the per-measurement reprojection errors.
    pub fn log_reprojection_error_stats(&self) {
        let summary = DistributionSummary::from_values(&self.scene_reprojection_errors());
        log::info!(
            "reprojection error over {} measurements: mean {:.3}, median {:.3}, min {:.3}, max {:.3}",
            summary.count,
            summary.mean,
            summary.median,
            summary.min,
            summary.max
        );
    }

    /// Keep the largest connected component of the camera/landmark visibility graph.
    ///
    /// Components are compared by total node count. Ties go to the component whose
    /// first node comes first, cameras ascending by index and then landmarks in order.
    /// Components without a landmark are never selected, so a scene without
    /// landmarks yields an empty model.
    pub fn select_largest_connected_component(&self) -> SceneModel {
        let camera_indices = self.valid_camera_indices();
        if camera_indices.is_empty() || self.landmarks.is_empty() {
            return SceneModel::new(self.num_images);
        }

        let node_of_camera: BTreeMap<usize, usize> = camera_indices
            .iter()
            .enumerate()
            .map(|(node, &index)| (index, node))
            .collect();
        let num_cameras = camera_indices.len();

        let mut dsf = UnionFind::new(num_cameras + self.landmarks.len());
        for (j, landmark) in self.landmarks.iter().enumerate() {
            for m in &landmark.measurements {
                if let Some(&node) = node_of_camera.get(&m.camera_index) {
                    dsf.connect(num_cameras + j, node);
                }
            }
        }

        // groups are ordered by their first node, so the first maximum wins ties
        let groups = dsf.groups();
        let mut largest: &[usize] = &[];
        for group in &groups {
            let has_landmark = group.iter().any(|&node| node >= num_cameras);
            if has_landmark && group.len() > largest.len() {
                largest = group.as_slice();
            }
        }

        let mut component = SceneModel::new(self.num_images);
        for &node in largest {
            if node < num_cameras {
                let index = camera_indices[node];
                if let Some(camera) = self.cameras.get(&index) {
                    component.cameras.insert(index, *camera);
                }
            } else {
                component
                    .landmarks
                    .push(self.landmarks[node - num_cameras].clone());
            }
        }
        component
    }

    /// Drop landmarks whose mean reprojection error exceeds `reproj_error_thresh`.
    ///
    /// Only cameras that observe a retained landmark are kept.
    pub fn filter_landmarks(&self, reproj_error_thresh: f64) -> SceneModel {
        let landmarks: Vec<Landmark> = self
            .landmarks
            .iter()
            .filter(|l| self.landmark_mean_error(l) <= reproj_error_thresh)
            .cloned()
            .collect();

        let observing: BTreeSet<usize> = landmarks
            .iter()
            .flat_map(|l| l.measurements.iter().map(|m| m.camera_index))
            .collect();

        SceneModel {
            num_images: self.num_images,
            cameras: self
                .cameras
                .iter()
                .filter(|(index, _)| observing.contains(index))
                .map(|(&index, camera)| (index, *camera))
                .collect(),
            landmarks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Calibration, Pose3};
    use glam::DVec2;

    fn camera_at(x: f64) -> PinholeCamera {
        PinholeCamera::new(
            Pose3::new(glam::DQuat::IDENTITY, DVec3::new(-x, 0.0, 0.0)),
            Calibration::new(100.0, 0.0, 0.0),
        )
    }

    fn observed(scene: &SceneModel, point: DVec3, cameras: &[usize], offset: f64) -> Landmark {
        Landmark::new(
            point,
            cameras
                .iter()
                .map(|&i| {
                    let uv = scene.camera(i).unwrap().project(point).unwrap();
                    Measurement::new(i, uv + DVec2::new(offset, 0.0))
                })
                .collect(),
        )
    }

    fn two_component_scene() -> SceneModel {
        let mut scene = SceneModel::new(6);
        for i in 0..5 {
            scene.add_camera(i, camera_at(i as f64)).unwrap();
        }
        // component A: cameras 0, 1 with one landmark
        let l = observed(&scene, DVec3::new(0.5, 0.0, 5.0), &[0, 1], 0.0);
        scene.add_landmark(l).unwrap();
        // component B: cameras 2, 3, 4 with two landmarks
        let l = observed(&scene, DVec3::new(3.0, 0.0, 5.0), &[2, 3], 0.0);
        scene.add_landmark(l).unwrap();
        let l = observed(&scene, DVec3::new(3.5, 1.0, 6.0), &[3, 4], 2.0);
        scene.add_landmark(l).unwrap();
        scene
    }

    #[test]
    fn test_add_validation() {
        let mut scene = SceneModel::new(2);
        assert!(matches!(
            scene.add_camera(2, camera_at(0.0)),
            Err(SceneError::CameraIndexOutOfRange { index: 2, .. })
        ));
        scene.add_camera(0, camera_at(0.0)).unwrap();
        assert!(matches!(
            scene.add_landmark(Landmark::new(DVec3::Z, vec![])),
            Err(SceneError::EmptyLandmark)
        ));
        assert!(matches!(
            scene.add_landmark(Landmark::new(
                DVec3::Z,
                vec![Measurement::new(1, DVec2::ZERO)]
            )),
            Err(SceneError::MissingCamera { camera_index: 1 })
        ));
        assert_eq!(scene.valid_camera_indices(), vec![0]);
    }

    #[test]
    fn test_largest_component() {
        let scene = two_component_scene();
        let component = scene.select_largest_connected_component();
        assert_eq!(component.valid_camera_indices(), vec![2, 3, 4]);
        assert_eq!(component.number_landmarks(), 2);
        assert_eq!(component.number_images(), 6);
        // input untouched
        assert_eq!(scene.number_landmarks(), 3);
        assert_eq!(scene.number_cameras(), 5);
    }

    #[test]
    fn test_largest_component_is_idempotent() {
        let scene = two_component_scene();
        let once = scene.select_largest_connected_component();
        let twice = once.select_largest_connected_component();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_largest_component_tie_break() {
        let mut scene = SceneModel::new(4);
        for i in 0..4 {
            scene.add_camera(i, camera_at(i as f64)).unwrap();
        }
        let l = observed(&scene, DVec3::new(2.5, 0.0, 5.0), &[2, 3], 0.0);
        scene.add_landmark(l).unwrap();
        let l = observed(&scene, DVec3::new(0.5, 0.0, 5.0), &[0, 1], 0.0);
        scene.add_landmark(l).unwrap();

        let component = scene.select_largest_connected_component();
        assert_eq!(component.valid_camera_indices(), vec![0, 1]);
        assert_eq!(component, component.select_largest_connected_component());
    }

    #[test]
    fn test_largest_component_without_landmarks_is_empty() {
        let mut scene = SceneModel::new(3);
        for i in 0..3 {
            scene.add_camera(i, camera_at(i as f64)).unwrap();
        }
        let component = scene.select_largest_connected_component();
        assert_eq!(component.number_cameras(), 0);
        assert_eq!(component.number_landmarks(), 0);
        assert_eq!(component.number_images(), 3);
    }

    #[test]
    fn test_filter_landmarks() {
        let scene = two_component_scene();
        let filtered = scene.filter_landmarks(1.0);

        assert!(filtered.number_landmarks() <= scene.number_landmarks());
        assert_eq!(filtered.number_landmarks(), 2);
        for error in filtered.landmark_reprojection_errors() {
            assert!(error <= 1.0);
        }
        // camera 4 only observes the dropped landmark
        assert_eq!(filtered.valid_camera_indices(), vec![0, 1, 2, 3]);
        assert_eq!(scene.number_landmarks(), 3);
    }

    #[test]
    fn test_filter_landmarks_behind_camera() {
        let mut scene = SceneModel::new(1);
        scene.add_camera(0, camera_at(0.0)).unwrap();
        scene
            .add_landmark(Landmark::new(
                DVec3::new(0.0, 0.0, -3.0),
                vec![Measurement::new(0, DVec2::ZERO)],
            ))
            .unwrap();
        assert_eq!(scene.filter_landmarks(1e9).number_landmarks(), 0);
    }

    #[test]
    fn test_metrics() {
        let scene = two_component_scene();
        let metrics = scene.aggregate_metrics();
        assert_eq!(metrics.num_cameras, 5);
        assert_eq!(metrics.num_landmarks, 3);
        assert_eq!(metrics.track_length.count, 3);
        assert_eq!(metrics.track_length.max, 2.0);
        assert!((metrics.reprojection_error.max - 2.0).abs() < 1e-9);
        assert_eq!(scene.track_length_statistics(), (2.0, 2.0));
        assert_eq!(scene.scene_reprojection_errors().len(), 6);

        let empty = SceneModel::new(3).aggregate_metrics();
        assert_eq!(empty.num_landmarks, 0);
        assert_eq!(empty.track_length.mean, 0.0);
    }
}
