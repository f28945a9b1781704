use std::collections::{BTreeMap, HashSet};

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::track_builder::TrackError;

/// Keypoint index pairs between two images, keyed by `(image_i, image_j)`.
pub type PairwiseMatches = BTreeMap<(usize, usize), Vec<(usize, usize)>>;

/// Pixel coordinates of the keypoints detected in one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoints {
    /// Keypoint coordinates in pixels, indexed by keypoint id.
    pub coordinates: Vec<DVec2>,
}

impl Keypoints {
    /// Create keypoints from pixel coordinates.
    pub fn new(coordinates: Vec<DVec2>) -> Self {
        Self { coordinates }
    }

    /// Create keypoints from `N x 2` rows.
    ///
    /// Every row must contain exactly two values.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, TrackError> {
        let coordinates = rows
            .iter()
            .enumerate()
            .map(|(row, values)| match values.as_slice() {
                [x, y] => Ok(DVec2::new(*x, *y)),
                _ => Err(TrackError::MalformedKeypoints {
                    row,
                    columns: values.len(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { coordinates })
    }

    /// Number of keypoints.
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    /// Whether the image has no keypoints.
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Coordinates of keypoint `idx`.
    pub fn get(&self, idx: usize) -> Option<DVec2> {
        self.coordinates.get(idx).copied()
    }
}

/// One observation of a landmark in one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Index of the observing camera.
    pub camera_index: usize,
    /// Observed pixel coordinate.
    pub uv: DVec2,
}

impl Measurement {
    /// Create a new measurement.
    pub fn new(camera_index: usize, uv: DVec2) -> Self {
        Self { camera_index, uv }
    }
}

/// A set of measurements believed to observe the same landmark.
///
/// Equality ignores measurement order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Track2d {
    measurements: Vec<Measurement>,
}

impl Track2d {
    /// Create a track from its measurements.
    pub fn new(measurements: Vec<Measurement>) -> Self {
        Self { measurements }
    }

    /// Number of measurements.
    pub fn number_measurements(&self) -> usize {
        self.measurements.len()
    }

    /// Measurement at `idx`.
    pub fn measurement(&self, idx: usize) -> Option<&Measurement> {
        self.measurements.get(idx)
    }

    /// All measurements.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Camera index of every measurement, in track order.
    pub fn camera_indices(&self) -> Vec<usize> {
        self.measurements.iter().map(|m| m.camera_index).collect()
    }

    /// True if no camera observes the track twice.
    pub fn validate_unique_cameras(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.measurements.len());
        self.measurements.iter().all(|m| seen.insert(m.camera_index))
    }

    /// New track made of the measurements at `idxs`.
    ///
    /// Out of range indices are ignored.
    pub fn select_subset(&self, idxs: &[usize]) -> Track2d {
        Track2d::new(
            idxs.iter()
                .filter_map(|&i| self.measurements.get(i).copied())
                .collect(),
        )
    }
}

impl PartialEq for Track2d {
    fn eq(&self, other: &Self) -> bool {
        if self.measurements.len() != other.measurements.len() {
            return false;
        }
        // multiset comparison, measurements carry floats so no hashing
        let mut used = vec![false; other.measurements.len()];
        self.measurements.iter().all(|m| {
            let found = other
                .measurements
                .iter()
                .enumerate()
                .position(|(j, o)| !used[j] && o == m);
            match found {
                Some(j) => {
                    used[j] = true;
                    true
                }
                None => false,
            }
        })
    }
}
