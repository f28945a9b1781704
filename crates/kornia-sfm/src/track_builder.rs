//! Build 2D tracks from pairwise keypoint matches.
//!
//! Every `(image_index, keypoint_index)` seen in a match gets a dense id in a
//! [`UnionFind`] forest. Each equivalence class is a candidate track; classes
//! with two keypoints in the same image are inconsistent and dropped.

use std::collections::HashMap;

use thiserror::Error;

use crate::track::{Keypoints, Measurement, PairwiseMatches, Track2d};
use crate::union_find::UnionFind;

/// Errors raised for malformed track building inputs.
#[derive(Debug, Error)]
pub enum TrackError {
    /// A match references an image without keypoints.
    #[error("image index {image} is out of range for {num_images} keypoint lists")]
    ImageIndexOutOfRange {
        /// Offending image index.
        image: usize,
        /// Number of keypoint lists.
        num_images: usize,
    },

    /// A match references a keypoint that does not exist.
    #[error("keypoint {keypoint} is out of range for image {image} with {num_keypoints} keypoints")]
    KeypointIndexOutOfRange {
        /// Image of the keypoint.
        image: usize,
        /// Offending keypoint index.
        keypoint: usize,
        /// Number of keypoints in the image.
        num_keypoints: usize,
    },

    /// Matches between an image and itself.
    #[error("matches between image {image} and itself")]
    SelfMatch {
        /// Offending image index.
        image: usize,
    },

    /// Keypoint rows must have exactly two columns.
    #[error("keypoint row {row} has {columns} columns, expected 2")]
    MalformedKeypoints {
        /// Offending row.
        row: usize,
        /// Number of columns found.
        columns: usize,
    },
}

/// Counts gathered while building tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackBuildReport {
    /// Number of equivalence classes found.
    pub num_candidates: usize,
    /// Classes dropped because two keypoints share an image.
    pub num_rejected: usize,
}

/// Builds 2D tracks from pairwise matches.
pub struct TrackBuilder;

impl TrackBuilder {
    /// Build tracks from `matches`, looking up coordinates in `keypoints`.
    ///
    /// Tracks are returned in order of first appearance of any of their keypoints,
    /// with measurements in order of first appearance.
    pub fn build(
        matches: &PairwiseMatches,
        keypoints: &[Keypoints],
    ) -> Result<Vec<Track2d>, TrackError> {
        Self::build_with_report(matches, keypoints).map(|(tracks, _)| tracks)
    }

    /// Same as [`Self::build`], also reporting how many classes were rejected.
    pub fn build_with_report(
        matches: &PairwiseMatches,
        keypoints: &[Keypoints],
    ) -> Result<(Vec<Track2d>, TrackBuildReport), TrackError> {
        validate_matches(matches, keypoints)?;

        let mut ids: HashMap<(usize, usize), usize> = HashMap::new();
        let mut keys: Vec<(usize, usize)> = Vec::new();
        let mut dsf = UnionFind::default();

        let mut id_of = |key: (usize, usize), dsf: &mut UnionFind| {
            *ids.entry(key).or_insert_with(|| {
                keys.push(key);
                dsf.add()
            })
        };

        for (&(i1, i2), pairs) in matches {
            for &(k1, k2) in pairs {
                let a = id_of((i1, k1), &mut dsf);
                let b = id_of((i2, k2), &mut dsf);
                dsf.connect(a, b);
            }
        }

        let groups = dsf.groups();
        let mut report = TrackBuildReport {
            num_candidates: groups.len(),
            num_rejected: 0,
        };

        let mut tracks = Vec::with_capacity(groups.len());
        for group in groups {
            let measurements: Vec<Measurement> = group
                .iter()
                .filter_map(|&id| {
                    let (image, keypoint) = keys[id];
                    keypoints[image]
                        .get(keypoint)
                        .map(|uv| Measurement::new(image, uv))
                })
                .collect();

            let track = Track2d::new(measurements);
            if track.validate_unique_cameras() {
                tracks.push(track);
            } else {
                report.num_rejected += 1;
            }
        }

        log::debug!(
            "built {} tracks from {} candidates, rejected {} with repeated cameras",
            tracks.len(),
            report.num_candidates,
            report.num_rejected
        );

        Ok((tracks, report))
    }
}

fn validate_matches(matches: &PairwiseMatches, keypoints: &[Keypoints]) -> Result<(), TrackError> {
    let num_images = keypoints.len();
    for (&(i1, i2), pairs) in matches {
        if i1 == i2 {
            return Err(TrackError::SelfMatch { image: i1 });
        }
        for image in [i1, i2] {
            if image >= num_images {
                return Err(TrackError::ImageIndexOutOfRange { image, num_images });
            }
        }
        for &(k1, k2) in pairs {
            for (image, keypoint) in [(i1, k1), (i2, k2)] {
                let num_keypoints = keypoints[image].len();
                if keypoint >= num_keypoints {
                    return Err(TrackError::KeypointIndexOutOfRange {
                        image,
                        keypoint,
                        num_keypoints,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    fn keypoints(num_images: usize, num_keypoints: usize) -> Vec<Keypoints> {
        (0..num_images)
            .map(|i| {
                Keypoints::new(
                    (0..num_keypoints)
                        .map(|k| DVec2::new(i as f64 * 100.0 + k as f64, k as f64))
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_three_view_single_track() {
        let kps = keypoints(3, 4);
        let mut matches = PairwiseMatches::new();
        matches.insert((0, 1), vec![(2, 1)]);
        matches.insert((1, 2), vec![(1, 3)]);
        matches.insert((0, 2), vec![(2, 3)]);

        let tracks = TrackBuilder::build(&matches, &kps).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].number_measurements(), 3);

        let expected = Track2d::new(vec![
            Measurement::new(2, DVec2::new(203.0, 3.0)),
            Measurement::new(0, DVec2::new(2.0, 2.0)),
            Measurement::new(1, DVec2::new(101.0, 1.0)),
        ]);
        assert_eq!(tracks[0], expected);
    }

    #[test]
    fn test_inconsistent_class_is_rejected() {
        let kps = keypoints(3, 4);
        let mut matches = PairwiseMatches::new();
        // keypoints 0 and 1 of image 0 end up chained together
        matches.insert((0, 1), vec![(0, 0), (3, 3)]);
        matches.insert((1, 2), vec![(0, 0)]);
        matches.insert((0, 2), vec![(1, 0)]);

        let (tracks, report) = TrackBuilder::build_with_report(&matches, &kps).unwrap();
        assert_eq!(report.num_candidates, 2);
        assert_eq!(report.num_rejected, 1);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].camera_indices(), vec![0, 1]);
        assert!(tracks.iter().all(|t| t.validate_unique_cameras()));
    }

    #[test]
    fn test_output_is_deterministic() {
        let kps = keypoints(4, 10);
        let mut matches = PairwiseMatches::new();
        matches.insert((0, 1), (0..10).map(|k| (k, (k + 1) % 10)).collect());
        matches.insert((1, 3), (0..10).map(|k| (k, 9 - k)).collect());
        matches.insert((2, 3), vec![(4, 4), (5, 5)]);

        let a = TrackBuilder::build(&matches, &kps).unwrap();
        let b = TrackBuilder::build(&matches, &kps).unwrap();
        assert_eq!(a.len(), b.len());
        for (ta, tb) in a.iter().zip(&b) {
            assert_eq!(ta.measurements(), tb.measurements());
        }
    }

    #[test]
    fn test_identical_tracks_are_not_merged() {
        let kps = keypoints(2, 3);
        let mut matches = PairwiseMatches::new();
        matches.insert((0, 1), vec![(0, 0), (1, 1)]);
        let tracks = TrackBuilder::build(&matches, &kps).unwrap();
        assert_eq!(tracks.len(), 2);
    }

    #[test]
    fn test_malformed_matches() {
        let kps = keypoints(2, 3);

        let mut matches = PairwiseMatches::new();
        matches.insert((0, 2), vec![(0, 0)]);
        assert!(matches!(
            TrackBuilder::build(&matches, &kps),
            Err(TrackError::ImageIndexOutOfRange {
                image: 2,
                num_images: 2
            })
        ));

        let mut matches = PairwiseMatches::new();
        matches.insert((0, 1), vec![(0, 5)]);
        assert!(matches!(
            TrackBuilder::build(&matches, &kps),
            Err(TrackError::KeypointIndexOutOfRange { keypoint: 5, .. })
        ));

        let mut matches = PairwiseMatches::new();
        matches.insert((1, 1), vec![(0, 1)]);
        assert!(matches!(
            TrackBuilder::build(&matches, &kps),
            Err(TrackError::SelfMatch { image: 1 })
        ));
    }
}
