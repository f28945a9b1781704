use serde::{Deserialize, Serialize};

/// Count, mean, median and range of a set of values.
///
/// Non-finite values are excluded from every statistic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    /// Number of finite values.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Median, the mean of the two middle values for even counts.
    pub median: f64,
    /// Minimum.
    pub min: f64,
    /// Maximum.
    pub max: f64,
}

impl DistributionSummary {
    /// Summarize `values`. An empty input yields all zeros.
    pub fn from_values(values: &[f64]) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            0.5 * (sorted[count / 2 - 1] + sorted[count / 2])
        };

        Self {
            count,
            mean,
            median,
            min: sorted[0],
            max: sorted[count - 1],
        }
    }

    /// Summarize integer values such as track lengths.
    pub fn from_counts(values: &[usize]) -> Self {
        let values: Vec<f64> = values.iter().map(|&v| v as f64).collect();
        Self::from_values(&values)
    }
}

/// Aggregate statistics of a scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneMetrics {
    /// Number of cameras.
    pub num_cameras: usize,
    /// Number of landmarks.
    pub num_landmarks: usize,
    /// Measurements per landmark.
    pub track_length: DistributionSummary,
    /// Mean reprojection error per landmark, in pixels.
    pub reprojection_error: DistributionSummary,
}

/// `count / total`, or zero for an empty total.
pub(crate) fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}
