use std::collections::BTreeMap;

use crate::bundle_adjustment::{BundleAdjuster, BundleAdjustmentMetrics};
use crate::camera::PinholeCamera;
use crate::config::SfmConfig;
use crate::data_association::{DataAssociation, DataAssociationError, DataAssociationMetrics};
use crate::scene::SceneModel;
use crate::track::{Keypoints, PairwiseMatches};

/// Scenes and metrics produced by [`SfmPipeline::run`].
#[derive(Debug, Clone)]
pub struct SfmResult {
    /// Scene after data association, the input of bundle adjustment.
    pub ba_input: SceneModel,
    /// Scene after bundle adjustment and filtering, empty if it failed.
    pub ba_output: SceneModel,
    /// Data association metrics.
    pub data_association_metrics: DataAssociationMetrics,
    /// Bundle adjustment metrics, `None` if it failed.
    pub bundle_adjustment_metrics: Option<BundleAdjustmentMetrics>,
}

/// Data association followed by bundle adjustment.
#[derive(Debug, Clone, Default)]
pub struct SfmPipeline {
    data_association: DataAssociation,
    bundle_adjuster: BundleAdjuster,
}

impl SfmPipeline {
    /// Create the pipeline from a configuration.
    pub fn new(config: SfmConfig) -> Self {
        Self {
            data_association: DataAssociation::new(config.data_association),
            bundle_adjuster: BundleAdjuster::new(config.bundle_adjustment),
        }
    }

    /// Build tracks and landmarks from `matches` then refine the scene.
    ///
    /// Malformed input is an error. A bundle adjustment failure is not: it is
    /// logged and yields an empty output scene.
    pub fn run(
        &self,
        num_images: usize,
        cameras: &BTreeMap<usize, PinholeCamera>,
        matches: &PairwiseMatches,
        keypoints: &[Keypoints],
    ) -> Result<SfmResult, DataAssociationError> {
        let (ba_input, data_association_metrics) =
            self.data_association
                .run(num_images, cameras, matches, keypoints)?;

        let (ba_output, bundle_adjustment_metrics) = match self.bundle_adjuster.optimize(&ba_input)
        {
            Ok(result) => (result.filtered, Some(result.metrics)),
            Err(err) => {
                log::error!("bundle adjustment failed: {err}");
                (SceneModel::new(num_images), None)
            }
        };

        Ok(SfmResult {
            ba_input,
            ba_output,
            data_association_metrics,
            bundle_adjustment_metrics,
        })
    }
}
