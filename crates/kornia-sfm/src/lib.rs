#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Joint refinement of cameras and landmarks.
pub mod bundle_adjustment;

/// Camera poses, calibration and projection.
pub mod camera;

/// Configuration loading for the full pipeline.
pub mod config;

/// Track building, triangulation and scene assembly.
pub mod data_association;

/// Distribution summaries and per-stage metric bundles.
pub mod metrics;

/// End-to-end reconstruction from matches to a refined scene.
pub mod pipeline;

/// Cameras plus triangulated landmarks.
pub mod scene;

/// 2D observations and tracks.
pub mod track;

/// Equivalence classes of keypoints from pairwise matches.
pub mod track_builder;

/// Landmark initialization from 2D tracks.
pub mod triangulation;

/// Disjoint-set forest over dense integer ids.
pub mod union_find;
