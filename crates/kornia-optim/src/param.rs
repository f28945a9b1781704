//! Local parameterizations for optimization on manifolds.
//!
//! Rotations are stored as unit quaternions `[qx, qy, qz, qw]` and updated with a
//! left perturbation `q' = exp(delta) * q`. Rigid transforms are stored as
//! `[qx, qy, qz, qw, tx, ty, tz]` and updated on rotation and translation separately.
use glam::{DQuat, DVec3};
use thiserror::Error;

use crate::lie::so3_exp;

/// Errors raised when applying a local update to a parameter block.
#[derive(Debug, Error)]
pub enum ParamError {
    /// The input global parameter block `x` is too small.
    #[error("global parameter block has wrong size: expected {expected}, got {got}")]
    WrongGlobalSize {
        /// Required size.
        expected: usize,
        /// Provided size.
        got: usize,
    },

    /// The input local update `delta` is too small.
    #[error("local update has wrong size: expected {expected}, got {got}")]
    WrongLocalSize {
        /// Required size.
        expected: usize,
        /// Provided size.
        got: usize,
    },

    /// The output buffer `out` is too small.
    #[error("output buffer has wrong size: expected {expected}, got {got}")]
    WrongOutSize {
        /// Required size.
        expected: usize,
        /// Provided size.
        got: usize,
    },
}

/// A manifold parameterization with a global storage size and a local tangent size.
pub trait Param {
    /// Size of the global parameter block (as stored in the variable).
    const GLOBAL_SIZE: usize;

    /// Size of the local update (tangent space dimension).
    const LOCAL_SIZE: usize;

    /// Apply a local update `delta` to a global parameter block `x`.
    fn plus(x: &[f64], delta: &[f64], out: &mut [f64]) -> Result<(), ParamError>;
}

fn check_sizes<P: Param>(x: &[f64], delta: &[f64], out: &[f64]) -> Result<(), ParamError> {
    if x.len() < P::GLOBAL_SIZE {
        return Err(ParamError::WrongGlobalSize {
            expected: P::GLOBAL_SIZE,
            got: x.len(),
        });
    }
    if delta.len() < P::LOCAL_SIZE {
        return Err(ParamError::WrongLocalSize {
            expected: P::LOCAL_SIZE,
            got: delta.len(),
        });
    }
    if out.len() < P::GLOBAL_SIZE {
        return Err(ParamError::WrongOutSize {
            expected: P::GLOBAL_SIZE,
            got: out.len(),
        });
    }
    Ok(())
}

/// Unit quaternion rotation parameterization.
#[derive(Debug, Clone, Copy)]
pub struct SO3Param;

impl Param for SO3Param {
    const GLOBAL_SIZE: usize = 4;
    const LOCAL_SIZE: usize = 3;

    #[inline]
    fn plus(x: &[f64], delta: &[f64], out: &mut [f64]) -> Result<(), ParamError> {
        check_sizes::<Self>(x, delta, out)?;
        let q = DQuat::from_xyzw(x[0], x[1], x[2], x[3]).normalize();
        let q_plus = (so3_exp(DVec3::new(delta[0], delta[1], delta[2])) * q).normalize();
        out[..Self::GLOBAL_SIZE].copy_from_slice(&q_plus.to_array());
        Ok(())
    }
}

/// Rigid transform parameterization: quaternion followed by translation.
#[derive(Debug, Clone, Copy)]
pub struct SE3Param;

impl Param for SE3Param {
    const GLOBAL_SIZE: usize = 7;
    const LOCAL_SIZE: usize = 6;

    #[inline]
    fn plus(x: &[f64], delta: &[f64], out: &mut [f64]) -> Result<(), ParamError> {
        check_sizes::<Self>(x, delta, out)?;
        SO3Param::plus(&x[..4], &delta[..3], &mut out[..4])?;
        for i in 0..3 {
            out[4 + i] = x[4 + i] + delta[3 + i];
        }
        Ok(())
    }
}
