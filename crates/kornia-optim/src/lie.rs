use glam::{DQuat, DVec3};

const SMALL_ANGLE_EPSILON: f64 = 1e-8;

/// Exponential map from the rotation vector (axis * angle) to a unit quaternion.
pub fn so3_exp(v: DVec3) -> DQuat {
    let theta_sq = v.dot(v);
    let theta = theta_sq.sqrt();
    let theta_half = 0.5 * theta;

    let (w, b) = if theta < SMALL_ANGLE_EPSILON {
        // taylor expansion of cos(x/2) and sin(x/2)/x around 0
        (1.0 - theta_sq / 8.0, 0.5 - theta_sq / 48.0)
    } else {
        (theta_half.cos(), theta_half.sin() / theta)
    };

    let xyz = b * v;
    DQuat::from_xyzw(xyz.x, xyz.y, xyz.z, w).normalize()
}

/// Logarithmic map from a unit quaternion to its rotation vector.
///
/// The returned angle lies in `[0, pi]`.
pub fn so3_log(q: DQuat) -> DVec3 {
    let mut w = q.w;
    let mut vec = DVec3::new(q.x, q.y, q.z);

    if w < 0.0 {
        w = -w;
        vec = -vec;
    }

    let theta = vec.length();

    if theta > SMALL_ANGLE_EPSILON {
        let half_theta = theta.atan2(w);
        vec * (2.0 * half_theta / theta)
    } else {
        vec * (2.0 / w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exp_log_roundtrip() {
        let v = DVec3::new(0.3, -0.2, 0.1);
        let w = so3_log(so3_exp(v));
        assert_relative_eq!(w.x, v.x, epsilon = 1e-12);
        assert_relative_eq!(w.y, v.y, epsilon = 1e-12);
        assert_relative_eq!(w.z, v.z, epsilon = 1e-12);
    }

    #[test]
    fn test_exp_matches_glam_axis_angle() {
        let axis = DVec3::new(1.0, 2.0, -0.5).normalize();
        let angle = 0.7;
        let q = so3_exp(axis * angle);
        let expected = DQuat::from_axis_angle(axis, angle);
        assert!(q.dot(expected).abs() > 1.0 - 1e-12);
    }

    #[test]
    fn test_small_angle() {
        let v = DVec3::new(1e-10, 0.0, 0.0);
        let q = so3_exp(v);
        assert_relative_eq!(q.w, 1.0, epsilon = 1e-15);
        assert_relative_eq!(so3_log(q).x, 1e-10, epsilon = 1e-18);
    }
}
