//! Shared value types for the estimation stack.

use nalgebra::{Isometry3, UnitQuaternion, Vector3, Vector6};

/// Stable integer identifier of a configured body-segment node.
pub type NodeId = i32;

// ---------------------------------------------------------------------------
// NodeReading
// ---------------------------------------------------------------------------

/// One orientation-sensor reading for a node: sensor-to-world rotation plus
/// angular rate expressed in the world frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeReading {
    pub orientation: UnitQuaternion<f64>,
    pub angular_velocity: Vector3<f64>,
}

impl NodeReading {
    #[must_use]
    pub fn new(orientation: UnitQuaternion<f64>, angular_velocity: Vector3<f64>) -> Self {
        Self {
            orientation,
            angular_velocity,
        }
    }
}

impl Default for NodeReading {
    fn default() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wrench
// ---------------------------------------------------------------------------

/// A combined force + torque expressed in some frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wrench {
    /// Force component (N).
    pub force: Vector3<f64>,
    /// Torque component (Nm).
    pub torque: Vector3<f64>,
}

impl Wrench {
    #[must_use]
    pub const fn new(force: Vector3<f64>, torque: Vector3<f64>) -> Self {
        Self { force, torque }
    }

    /// Zero wrench.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
        }
    }

    /// Build from a `[fx, fy, fz, tx, ty, tz]` slice.
    ///
    /// Returns `None` when the slice is not exactly six elements.
    #[must_use]
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        if values.len() != 6 {
            return None;
        }
        Some(Self {
            force: Vector3::new(values[0], values[1], values[2]),
            torque: Vector3::new(values[3], values[4], values[5]),
        })
    }

    /// Stack into a 6-vector, force first.
    #[must_use]
    pub fn to_vector(self) -> Vector6<f64> {
        Vector6::new(
            self.force.x,
            self.force.y,
            self.force.z,
            self.torque.x,
            self.torque.y,
            self.torque.z,
        )
    }

    /// Express this wrench in a new frame.
    ///
    /// `transform` maps points of the current frame into the target frame;
    /// the torque picks up the moment of the transported force:
    /// `f' = R f`, `τ' = R τ + p × R f`.
    #[must_use]
    pub fn transform(self, transform: &Isometry3<f64>) -> Self {
        let force = transform.rotation * self.force;
        let torque = transform.rotation * self.torque + transform.translation.vector.cross(&force);
        Self { force, torque }
    }

    /// Rotate the wrench without a moment-arm term.
    #[must_use]
    pub fn rotate(self, rotation: &UnitQuaternion<f64>) -> Self {
        Self {
            force: rotation * self.force,
            torque: rotation * self.torque,
        }
    }

    /// All six components are finite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.force.iter().chain(self.torque.iter()).all(|v| v.is_finite())
    }
}

impl std::ops::Add for Wrench {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            force: self.force + rhs.force,
            torque: self.torque + rhs.torque,
        }
    }
}

impl std::ops::Mul<f64> for Wrench {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self {
            force: self.force * rhs,
            torque: self.torque * rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Translation3;

    #[test]
    fn wrench_slice_roundtrip() {
        let w = Wrench::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let v = w.to_vector();
        for i in 0..6 {
            assert_relative_eq!(v[i], (i + 1) as f64);
        }
        assert!(Wrench::from_slice(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn transform_adds_moment_arm() {
        // Pure upward force, transported through a 1 m x-offset: picks up a
        // torque about y of -1 * fz? p × f = (1,0,0) × (0,0,10) = (0, -10, 0).
        let w = Wrench::new(Vector3::new(0.0, 0.0, 10.0), Vector3::zeros());
        let t = Isometry3::from_parts(
            Translation3::new(1.0, 0.0, 0.0),
            UnitQuaternion::identity(),
        );
        let out = w.transform(&t);
        assert_relative_eq!(out.force.z, 10.0, epsilon = 1e-12);
        assert_relative_eq!(out.torque.y, -10.0, epsilon = 1e-12);
        assert_relative_eq!(out.torque.x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rotate_has_no_moment_arm() {
        let w = Wrench::new(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0));
        let r = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
        let out = w.rotate(&r);
        assert_relative_eq!(out.force.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(out.torque.x, -1.0, epsilon = 1e-12);
    }
}
