//! Per-node calibration rotations correcting unknown sensor mounting.
//!
//! Every configured node starts at identity. A calibration composes into all
//! subsequent orientation/gravity setpoints for that node until it is
//! cleared or recomputed; it is never applied retroactively.

use std::collections::BTreeMap;

use nalgebra::{UnitQuaternion, Vector3};

use motus_core::error::IkError;
use motus_core::types::NodeId;

/// Calibration rotations keyed by node id.
#[derive(Debug, Clone)]
pub struct CalibrationMap {
    map: BTreeMap<NodeId, UnitQuaternion<f64>>,
}

impl CalibrationMap {
    /// Identity calibration for each configured node.
    #[must_use]
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            map: nodes
                .into_iter()
                .map(|n| (n, UnitQuaternion::identity()))
                .collect(),
        }
    }

    /// Current calibration rotation of a node.
    pub fn get(&self, node: NodeId) -> Result<UnitQuaternion<f64>, IkError> {
        self.map
            .get(&node)
            .copied()
            .ok_or(IkError::UnknownNode(node))
    }

    /// Apply the node's calibration to a measured link rotation.
    pub fn apply(
        &self,
        node: NodeId,
        measured: &UnitQuaternion<f64>,
    ) -> Result<UnitQuaternion<f64>, IkError> {
        Ok(self.get(node)? * measured)
    }

    /// Zero the node's yaw about the world vertical axis.
    ///
    /// `measured` is the current sensor-to-world link rotation. With the ZYX
    /// factorization `R = Rz(yaw) Ry(pitch) Rx(roll)`, storing `Rz(-yaw)`
    /// leaves pitch and roll exactly as measured.
    pub fn calibrate_world_yaw(
        &mut self,
        node: NodeId,
        measured: &UnitQuaternion<f64>,
    ) -> Result<(), IkError> {
        let entry = self.map.get_mut(&node).ok_or(IkError::UnknownNode(node))?;
        let (_, _, yaw) = measured.euler_angles();
        *entry = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -yaw);
        Ok(())
    }

    /// Align the node's measured orientation to a reference frame's current
    /// orientation in the model, for all three axes.
    pub fn calibrate_all_with_world(
        &mut self,
        node: NodeId,
        measured: &UnitQuaternion<f64>,
        reference: &UnitQuaternion<f64>,
    ) -> Result<(), IkError> {
        let entry = self.map.get_mut(&node).ok_or(IkError::UnknownNode(node))?;
        *entry = reference * measured.inverse();
        Ok(())
    }

    /// Reset every node's calibration to identity.
    pub fn clear(&mut self) {
        for value in self.map.values_mut() {
            *value = UnitQuaternion::identity();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reading(roll: f64, pitch: f64, yaw: f64) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(roll, pitch, yaw)
    }

    #[test]
    fn world_yaw_calibration_zeroes_yaw_keeps_pitch_roll() {
        let mut cal = CalibrationMap::new([3]);
        let measured = reading(0.2, -0.4, 1.1);
        cal.calibrate_world_yaw(3, &measured).unwrap();

        let calibrated = cal.apply(3, &measured).unwrap();
        let (roll, pitch, yaw) = calibrated.euler_angles();
        assert_relative_eq!(yaw, 0.0, epsilon = 1e-10);
        assert_relative_eq!(roll, 0.2, epsilon = 1e-10);
        assert_relative_eq!(pitch, -0.4, epsilon = 1e-10);
    }

    #[test]
    fn all_with_world_matches_reference() {
        let mut cal = CalibrationMap::new([1]);
        let measured = reading(0.3, 0.1, -0.7);
        let reference = reading(0.0, 0.5, 0.2);
        cal.calibrate_all_with_world(1, &measured, &reference)
            .unwrap();

        let calibrated = cal.apply(1, &measured).unwrap();
        assert_relative_eq!(
            calibrated.angle_to(&reference),
            0.0,
            epsilon = 1e-10
        );
    }

    #[test]
    fn clear_and_recalibrate_is_idempotent() {
        let mut cal = CalibrationMap::new([7]);
        let measured = reading(0.1, 0.2, 0.9);

        cal.calibrate_world_yaw(7, &measured).unwrap();
        let first = cal.get(7).unwrap();

        cal.clear();
        assert_relative_eq!(cal.get(7).unwrap().angle(), 0.0, epsilon = 1e-12);
        cal.clear();

        cal.calibrate_world_yaw(7, &measured).unwrap();
        let second = cal.get(7).unwrap();
        assert_relative_eq!(first.angle_to(&second), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unknown_node_is_rejected() {
        let mut cal = CalibrationMap::new([1]);
        let measured = reading(0.0, 0.0, 0.4);
        assert!(matches!(
            cal.calibrate_world_yaw(9, &measured),
            Err(IkError::UnknownNode(9))
        ));
        assert!(matches!(cal.get(9), Err(IkError::UnknownNode(9))));
    }
}
