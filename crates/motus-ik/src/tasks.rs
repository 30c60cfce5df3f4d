//! Kinematic task variants contributing rows to the per-cycle solve.
//!
//! The variant set is closed: orientation, gravity alignment, floor contact,
//! joint regularization and joint limits. Each task knows how to bind to a
//! model frame at initialization, accept a new setpoint each cycle, and emit
//! either weighted cost rows (low priority) or hard constraint rows (high
//! priority) over the generalized velocity `[v_base(3), w_base(3), dq(ndof)]`.

use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3};

use motus_core::types::NodeId;
use motus_model::Model;

/// Weighted cost rows `weight * ||a v - b||^2`.
#[derive(Debug, Clone)]
pub struct TaskRows {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
    pub weight: f64,
}

fn angular_rows(model: &Model, frame: usize) -> DMatrix<f64> {
    model.frame_jacobian(frame).rows(3, 3).into_owned()
}

fn linear_rows(model: &Model, frame: usize) -> DMatrix<f64> {
    model.frame_jacobian(frame).rows(0, 3).into_owned()
}

// ---------------------------------------------------------------------------
// OrientationTask
// ---------------------------------------------------------------------------

/// Tracks a measured segment orientation (SO3) and angular rate.
#[derive(Debug, Clone)]
pub struct OrientationTask {
    pub node: NodeId,
    pub frame: usize,
    /// Fixed sensor-to-link mounting rotation.
    pub sensor_rotation: UnitQuaternion<f64>,
    pub weight: f64,
    pub kp: f64,
    target_rotation: UnitQuaternion<f64>,
    target_velocity: Vector3<f64>,
}

impl OrientationTask {
    #[must_use]
    pub fn new(
        node: NodeId,
        frame: usize,
        sensor_rotation: UnitQuaternion<f64>,
        weight: f64,
        kp: f64,
    ) -> Self {
        Self {
            node,
            frame,
            sensor_rotation,
            weight,
            kp,
            target_rotation: UnitQuaternion::identity(),
            target_velocity: Vector3::zeros(),
        }
    }

    /// Push a new calibrated setpoint.
    pub fn set_target(&mut self, rotation: UnitQuaternion<f64>, angular_velocity: Vector3<f64>) {
        self.target_rotation = rotation;
        self.target_velocity = angular_velocity;
    }

    /// Velocity-level tracking rows: `J_ang v = w_des + kp * log(R_des R^-1)`.
    #[must_use]
    pub fn rows(&self, model: &Model) -> TaskRows {
        let current = model.world_transform(self.frame).rotation;
        let error = (self.target_rotation * current.inverse()).scaled_axis();
        TaskRows {
            a: angular_rows(model, self.frame),
            b: DVector::from_column_slice((self.target_velocity + self.kp * error).as_slice()),
            weight: self.weight,
        }
    }
}

// ---------------------------------------------------------------------------
// GravityAlignmentTask
// ---------------------------------------------------------------------------

/// Aligns a segment's vertical axis with the measured gravity direction.
///
/// Used on segments whose sensor yaw is unreliable. The weight is
/// state-dependent: it ramps linearly from `weight_min` at zero vertical
/// contact force to `weight_max` once the force reaches `force_on`,
/// trusting the alignment most during firm contact.
#[derive(Debug, Clone)]
pub struct GravityAlignmentTask {
    pub node: NodeId,
    pub frame: usize,
    pub sensor_rotation: UnitQuaternion<f64>,
    pub weight_min: f64,
    pub weight_max: f64,
    pub kp: f64,
    target_up: Vector3<f64>,
    vertical_force: f64,
    force_on: f64,
}

impl GravityAlignmentTask {
    #[must_use]
    pub fn new(
        node: NodeId,
        frame: usize,
        sensor_rotation: UnitQuaternion<f64>,
        weight_min: f64,
        weight_max: f64,
        kp: f64,
        force_on: f64,
    ) -> Self {
        Self {
            node,
            frame,
            sensor_rotation,
            weight_min,
            weight_max,
            kp,
            target_up: Vector3::z(),
            vertical_force: 0.0,
            force_on,
        }
    }

    /// Push a new calibrated setpoint: the measured link rotation maps the
    /// link's local z axis to the target "up" direction.
    pub fn set_target(&mut self, calibrated_rotation: UnitQuaternion<f64>) {
        self.target_up = calibrated_rotation * Vector3::z();
    }

    /// Feed the scheduling input (latest vertical contact force on the node).
    pub fn set_vertical_force(&mut self, force: f64) {
        self.vertical_force = force.max(0.0);
    }

    /// Current scheduled weight.
    #[must_use]
    pub fn weight(&self) -> f64 {
        let ratio = (self.vertical_force / self.force_on).clamp(0.0, 1.0);
        self.weight_min + ratio * (self.weight_max - self.weight_min)
    }

    /// Alignment rows: desired angular velocity `kp * (z_cur x z_des)`.
    #[must_use]
    pub fn rows(&self, model: &Model) -> TaskRows {
        let z_current = model.world_transform(self.frame).rotation * Vector3::z();
        let correction = self.kp * z_current.cross(&self.target_up);
        TaskRows {
            a: angular_rows(model, self.frame),
            b: DVector::from_column_slice(correction.as_slice()),
            weight: self.weight(),
        }
    }
}

// ---------------------------------------------------------------------------
// FloorContactTask
// ---------------------------------------------------------------------------

/// Pins a contact frame to its activation anchor while the measured
/// vertical force indicates floor contact.
///
/// Hysteresis: activates when the force rises to `force_on`, releases when
/// it drops below `force_off` (`force_off < force_on`). The anchor position
/// is captured at activation.
#[derive(Debug, Clone)]
pub struct FloorContactTask {
    pub node: NodeId,
    pub frame: usize,
    pub weight: f64,
    pub kp: f64,
    pub force_on: f64,
    pub force_off: f64,
    vertical_force: f64,
    active: bool,
    anchor: Vector3<f64>,
}

impl FloorContactTask {
    #[must_use]
    pub fn new(
        node: NodeId,
        frame: usize,
        weight: f64,
        kp: f64,
        force_on: f64,
        force_off: f64,
    ) -> Self {
        Self {
            node,
            frame,
            weight,
            kp,
            force_on,
            force_off,
            vertical_force: 0.0,
            active: false,
            anchor: Vector3::zeros(),
        }
    }

    /// Push the latest vertical force reading.
    pub fn set_vertical_force(&mut self, force: f64) {
        self.vertical_force = force;
    }

    /// Apply the hysteresis policy against the model's current state.
    pub fn refresh(&mut self, model: &Model) {
        if self.active {
            if self.vertical_force < self.force_off {
                self.active = false;
            }
        } else if self.vertical_force >= self.force_on {
            self.active = true;
            self.anchor = model.world_transform(self.frame).translation.vector;
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Position-holding rows while active; `None` in swing.
    #[must_use]
    pub fn rows(&self, model: &Model) -> Option<TaskRows> {
        if !self.active {
            return None;
        }
        let position = model.world_transform(self.frame).translation.vector;
        let correction = self.kp * (self.anchor - position);
        Some(TaskRows {
            a: linear_rows(model, self.frame),
            b: DVector::from_column_slice(correction.as_slice()),
            weight: self.weight,
        })
    }
}

// ---------------------------------------------------------------------------
// JointRegularizationTask
// ---------------------------------------------------------------------------

/// Low-weight pull of the joint velocities toward a reference posture.
#[derive(Debug, Clone)]
pub struct JointRegularizationTask {
    pub weight: f64,
    pub kp: f64,
    reference: DVector<f64>,
}

impl JointRegularizationTask {
    #[must_use]
    pub fn new(ndof: usize, weight: f64, kp: f64) -> Self {
        Self {
            weight,
            kp,
            reference: DVector::zeros(ndof),
        }
    }

    /// Replace the reference posture.
    pub fn set_reference(&mut self, reference: DVector<f64>) {
        self.reference = reference;
    }

    /// Rows over the joint-velocity block: `dq = kp (q_ref - q)`.
    #[must_use]
    pub fn rows(&self, model: &Model) -> TaskRows {
        let ndof = model.ndof();
        let mut a = DMatrix::zeros(ndof, 6 + ndof);
        for i in 0..ndof {
            a[(i, 6 + i)] = 1.0;
        }
        let b = self.kp * (&self.reference - model.joint_positions());
        TaskRows {
            a,
            b,
            weight: self.weight,
        }
    }
}

// ---------------------------------------------------------------------------
// JointConstraintTask
// ---------------------------------------------------------------------------

/// Hard joint-limit enforcement at velocity level.
///
/// For each joint: `lower <= q + dt dq <= upper`, emitted as inequality
/// rows `dt dq <= upper - q` and `-dt dq <= q - lower`.
#[derive(Debug, Clone)]
pub struct JointConstraintTask;

impl JointConstraintTask {
    /// Inequality rows `(a, b)` with `a v <= b`.
    #[must_use]
    pub fn rows(&self, model: &Model, dt: f64) -> (DMatrix<f64>, DVector<f64>) {
        let ndof = model.ndof();
        let mut a = DMatrix::zeros(2 * ndof, 6 + ndof);
        let mut b = DVector::zeros(2 * ndof);
        let q = model.joint_positions();
        for i in 0..ndof {
            let (lower, upper) = model.joint_limits(i);
            a[(2 * i, 6 + i)] = dt;
            b[2 * i] = upper - q[i];
            a[(2 * i + 1, 6 + i)] = -dt;
            b[2 * i + 1] = q[i] - lower;
        }
        (a, b)
    }
}
