//! Cyclic whole-body kinematics solver.
//!
//! One instance owns the task registry, the calibration map and the QP
//! composition. Each cycle the caller pushes sensor setpoints through the
//! `update_*` methods, then calls [`KinematicsSolver::advance`] to solve for
//! the generalized velocity and integrate it into the model state.

use std::collections::BTreeMap;

use nalgebra::{
    DVector, Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3,
};

use motus_core::config::{EstimatorConfig, TaskKind};
use motus_core::diag::Diag;
use motus_core::error::{ConfigError, IkError};
use motus_core::time::Timestep;
use motus_core::types::NodeId;
use motus_model::Model;

use crate::calibration::CalibrationMap;
use crate::qp::QpBuilder;
use crate::tasks::{
    FloorContactTask, GravityAlignmentTask, JointConstraintTask, JointRegularizationTask,
    OrientationTask,
};

fn rotation_from_row_major(values: &[f64; 9]) -> UnitQuaternion<f64> {
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&Matrix3::from_row_slice(
        values,
    )))
}

/// Priority-weighted multi-task kinematics solver over a floating-base model.
///
/// Built once from a configuration document, then driven cyclically:
/// `update_*` setpoints, [`advance`](Self::advance), accessors. Accessors
/// never trigger a solve; a failed cycle leaves every output at its previous
/// value.
pub struct KinematicsSolver {
    diag: Diag,
    dt: Timestep,
    ndof: usize,
    velocity_variable: String,

    orientation_tasks: BTreeMap<NodeId, OrientationTask>,
    gravity_tasks: BTreeMap<NodeId, GravityAlignmentTask>,
    contact_tasks: BTreeMap<NodeId, FloorContactTask>,
    regularization: Option<JointRegularizationTask>,
    joint_constraints: Option<JointConstraintTask>,
    calibration: CalibrationMap,

    // solved state, mirrored out of the model after each successful cycle
    base_pose: Isometry3<f64>,
    base_linear_velocity: Vector3<f64>,
    base_angular_velocity: Vector3<f64>,
    joint_positions: DVector<f64>,
    joint_velocities: DVector<f64>,
}

impl KinematicsSolver {
    /// Build the solver from a configuration document, binding every
    /// declared task to the model.
    ///
    /// Fails fast: missing parameters, unknown frames, a task type declared
    /// twice for the same node, or a second singleton task all reject the
    /// whole configuration.
    pub fn initialize(config: &EstimatorConfig, model: &Model) -> Result<Self, IkError> {
        let diag = Diag::new("kinematics-solver");
        let ndof = model.ndof();

        let mut orientation_tasks = BTreeMap::new();
        let mut gravity_tasks = BTreeMap::new();
        let mut contact_tasks = BTreeMap::new();
        let mut regularization = None;
        let mut joint_constraints = None;

        for name in &config.tasks {
            let task = config.task_group(name)?;
            let kind = task.kind()?;
            match kind {
                TaskKind::Orientation | TaskKind::Gravity | TaskKind::FloorContact => {
                    // validate() guarantees these are present
                    let node = task.node_number.ok_or_else(|| {
                        ConfigError::MissingParameter {
                            group: name.clone(),
                            key: "node_number".into(),
                        }
                    })?;
                    let frame_name = task.frame_name.as_deref().ok_or_else(|| {
                        ConfigError::MissingParameter {
                            group: name.clone(),
                            key: "frame_name".into(),
                        }
                    })?;
                    let frame = model.frame_index(frame_name)?;
                    let sensor_rotation = match &task.rotation_matrix {
                        Some(values) => rotation_from_row_major(values),
                        None => {
                            diag.warn(
                                "initialize",
                                &format!("{name}: rotation_matrix missing, using identity"),
                            );
                            UnitQuaternion::identity()
                        }
                    };
                    match kind {
                        TaskKind::Orientation => {
                            if orientation_tasks
                                .insert(
                                    node,
                                    OrientationTask::new(
                                        node,
                                        frame,
                                        sensor_rotation,
                                        task.weight,
                                        task.kp,
                                    ),
                                )
                                .is_some()
                            {
                                diag.error(
                                    "initialize",
                                    &format!("{name}: node {node} already has an orientation task"),
                                );
                                return Err(IkError::DuplicateNode(node));
                            }
                        }
                        TaskKind::Gravity => {
                            let weight_min = task.weight_min.unwrap_or(task.weight);
                            let weight_max = task.weight_max.unwrap_or(task.weight);
                            if gravity_tasks
                                .insert(
                                    node,
                                    GravityAlignmentTask::new(
                                        node,
                                        frame,
                                        sensor_rotation,
                                        weight_min,
                                        weight_max,
                                        task.kp,
                                        task.force_on,
                                    ),
                                )
                                .is_some()
                            {
                                diag.error(
                                    "initialize",
                                    &format!("{name}: node {node} already has a gravity task"),
                                );
                                return Err(IkError::DuplicateNode(node));
                            }
                        }
                        _ => {
                            if contact_tasks
                                .insert(
                                    node,
                                    FloorContactTask::new(
                                        node,
                                        frame,
                                        task.weight,
                                        task.kp,
                                        task.force_on,
                                        task.force_off,
                                    ),
                                )
                                .is_some()
                            {
                                diag.error(
                                    "initialize",
                                    &format!("{name}: node {node} already has a contact task"),
                                );
                                return Err(IkError::DuplicateNode(node));
                            }
                        }
                    }
                }
                TaskKind::JointRegularization => {
                    if regularization
                        .replace(JointRegularizationTask::new(ndof, task.weight, task.kp))
                        .is_some()
                    {
                        return Err(ConfigError::InvalidValue {
                            key: name.clone(),
                            message: "joint regularization declared more than once".into(),
                        }
                        .into());
                    }
                }
                TaskKind::JointConstraint => {
                    if joint_constraints.replace(JointConstraintTask).is_some() {
                        return Err(ConfigError::InvalidValue {
                            key: name.clone(),
                            message: "joint constraints declared more than once".into(),
                        }
                        .into());
                    }
                }
            }
        }

        let nodes: Vec<NodeId> = orientation_tasks
            .keys()
            .chain(gravity_tasks.keys())
            .copied()
            .collect();

        let velocity_variable = config.ik.robot_velocity_variable_name.clone();
        diag.info(
            "initialize",
            &format!(
                "{} orientation, {} gravity, {} contact tasks over '{velocity_variable}' \
                 ({} components, {ndof} joints)",
                orientation_tasks.len(),
                gravity_tasks.len(),
                contact_tasks.len(),
                6 + ndof
            ),
        );

        Ok(Self {
            diag,
            dt: Timestep::default(),
            ndof,
            velocity_variable,
            orientation_tasks,
            gravity_tasks,
            contact_tasks,
            regularization,
            joint_constraints,
            calibration: CalibrationMap::new(nodes),
            base_pose: model.base_pose(),
            base_linear_velocity: Vector3::zeros(),
            base_angular_velocity: Vector3::zeros(),
            joint_positions: model.joint_positions().clone(),
            joint_velocities: DVector::zeros(ndof),
        })
    }

    /// Integration timestep used by [`advance`](Self::advance).
    #[must_use]
    pub const fn dt(&self) -> Timestep {
        self.dt
    }

    pub fn set_dt(&mut self, dt: Timestep) {
        self.dt = dt;
    }

    /// Joint degree-of-freedom count (excluding the floating base).
    #[must_use]
    pub const fn ndof(&self) -> usize {
        self.ndof
    }

    /// Configured name of the generalized-velocity unknown, as it appears in
    /// diagnostics.
    #[must_use]
    pub fn velocity_variable_name(&self) -> &str {
        &self.velocity_variable
    }

    // -- calibration ---------------------------------------------------------

    /// Zero the world yaw of every node present in `readings`.
    pub fn calibrate_world_yaw(
        &mut self,
        readings: &BTreeMap<NodeId, UnitQuaternion<f64>>,
    ) -> Result<(), IkError> {
        for (&node, measured) in readings {
            let mounted = measured * self.sensor_rotation(node)?;
            self.calibration.calibrate_world_yaw(node, &mounted)?;
        }
        Ok(())
    }

    /// Align every node in `readings` to its bound frame's current model
    /// orientation, for all three axes.
    pub fn calibrate_all_with_world(
        &mut self,
        readings: &BTreeMap<NodeId, UnitQuaternion<f64>>,
        model: &Model,
    ) -> Result<(), IkError> {
        for (&node, measured) in readings {
            let frame = self.node_frame(node)?;
            let reference = model.world_transform(frame).rotation;
            let mounted = measured * self.sensor_rotation(node)?;
            self.calibration
                .calibrate_all_with_world(node, &mounted, &reference)?;
        }
        Ok(())
    }

    /// Reset every calibration rotation to identity.
    pub fn clear_calibration(&mut self) {
        self.calibration.clear();
    }

    fn sensor_rotation(&self, node: NodeId) -> Result<UnitQuaternion<f64>, IkError> {
        if let Some(task) = self.orientation_tasks.get(&node) {
            return Ok(task.sensor_rotation);
        }
        if let Some(task) = self.gravity_tasks.get(&node) {
            return Ok(task.sensor_rotation);
        }
        Err(IkError::UnknownNode(node))
    }

    fn node_frame(&self, node: NodeId) -> Result<usize, IkError> {
        if let Some(task) = self.orientation_tasks.get(&node) {
            return Ok(task.frame);
        }
        if let Some(task) = self.gravity_tasks.get(&node) {
            return Ok(task.frame);
        }
        Err(IkError::UnknownNode(node))
    }

    // -- per-cycle setpoints -------------------------------------------------

    /// Push a measured orientation and angular rate to the node's
    /// orientation task.
    pub fn update_orientation_task(
        &mut self,
        node: NodeId,
        orientation: &UnitQuaternion<f64>,
        angular_velocity: &Vector3<f64>,
    ) -> Result<(), IkError> {
        let task = self
            .orientation_tasks
            .get(&node)
            .ok_or(IkError::UnknownNode(node))?;
        let mounted = orientation * task.sensor_rotation;
        let calibrated = self.calibration.apply(node, &mounted)?;
        let rate = self.calibration.get(node)? * angular_velocity;
        let task = self
            .orientation_tasks
            .get_mut(&node)
            .ok_or(IkError::UnknownNode(node))?;
        task.set_target(calibrated, rate);
        Ok(())
    }

    /// Push a measured orientation to the node's gravity-alignment task.
    pub fn update_gravity_task(
        &mut self,
        node: NodeId,
        orientation: &UnitQuaternion<f64>,
    ) -> Result<(), IkError> {
        let task = self
            .gravity_tasks
            .get(&node)
            .ok_or(IkError::UnknownNode(node))?;
        let mounted = orientation * task.sensor_rotation;
        let calibrated = self.calibration.apply(node, &mounted)?;
        let task = self
            .gravity_tasks
            .get_mut(&node)
            .ok_or(IkError::UnknownNode(node))?;
        task.set_target(calibrated);
        Ok(())
    }

    /// Push a measured vertical contact force to the node's floor-contact
    /// task. The same reading drives the weight schedule of a gravity task
    /// bound to the same node, when one exists.
    pub fn update_floor_contact_task(
        &mut self,
        node: NodeId,
        vertical_force: f64,
    ) -> Result<(), IkError> {
        let task = self
            .contact_tasks
            .get_mut(&node)
            .ok_or(IkError::UnknownNode(node))?;
        task.set_vertical_force(vertical_force);
        if let Some(gravity) = self.gravity_tasks.get_mut(&node) {
            gravity.set_vertical_force(vertical_force);
        }
        Ok(())
    }

    /// Push a reference posture to the joint-regularization task.
    pub fn update_joint_regularization_task(
        &mut self,
        reference: &DVector<f64>,
    ) -> Result<(), IkError> {
        if reference.len() != self.ndof {
            return Err(IkError::BufferSize {
                expected: self.ndof,
                got: reference.len(),
            });
        }
        let task = self
            .regularization
            .as_mut()
            .ok_or(IkError::TaskNotConfigured("JointRegularizationTask"))?;
        task.set_reference(reference.clone());
        Ok(())
    }

    /// Confirm the joint-constraint task is active; its bounds come from the
    /// model each cycle and need no setpoint.
    pub fn update_joint_constraints_task(&self) -> Result<(), IkError> {
        if self.joint_constraints.is_none() {
            return Err(IkError::TaskNotConfigured("JointConstraintTask"));
        }
        Ok(())
    }

    // -- solve ---------------------------------------------------------------

    /// Run one estimation cycle: solve the task QP for the generalized
    /// velocity, integrate one explicit-Euler step, push the state into the
    /// model and mirror it into the accessors.
    ///
    /// On any failure the model and every accessor keep their previous
    /// values.
    pub fn advance(&mut self, model: &mut Model) -> Result<(), IkError> {
        let dt = self.dt.as_secs();
        let nvars = 6 + self.ndof;

        for task in self.contact_tasks.values_mut() {
            task.refresh(model);
        }

        let mut qp = QpBuilder::new(nvars);
        for task in self.orientation_tasks.values() {
            let rows = task.rows(model);
            qp.add_cost(rows.a, rows.b, rows.weight);
        }
        for task in self.gravity_tasks.values() {
            let rows = task.rows(model);
            qp.add_cost(rows.a, rows.b, rows.weight);
        }
        for task in self.contact_tasks.values() {
            if let Some(rows) = task.rows(model) {
                qp.add_cost(rows.a, rows.b, rows.weight);
            }
        }
        if let Some(task) = &self.regularization {
            let rows = task.rows(model);
            qp.add_cost(rows.a, rows.b, rows.weight);
        }
        if let Some(task) = &self.joint_constraints {
            let (a, b) = task.rows(model, dt);
            qp.add_inequality(a, b);
        }

        let velocity = qp.solve().inspect_err(|e| {
            self.diag.error("advance", &format!("QP solve failed: {e}"));
        })?;

        let linear = velocity.fixed_rows::<3>(0).into_owned();
        let angular = velocity.fixed_rows::<3>(3).into_owned();
        let dq = velocity.rows(6, self.ndof).into_owned();

        // Explicit Euler with this cycle's velocity; the rotation integrates
        // on the manifold via the exponential of the world-frame twist.
        let base_pose = model.base_pose();
        let position = base_pose.translation.vector + dt * linear;
        let rotation =
            UnitQuaternion::from_scaled_axis(dt * angular) * base_pose.rotation;
        let q = model.joint_positions() + dt * &dq;
        let pose = Isometry3::from_parts(Translation3::from(position), rotation);

        model.set_state(&pose, &q, &linear, &angular, &dq)?;

        self.base_pose = pose;
        self.base_linear_velocity = linear;
        self.base_angular_velocity = angular;
        self.joint_positions = q;
        self.joint_velocities = dq;
        Ok(())
    }

    // -- accessors -----------------------------------------------------------

    /// Copy the solved joint positions into `buf`.
    pub fn joint_positions_into(&self, buf: &mut [f64]) -> Result<(), IkError> {
        if buf.len() != self.ndof {
            return Err(IkError::BufferSize {
                expected: self.ndof,
                got: buf.len(),
            });
        }
        buf.copy_from_slice(self.joint_positions.as_slice());
        Ok(())
    }

    /// Copy the solved joint velocities into `buf`.
    pub fn joint_velocities_into(&self, buf: &mut [f64]) -> Result<(), IkError> {
        if buf.len() != self.ndof {
            return Err(IkError::BufferSize {
                expected: self.ndof,
                got: buf.len(),
            });
        }
        buf.copy_from_slice(self.joint_velocities.as_slice());
        Ok(())
    }

    #[must_use]
    pub fn base_position(&self) -> Vector3<f64> {
        self.base_pose.translation.vector
    }

    #[must_use]
    pub fn base_orientation(&self) -> UnitQuaternion<f64> {
        self.base_pose.rotation
    }

    #[must_use]
    pub const fn base_linear_velocity(&self) -> Vector3<f64> {
        self.base_linear_velocity
    }

    #[must_use]
    pub const fn base_angular_velocity(&self) -> Vector3<f64> {
        self.base_angular_velocity
    }

    /// Nodes with a configured orientation task.
    #[must_use]
    pub fn orientation_nodes(&self) -> Vec<NodeId> {
        self.orientation_tasks.keys().copied().collect()
    }

    /// Nodes with a configured gravity-alignment task.
    #[must_use]
    pub fn gravity_nodes(&self) -> Vec<NodeId> {
        self.gravity_tasks.keys().copied().collect()
    }

    /// Nodes with a configured floor-contact task.
    #[must_use]
    pub fn contact_nodes(&self) -> Vec<NodeId> {
        self.contact_tasks.keys().copied().collect()
    }

    /// Whether the node's floor-contact task is currently holding its anchor.
    pub fn contact_active(&self, node: NodeId) -> Result<bool, IkError> {
        self.contact_tasks
            .get(&node)
            .map(FloorContactTask::is_active)
            .ok_or(IkError::UnknownNode(node))
    }
}
