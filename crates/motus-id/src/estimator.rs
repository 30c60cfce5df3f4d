//! Two-stage constrained MAP dynamics estimation.
//!
//! Stage one recovers the external wrench on every source link from the
//! wrench sensors plus one synthetic consistency measurement (the body-weight
//! wrench in the base frame). Stage two injects those estimates into the
//! quasi-static joint-space equilibrium `tau + sum J^T w = g(q)` and recovers
//! the joint torques.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use motus_core::config::EstimatorConfig;
use motus_core::diag::Diag;
use motus_core::error::{ConfigError, IdError};
use motus_core::types::Wrench;
use motus_model::Model;

use crate::map::{MapSolver, MeasurementBlock};
use crate::sensors::{SensorOrdering, VariableLayout, WRENCH_SIZE};
use crate::sources::WrenchSource;

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// External-wrench and joint-torque estimator over a reduced-sensor model.
///
/// Owns its own `Model` instance, loaded from the `EXTERNAL_WRENCHES`
/// `modelPath` entry and state-synchronized from the kinematics model by
/// joint name via [`sync_state`](Self::sync_state). A failed cycle leaves
/// [`estimated_ext_wrenches`](Self::estimated_ext_wrenches) and
/// [`joint_torques`](Self::joint_torques) at their previous values; the
/// per-source scratch wrenches may be partially overwritten and are only
/// read again after the next successful `update_measurements`.
pub struct DynamicsEstimator {
    diag: Diag,
    model: Model,
    /// Reduced joint index -> kinematics-model joint index.
    joint_map: Vec<usize>,
    sources: Vec<WrenchSource>,
    ordering: SensorOrdering,
    /// Per-source measurement covariance, slot-aligned.
    measurement_cov: Vec<[f64; 6]>,
    cov_rcm: [f64; 6],
    default_cov: f64,
    human_mass: f64,
    wrench_solver: MapSolver,
    torque_solver: MapSolver,
    wrench_layout: VariableLayout,

    source_wrenches: Vec<Wrench>,
    have_measurements: bool,

    estimated_wrenches: Vec<Wrench>,
    joint_torques: DVector<f64>,
}

impl DynamicsEstimator {
    /// Build the estimator, loading the reduced-sensor model from the
    /// configured `modelPath`.
    pub fn initialize(config: &EstimatorConfig, kinematics_model: &Model) -> Result<Self, IdError> {
        let ew = config
            .external_wrenches
            .as_ref()
            .ok_or_else(|| ConfigError::MissingGroup("EXTERNAL_WRENCHES".into()))?;
        let reduced = Model::from_path(&ew.model_path)?;
        Self::with_reduced_model(config, kinematics_model, reduced)
    }

    /// Build the estimator around an already-loaded reduced model.
    pub fn with_reduced_model(
        config: &EstimatorConfig,
        kinematics_model: &Model,
        reduced: Model,
    ) -> Result<Self, IdError> {
        let diag = Diag::new("dynamics-estimator");
        let ew = config
            .external_wrenches
            .as_ref()
            .ok_or_else(|| ConfigError::MissingGroup("EXTERNAL_WRENCHES".into()))?;

        let removal = config
            .joint_torques
            .as_ref()
            .map(|jt| jt.sensor_removal.clone())
            .unwrap_or_default();
        let ordering = SensorOrdering::build(reduced.sensors(), &removal)?;

        let mut configured = Vec::with_capacity(ew.wrench_sources.len());
        for name in &ew.wrench_sources {
            let source_config = ew.wrench_source(name)?;
            configured.push(WrenchSource::from_config(name, &source_config, &reduced)?);
        }

        // One source per surviving wrench sensor, slot order.
        let mut sources = Vec::with_capacity(ordering.slots().len());
        let mut measurement_cov = Vec::with_capacity(ordering.slots().len());
        for slot in ordering.slots() {
            let matches: Vec<usize> = configured
                .iter()
                .enumerate()
                .filter(|(_, s)| reduced.frame_name(s.frame()) == slot.frame)
                .map(|(i, _)| i)
                .collect();
            match matches.as_slice() {
                [index] => sources.push(configured[*index].clone()),
                [] => {
                    return Err(IdError::IllPosed(format!(
                        "sensor '{}' on frame '{}' has no wrench source",
                        slot.name, slot.frame
                    )))
                }
                _ => {
                    return Err(IdError::IllPosed(format!(
                        "frame '{}' has more than one wrench source",
                        slot.frame
                    )))
                }
            }
            let cov = if ew.specific_elements.contains(&slot.name) {
                ew.element_covariance(&slot.name)?
            } else {
                [ew.default_cov_measurements; 6]
            };
            measurement_cov.push(cov);
        }
        if sources.len() != configured.len() {
            return Err(IdError::IllPosed(format!(
                "{} wrench sources configured but only {} sensors survive removal",
                configured.len(),
                sources.len()
            )));
        }

        let mut joint_map = Vec::with_capacity(reduced.ndof());
        for name in reduced.joint_names() {
            let index = kinematics_model.joint_index(name).ok_or_else(|| {
                motus_core::error::ModelError::UnknownJoint(name.to_string())
            })?;
            joint_map.push(index);
        }

        let wrench_layout = VariableLayout::external_wrenches(sources.len());
        let wrench_solver = MapSolver::new(
            wrench_layout.total(),
            ew.mu_dyn_variables,
            ew.cov_dyn_variables,
        )?;
        let torque_solver = MapSolver::new(
            VariableLayout::joint_torques(reduced.ndof()).total(),
            ew.mu_dyn_variables,
            ew.cov_dyn_variables,
        )?;

        diag.info(
            "initialize",
            &format!(
                "{} wrench sources over {} joints, mass {} kg",
                sources.len(),
                reduced.ndof(),
                ew.human_mass
            ),
        );

        let nsources = sources.len();
        let ndof = reduced.ndof();
        Ok(Self {
            diag,
            model: reduced,
            joint_map,
            sources,
            ordering,
            measurement_cov,
            cov_rcm: ew.cov_rcm_sensor,
            default_cov: ew.default_cov_measurements,
            human_mass: ew.human_mass,
            wrench_solver,
            torque_solver,
            wrench_layout,
            source_wrenches: vec![Wrench::zero(); nsources],
            have_measurements: false,
            estimated_wrenches: vec![Wrench::zero(); nsources],
            joint_torques: DVector::zeros(ndof),
        })
    }

    /// Copy the kinematics model's state into the reduced model, joint
    /// values keyed by name.
    pub fn sync_state(&mut self, kinematics_model: &Model) -> Result<(), IdError> {
        let mut q = DVector::zeros(self.model.ndof());
        let mut dq = DVector::zeros(self.model.ndof());
        for (reduced_index, &full_index) in self.joint_map.iter().enumerate() {
            q[reduced_index] = kinematics_model.joint_positions()[full_index];
            dq[reduced_index] = kinematics_model.joint_velocities()[full_index];
        }
        self.model.set_state(
            &kinematics_model.base_pose(),
            &q,
            &kinematics_model.base_linear_velocity(),
            &kinematics_model.base_angular_velocity(),
            &dq,
        )?;
        Ok(())
    }

    /// Resolve every wrench source against the raw readings, keyed by source
    /// name. Fixed sources require their reading; dummy sources ignore it.
    pub fn update_measurements(
        &mut self,
        raw: &HashMap<String, Wrench>,
    ) -> Result<(), IdError> {
        for (i, source) in self.sources.iter().enumerate() {
            let wrench = source
                .resolve(&self.model, raw.get(source.name()))
                .inspect_err(|e| {
                    self.diag
                        .error("update_measurements", &format!("{}: {e}", source.name()));
                })?;
            self.source_wrenches[i] = wrench;
        }
        self.have_measurements = true;
        Ok(())
    }

    /// Run both MAP stages and publish the posterior means.
    pub fn solve(&mut self) -> Result<(), IdError> {
        if !self.have_measurements {
            self.diag.error("solve", "no measurements supplied yet");
            return Err(IdError::MissingMeasurement("wrench sources".into()));
        }

        let wrenches = self.solve_external_wrenches().inspect_err(|e| {
            self.diag.error("solve", &format!("wrench stage: {e}"));
        })?;
        let torques = self.solve_joint_torques(&wrenches).inspect_err(|e| {
            self.diag.error("solve", &format!("torque stage: {e}"));
        })?;

        self.estimated_wrenches = wrenches;
        self.joint_torques = torques;
        Ok(())
    }

    /// Stage one: per-source identity measurements plus the body-weight
    /// consistency row, all over the stacked world-frame wrench unknowns.
    fn solve_external_wrenches(&self) -> Result<Vec<Wrench>, IdError> {
        let n = self.wrench_layout.total();
        let mut blocks = Vec::with_capacity(self.sources.len() + 1);

        for (i, wrench) in self.source_wrenches.iter().enumerate() {
            let mut jacobian = DMatrix::zeros(WRENCH_SIZE, n);
            let offset = self.wrench_layout.wrench_offset(i);
            for k in 0..WRENCH_SIZE {
                jacobian[(k, offset + k)] = 1.0;
            }
            blocks.push(MeasurementBlock::new(
                jacobian,
                DVector::from_column_slice(wrench.to_vector().as_slice()),
                DVector::from_column_slice(&self.measurement_cov[i]),
            ));
        }
        blocks.push(self.consistency_block(n));

        let posterior = self.wrench_solver.solve(&blocks)?;
        let mut estimates = Vec::with_capacity(self.sources.len());
        for i in 0..self.sources.len() {
            let offset = self.wrench_layout.wrench_offset(i);
            let wrench = Wrench::from_slice(posterior.as_slice().get(offset..offset + WRENCH_SIZE)
                .ok_or(IdError::SolveFailed)?)
                .ok_or(IdError::SolveFailed)?;
            estimates.push(wrench);
        }
        Ok(estimates)
    }

    /// Net body-weight wrench expressed in the base frame, equated to the
    /// sum of the unknown wrenches transported to the base origin.
    fn consistency_block(&self, n: usize) -> MeasurementBlock {
        let base = self.model.base_pose();
        let base_position = base.translation.vector;
        let world_to_base = base.rotation.inverse().to_rotation_matrix().into_inner();

        let mut jacobian = DMatrix::zeros(WRENCH_SIZE, n);
        for (i, source) in self.sources.iter().enumerate() {
            let offset = self.wrench_layout.wrench_offset(i);
            let arm = self.model.world_transform(source.frame()).translation.vector
                - base_position;
            jacobian
                .view_mut((0, offset), (3, 3))
                .copy_from(&world_to_base);
            jacobian
                .view_mut((3, offset), (3, 3))
                .copy_from(&(world_to_base * skew(&arm)));
            jacobian
                .view_mut((3, offset + 3), (3, 3))
                .copy_from(&world_to_base);
        }

        // Static support: the external wrenches must carry the body weight.
        let weight_force = -self.human_mass * self.model.gravity();
        let weight_torque = (self.model.com_position() - base_position).cross(&weight_force);
        let value = Wrench::new(world_to_base * weight_force, world_to_base * weight_torque);

        MeasurementBlock::new(
            jacobian,
            DVector::from_column_slice(value.to_vector().as_slice()),
            DVector::from_column_slice(&self.cov_rcm),
        )
    }

    /// Stage two: quasi-static equilibrium `tau = g(q) - sum J^T w` with the
    /// stage-one wrenches injected as known measurements.
    fn solve_joint_torques(&self, wrenches: &[Wrench]) -> Result<DVector<f64>, IdError> {
        let ndof = self.model.ndof();
        let mut value = self.model.gravity_torques();
        for (source, wrench) in self.sources.iter().zip(wrenches) {
            let jacobian = self.model.frame_jacobian(source.frame());
            let joint_block = jacobian.columns(6, ndof);
            value -= joint_block.transpose()
                * DVector::from_column_slice(wrench.to_vector().as_slice());
        }

        let block = MeasurementBlock::new(
            DMatrix::identity(ndof, ndof),
            value,
            DVector::from_element(ndof, self.default_cov),
        );
        self.torque_solver.solve(&[block])
    }

    // -- accessors -----------------------------------------------------------

    /// Latest estimated external wrenches, slot order, world frame.
    #[must_use]
    pub fn estimated_ext_wrenches(&self) -> &[Wrench] {
        &self.estimated_wrenches
    }

    /// Latest estimated joint torques of the reduced model.
    #[must_use]
    pub fn joint_torques(&self) -> &DVector<f64> {
        &self.joint_torques
    }

    /// Source names, slot order, matching
    /// [`estimated_ext_wrenches`](Self::estimated_ext_wrenches).
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(WrenchSource::name).collect()
    }

    /// The estimator's own reduced-sensor model.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Measurement ordering over the surviving sensors.
    #[must_use]
    pub fn sensor_ordering(&self) -> &SensorOrdering {
        &self.ordering
    }
}
