//! Floating-base kinematic tree built from a [`ModelDescription`].
//!
//! The model is the single mutable resource shared by the kinematics and
//! dynamics estimators: it holds the current joint/base state, answers
//! frame-transform and Jacobian queries against that state, and exposes the
//! declared sensor list. Callers mutate it only through [`Model::set_state`].

use nalgebra::{DMatrix, DVector, Isometry3, Matrix3, Translation3, Unit, UnitQuaternion, Vector3};

use motus_core::error::ModelError;

use crate::description::ModelDescription;

const DEFAULT_GRAVITY: [f64; 3] = [0.0, 0.0, -9.81];

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Kinds of sensors a model can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    /// Net external wrench acting on a link (6 components).
    NetExternalWrench,
    Accelerometer,
    Gyroscope,
}

impl SensorType {
    /// Key used by the `SENSOR_REMOVAL` configuration group.
    #[must_use]
    pub const fn config_key(self) -> &'static str {
        match self {
            Self::NetExternalWrench => "NET_EXT_WRENCH_SENSOR",
            Self::Accelerometer => "ACCELEROMETER_SENSOR",
            Self::Gyroscope => "GYROSCOPE_SENSOR",
        }
    }

    fn parse(text: &str) -> Result<Self, ModelError> {
        match text {
            "net_ext_wrench" => Ok(Self::NetExternalWrench),
            "accelerometer" => Ok(Self::Accelerometer),
            "gyroscope" => Ok(Self::Gyroscope),
            other => Err(ModelError::Malformed(format!(
                "unknown sensor type '{other}'"
            ))),
        }
    }
}

/// One sensor entry of the model's sensor list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub name: String,
    pub sensor_type: SensorType,
    pub frame: String,
}

// ---------------------------------------------------------------------------
// Tree storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Link {
    name: String,
    mass: f64,
    com: Vector3<f64>,
}

#[derive(Debug, Clone)]
struct Joint {
    name: String,
    parent: usize,
    child: usize,
    origin: Isometry3<f64>,
    axis: Unit<Vector3<f64>>,
    prismatic: bool,
    lower: f64,
    upper: f64,
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Articulated floating-base model with cached forward kinematics.
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    links: Vec<Link>,
    joints: Vec<Joint>,
    base: usize,
    /// Joint evaluation order (parents before children).
    traversal: Vec<usize>,
    /// Parent joint of each link (`None` for the base).
    parent_joint: Vec<Option<usize>>,
    gravity: Vector3<f64>,
    sensors: Vec<SensorInfo>,

    // current state
    base_pose: Isometry3<f64>,
    base_linear_velocity: Vector3<f64>,
    base_angular_velocity: Vector3<f64>,
    q: DVector<f64>,
    dq: DVector<f64>,

    // forward kinematics cache, refreshed by set_state
    link_poses: Vec<Isometry3<f64>>,
    joint_frames: Vec<Isometry3<f64>>,
}

impl Model {
    /// Build a model from a parsed description.
    pub fn from_description(description: &ModelDescription) -> Result<Self, ModelError> {
        let links: Vec<Link> = description
            .links
            .iter()
            .map(|l| Link {
                name: l.name.clone(),
                mass: l.mass,
                com: Vector3::from(l.com),
            })
            .collect();

        let link_index = |name: &str| -> Result<usize, ModelError> {
            links
                .iter()
                .position(|l| l.name == name)
                .ok_or_else(|| ModelError::UnknownFrame(name.to_string()))
        };

        let base = link_index(&description.base_link)?;

        let mut joints = Vec::with_capacity(description.joints.len());
        let mut parent_joint: Vec<Option<usize>> = vec![None; links.len()];
        for (i, j) in description.joints.iter().enumerate() {
            let parent = link_index(&j.parent)?;
            let child = link_index(&j.child)?;
            if child == base {
                return Err(ModelError::Malformed(format!(
                    "joint '{}' drives the base link",
                    j.name
                )));
            }
            if parent_joint[child].is_some() {
                return Err(ModelError::Malformed(format!(
                    "link '{}' has more than one parent joint",
                    j.child
                )));
            }
            parent_joint[child] = Some(i);

            let prismatic = match j.joint_type.as_str() {
                "revolute" => false,
                "prismatic" => true,
                other => {
                    return Err(ModelError::Malformed(format!(
                        "joint '{}': unknown type '{other}'",
                        j.name
                    )))
                }
            };
            let axis = Vector3::from(j.axis);
            if axis.norm() < 1e-9 {
                return Err(ModelError::Malformed(format!(
                    "joint '{}': zero axis",
                    j.name
                )));
            }
            joints.push(Joint {
                name: j.name.clone(),
                parent,
                child,
                origin: Isometry3::from_parts(
                    Translation3::new(j.origin.xyz[0], j.origin.xyz[1], j.origin.xyz[2]),
                    UnitQuaternion::from_euler_angles(
                        j.origin.rpy[0],
                        j.origin.rpy[1],
                        j.origin.rpy[2],
                    ),
                ),
                axis: Unit::new_normalize(axis),
                prismatic,
                lower: j.lower_limit.unwrap_or(-std::f64::consts::PI),
                upper: j.upper_limit.unwrap_or(std::f64::consts::PI),
            });
        }

        // Every non-base link must be reachable through exactly one joint.
        for (i, link) in links.iter().enumerate() {
            if i != base && parent_joint[i].is_none() {
                return Err(ModelError::Malformed(format!(
                    "link '{}' is not connected to the tree",
                    link.name
                )));
            }
        }

        // Topological joint order: a joint is ready once its parent link is.
        let mut ready = vec![false; links.len()];
        ready[base] = true;
        let mut traversal = Vec::with_capacity(joints.len());
        let mut pending: Vec<usize> = (0..joints.len()).collect();
        while !pending.is_empty() {
            let before = traversal.len();
            pending.retain(|&ji| {
                if ready[joints[ji].parent] {
                    ready[joints[ji].child] = true;
                    traversal.push(ji);
                    false
                } else {
                    true
                }
            });
            if traversal.len() == before {
                return Err(ModelError::Malformed(
                    "kinematic tree contains a cycle".into(),
                ));
            }
        }

        let mut sensors = Vec::with_capacity(description.sensors.len());
        for s in &description.sensors {
            link_index(&s.frame)?;
            sensors.push(SensorInfo {
                name: s.name.clone(),
                sensor_type: SensorType::parse(&s.sensor_type)?,
                frame: s.frame.clone(),
            });
        }

        let ndof = joints.len();
        let nlinks = links.len();
        let mut model = Self {
            name: description.name.clone(),
            links,
            joints,
            base,
            traversal,
            parent_joint,
            gravity: Vector3::from(description.gravity.unwrap_or(DEFAULT_GRAVITY)),
            sensors,
            base_pose: Isometry3::identity(),
            base_linear_velocity: Vector3::zeros(),
            base_angular_velocity: Vector3::zeros(),
            q: DVector::zeros(ndof),
            dq: DVector::zeros(ndof),
            link_poses: vec![Isometry3::identity(); nlinks],
            joint_frames: vec![Isometry3::identity(); ndof],
        };
        model.recompute();
        Ok(model)
    }

    /// Parse a TOML description and build the model.
    pub fn from_toml_str(text: &str) -> Result<Self, ModelError> {
        Self::from_description(&ModelDescription::from_toml_str(text)?)
    }

    /// Load a description file and build the model.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, ModelError> {
        Self::from_description(&ModelDescription::from_path(path)?)
    }

    // -- state ---------------------------------------------------------------

    /// Push a new joint/base state and refresh the kinematics cache.
    ///
    /// Vector lengths are checked against the degree-of-freedom count at
    /// this boundary; on mismatch the previous state is kept.
    pub fn set_state(
        &mut self,
        base_pose: &Isometry3<f64>,
        joint_positions: &DVector<f64>,
        base_linear_velocity: &Vector3<f64>,
        base_angular_velocity: &Vector3<f64>,
        joint_velocities: &DVector<f64>,
    ) -> Result<(), ModelError> {
        let ndof = self.ndof();
        if joint_positions.len() != ndof {
            return Err(ModelError::DofMismatch {
                expected: ndof,
                got: joint_positions.len(),
            });
        }
        if joint_velocities.len() != ndof {
            return Err(ModelError::DofMismatch {
                expected: ndof,
                got: joint_velocities.len(),
            });
        }
        self.base_pose = *base_pose;
        self.base_linear_velocity = *base_linear_velocity;
        self.base_angular_velocity = *base_angular_velocity;
        self.q.copy_from(joint_positions);
        self.dq.copy_from(joint_velocities);
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        self.link_poses[self.base] = self.base_pose;
        for &ji in &self.traversal {
            let joint = &self.joints[ji];
            let frame = self.link_poses[joint.parent] * joint.origin;
            let motion = if joint.prismatic {
                Isometry3::from_parts(
                    Translation3::from(joint.axis.into_inner() * self.q[ji]),
                    UnitQuaternion::identity(),
                )
            } else {
                Isometry3::from_parts(
                    Translation3::identity(),
                    UnitQuaternion::from_axis_angle(&joint.axis, self.q[ji]),
                )
            };
            self.joint_frames[ji] = frame;
            self.link_poses[joint.child] = frame * motion;
        }
    }

    // -- queries ---------------------------------------------------------------

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Degree-of-freedom count (one per joint; the floating base adds six
    /// generalized-velocity components on top of this).
    #[must_use]
    pub fn ndof(&self) -> usize {
        self.joints.len()
    }

    /// Name of the floating-base link.
    #[must_use]
    pub fn base_frame(&self) -> &str {
        &self.links[self.base].name
    }

    #[must_use]
    pub fn joint_names(&self) -> Vec<&str> {
        self.joints.iter().map(|j| j.name.as_str()).collect()
    }

    #[must_use]
    pub fn joint_index(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == name)
    }

    /// Position limits of one joint, `(lower, upper)`.
    #[must_use]
    pub fn joint_limits(&self, joint: usize) -> (f64, f64) {
        (self.joints[joint].lower, self.joints[joint].upper)
    }

    /// Resolve a frame (link) name to its index.
    pub fn frame_index(&self, name: &str) -> Result<usize, ModelError> {
        self.links
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| ModelError::UnknownFrame(name.to_string()))
    }

    #[must_use]
    pub fn frame_name(&self, frame: usize) -> &str {
        &self.links[frame].name
    }

    /// World transform of a frame under the current state.
    #[must_use]
    pub fn world_transform(&self, frame: usize) -> Isometry3<f64> {
        self.link_poses[frame]
    }

    /// Floating-base Jacobian of a frame: 6 x (6 + ndof), linear rows first.
    ///
    /// Columns 0..3 are base linear velocity, 3..6 base angular velocity,
    /// then one column per joint. Revolute columns are
    /// `axis x (p_frame - p_joint)` / `axis`; prismatic columns are
    /// `axis` / `0`.
    #[must_use]
    pub fn frame_jacobian(&self, frame: usize) -> DMatrix<f64> {
        let ndof = self.ndof();
        let mut jac = DMatrix::zeros(6, 6 + ndof);

        let p_frame = self.link_poses[frame].translation.vector;
        let p_base = self.base_pose.translation.vector;

        // Base contribution: v_f = v_b + w_b x (p_f - p_b).
        let r = p_frame - p_base;
        for i in 0..3 {
            jac[(i, i)] = 1.0;
            jac[(3 + i, 3 + i)] = 1.0;
        }
        let minus_skew = -skew(&r);
        for row in 0..3 {
            for col in 0..3 {
                jac[(row, 3 + col)] = minus_skew[(row, col)];
            }
        }

        // Joint contributions along the ancestor chain.
        let mut link = frame;
        while let Some(ji) = self.parent_joint[link] {
            let joint = &self.joints[ji];
            let axis_w = self.joint_frames[ji].rotation * joint.axis.into_inner();
            let col = 6 + ji;
            if joint.prismatic {
                for i in 0..3 {
                    jac[(i, col)] = axis_w[i];
                }
            } else {
                let anchor = self.joint_frames[ji].translation.vector;
                let lin = axis_w.cross(&(p_frame - anchor));
                for i in 0..3 {
                    jac[(i, col)] = lin[i];
                    jac[(3 + i, col)] = axis_w[i];
                }
            }
            link = joint.parent;
        }
        jac
    }

    /// Total model mass.
    #[must_use]
    pub fn total_mass(&self) -> f64 {
        self.links.iter().map(|l| l.mass).sum()
    }

    /// World gravity vector.
    #[must_use]
    pub fn gravity(&self) -> Vector3<f64> {
        self.gravity
    }

    /// World-frame center of mass under the current state.
    #[must_use]
    pub fn com_position(&self) -> Vector3<f64> {
        let mut weighted = Vector3::zeros();
        let mut mass = 0.0;
        for (i, link) in self.links.iter().enumerate() {
            weighted += (self.link_poses[i] * nalgebra::Point3::from(link.com)).coords * link.mass;
            mass += link.mass;
        }
        if mass > 0.0 {
            weighted / mass
        } else {
            weighted
        }
    }

    /// Generalized gravity torques over the joint block.
    ///
    /// Quasi-static convention: with no joint accelerations the equations of
    /// motion reduce to `tau + sum_L J_L^T w_L = g(q)` with
    /// `g(q) = -sum_L J_com_L^T (m_L g)`.
    #[must_use]
    pub fn gravity_torques(&self) -> DVector<f64> {
        let mut torques = DVector::zeros(self.ndof());
        for (li, link) in self.links.iter().enumerate() {
            if link.mass == 0.0 {
                continue;
            }
            let com_w = (self.link_poses[li] * nalgebra::Point3::from(link.com)).coords;
            let weight = self.gravity * link.mass;
            let mut cursor = li;
            while let Some(ji) = self.parent_joint[cursor] {
                let joint = &self.joints[ji];
                let axis_w = self.joint_frames[ji].rotation * joint.axis.into_inner();
                let lin = if joint.prismatic {
                    axis_w
                } else {
                    let anchor = self.joint_frames[ji].translation.vector;
                    axis_w.cross(&(com_w - anchor))
                };
                torques[ji] -= lin.dot(&weight);
                cursor = joint.parent;
            }
        }
        torques
    }

    #[must_use]
    pub fn base_pose(&self) -> Isometry3<f64> {
        self.base_pose
    }

    #[must_use]
    pub fn base_linear_velocity(&self) -> Vector3<f64> {
        self.base_linear_velocity
    }

    #[must_use]
    pub fn base_angular_velocity(&self) -> Vector3<f64> {
        self.base_angular_velocity
    }

    #[must_use]
    pub fn joint_positions(&self) -> &DVector<f64> {
        &self.q
    }

    #[must_use]
    pub fn joint_velocities(&self) -> &DVector<f64> {
        &self.dq
    }

    /// Declared sensor list. Cloned by estimators so removal never touches
    /// the shared model.
    #[must_use]
    pub fn sensors(&self) -> &[SensorInfo] {
        &self.sensors
    }
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}
