//! Hierarchical configuration document for the estimation stack.
//!
//! The document is TOML: a top-level `tasks` list naming task groups, an
//! `IK` group, optional `JOINT_TORQUES` and `EXTERNAL_WRENCHES` groups, and
//! one table per task or wrench source. Group names are free-form, so the
//! dynamic tables are captured with `#[serde(flatten)]` and re-deserialized
//! per group on demand.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_weight() -> f64 {
    10.0
}
const fn default_kp() -> f64 {
    1.0
}
const fn default_force_on() -> f64 {
    30.0
}
const fn default_force_off() -> f64 {
    10.0
}

// ---------------------------------------------------------------------------
// EstimatorConfig
// ---------------------------------------------------------------------------

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorConfig {
    /// Ordered list of task-group names to instantiate.
    pub tasks: Vec<String>,

    /// Kinematics solver group.
    #[serde(rename = "IK")]
    pub ik: IkGroupConfig,

    /// Joint-torque estimator group.
    #[serde(rename = "JOINT_TORQUES", default)]
    pub joint_torques: Option<JointTorquesConfig>,

    /// External-wrench estimator group.
    #[serde(rename = "EXTERNAL_WRENCHES", default)]
    pub external_wrenches: Option<ExternalWrenchesConfig>,

    /// Remaining named groups (task tables).
    #[serde(flatten)]
    groups: HashMap<String, toml::Value>,
}

impl EstimatorConfig {
    /// Parse a configuration document from a TOML string.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve one declared task group.
    pub fn task_group(&self, name: &str) -> Result<TaskConfig, ConfigError> {
        let value = self
            .groups
            .get(name)
            .ok_or_else(|| ConfigError::MissingGroup(name.to_string()))?;
        let task: TaskConfig = value.clone().try_into()?;
        task.kind()?;
        Ok(task)
    }

    /// Validate the document. Every declared task group must exist and
    /// carry a recognized type; fail fast on the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in &self.tasks {
            let task = self.task_group(name)?;
            match task.kind()? {
                TaskKind::Orientation | TaskKind::Gravity | TaskKind::FloorContact => {
                    if task.node_number.is_none() {
                        return Err(ConfigError::MissingParameter {
                            group: name.clone(),
                            key: "node_number".into(),
                        });
                    }
                    if task.frame_name.is_none() {
                        return Err(ConfigError::MissingParameter {
                            group: name.clone(),
                            key: "frame_name".into(),
                        });
                    }
                }
                TaskKind::JointRegularization | TaskKind::JointConstraint => {}
            }
            if task.force_off >= task.force_on {
                return Err(ConfigError::InvalidValue {
                    key: format!("{name}.force_off"),
                    message: format!(
                        "hysteresis requires force_off < force_on, got {} >= {}",
                        task.force_off, task.force_on
                    ),
                });
            }
        }
        if let Some(ew) = &self.external_wrenches {
            ew.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// IK group
// ---------------------------------------------------------------------------

/// Options of the `IK` group.
#[derive(Debug, Clone, Deserialize)]
pub struct IkGroupConfig {
    /// Name bound to the stacked floating-base + joint velocity unknown.
    pub robot_velocity_variable_name: String,
}

// ---------------------------------------------------------------------------
// Task groups
// ---------------------------------------------------------------------------

/// Recognized task variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Orientation,
    Gravity,
    FloorContact,
    JointRegularization,
    JointConstraint,
}

/// One task group table.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Task type tag, e.g. `SO3Task` or `GravityTask`.
    #[serde(rename = "type")]
    pub task_type: String,

    /// Node identifier the task is bound to.
    pub node_number: Option<i32>,

    /// Model frame the task acts on.
    pub frame_name: Option<String>,

    /// Fixed sensor-to-link rotation, row-major 3x3. Defaults to identity
    /// (with a warning) when absent.
    pub rotation_matrix: Option<[f64; 9]>,

    /// Task weight in the low-priority cost.
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Proportional gain of the task-space error feedback.
    #[serde(default = "default_kp")]
    pub kp: f64,

    /// Gravity-task weight at zero vertical force.
    pub weight_min: Option<f64>,

    /// Gravity-task weight at or above `force_on` vertical force.
    pub weight_max: Option<f64>,

    /// Floor contact activates when the vertical force reaches this value (N).
    #[serde(default = "default_force_on")]
    pub force_on: f64,

    /// Floor contact releases when the vertical force drops below this value (N).
    #[serde(default = "default_force_off")]
    pub force_off: f64,
}

impl TaskConfig {
    /// Map the configured type tag onto a [`TaskKind`].
    pub fn kind(&self) -> Result<TaskKind, ConfigError> {
        match self.task_type.as_str() {
            "SO3Task" => Ok(TaskKind::Orientation),
            "GravityTask" => Ok(TaskKind::Gravity),
            "FloorContactTask" => Ok(TaskKind::FloorContact),
            "JointRegularizationTask" => Ok(TaskKind::JointRegularization),
            "JointConstraintTask" => Ok(TaskKind::JointConstraint),
            other => Err(ConfigError::UnknownTaskType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// JOINT_TORQUES group
// ---------------------------------------------------------------------------

/// Options of the `JOINT_TORQUES` group.
#[derive(Debug, Clone, Deserialize)]
pub struct JointTorquesConfig {
    /// Sensors to drop from the model's sensor list before building the
    /// estimator: sensor-type name -> sensor name, or `*` for all of type.
    #[serde(rename = "SENSOR_REMOVAL", default)]
    pub sensor_removal: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// EXTERNAL_WRENCHES group
// ---------------------------------------------------------------------------

/// Options of the `EXTERNAL_WRENCHES` group.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalWrenchesConfig {
    /// Named wrench-source sub-groups.
    #[serde(rename = "wrenchSources")]
    pub wrench_sources: Vec<String>,

    /// Secondary (reduced-sensor) model used for wrench estimation. Required.
    #[serde(rename = "modelPath")]
    pub model_path: String,

    /// Total body mass (kg), used in the consistency measurement.
    #[serde(rename = "humanMass")]
    pub human_mass: f64,

    /// Regularization prior expected value over unknown dynamic variables.
    pub mu_dyn_variables: f64,

    /// Regularization prior covariance (diagonal value) over unknowns.
    pub cov_dyn_variables: f64,

    /// Sensor names with a specific measurement covariance override.
    #[serde(rename = "specificElements", default)]
    pub specific_elements: Vec<String>,

    /// Covariance of the consistency (RCM) measurement, one value per axis.
    #[serde(rename = "cov_measurements_RCM_SENSOR")]
    pub cov_rcm_sensor: [f64; 6],

    /// Default per-axis measurement noise covariance.
    pub default_cov_measurements: f64,

    /// Wrench-source tables and per-element covariance arrays.
    #[serde(flatten)]
    groups: HashMap<String, toml::Value>,
}

impl ExternalWrenchesConfig {
    /// Resolve one named wrench-source sub-group.
    pub fn wrench_source(&self, name: &str) -> Result<WrenchSourceConfig, ConfigError> {
        let value = self
            .groups
            .get(name)
            .ok_or_else(|| ConfigError::MissingGroup(name.to_string()))?;
        let source: WrenchSourceConfig = value.clone().try_into()?;
        source.validate(name)?;
        Ok(source)
    }

    /// Resolve the covariance override for one named sensor element.
    pub fn element_covariance(&self, name: &str) -> Result<[f64; 6], ConfigError> {
        let value = self
            .groups
            .get(name)
            .ok_or_else(|| ConfigError::MissingParameter {
                group: "EXTERNAL_WRENCHES".into(),
                key: name.to_string(),
            })?;
        let cov: [f64; 6] = value.clone().try_into()?;
        Ok(cov)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.human_mass <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "EXTERNAL_WRENCHES.humanMass".into(),
                message: format!("must be > 0, got {}", self.human_mass),
            });
        }
        for check in [
            ("cov_dyn_variables", self.cov_dyn_variables),
            ("default_cov_measurements", self.default_cov_measurements),
        ] {
            if check.1 <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("EXTERNAL_WRENCHES.{}", check.0),
                    message: format!("covariance must be > 0, got {}", check.1),
                });
            }
        }
        if self.cov_rcm_sensor.iter().any(|&c| c <= 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "EXTERNAL_WRENCHES.cov_measurements_RCM_SENSOR".into(),
                message: "all entries must be > 0".into(),
            });
        }
        for name in &self.wrench_sources {
            self.wrench_source(name)?;
        }
        for name in &self.specific_elements {
            self.element_covariance(name)?;
        }
        Ok(())
    }
}

/// One wrench-source sub-group.
#[derive(Debug, Clone, Deserialize)]
pub struct WrenchSourceConfig {
    /// `fixed` or `dummy`.
    #[serde(rename = "type")]
    pub source_type: String,

    /// Model frame the source is bound to.
    #[serde(rename = "outputFrame")]
    pub output_frame: String,

    /// Fixed source: sensor position in the output frame.
    pub position: Option<[f64; 3]>,

    /// Fixed source: sensor orientation in the output frame, row-major 3x3.
    pub orientation: Option<[f64; 9]>,

    /// Dummy source: constant wrench value.
    pub values: Option<[f64; 6]>,
}

impl WrenchSourceConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self.source_type.as_str() {
            "fixed" => {
                if self.position.is_none() {
                    return Err(ConfigError::MissingParameter {
                        group: name.to_string(),
                        key: "position".into(),
                    });
                }
                if self.orientation.is_none() {
                    return Err(ConfigError::MissingParameter {
                        group: name.to_string(),
                        key: "orientation".into(),
                    });
                }
                Ok(())
            }
            "dummy" => {
                if self.values.is_none() {
                    return Err(ConfigError::MissingParameter {
                        group: name.to_string(),
                        key: "values".into(),
                    });
                }
                Ok(())
            }
            other => Err(ConfigError::UnknownSourceType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        tasks = ["PELVIS_TASK", "LEFT_FOOT_CONTACT"]

        [IK]
        robot_velocity_variable_name = "robot_velocity"

        [PELVIS_TASK]
        type = "SO3Task"
        node_number = 1
        frame_name = "pelvis"
        weight = 10.0

        [LEFT_FOOT_CONTACT]
        type = "FloorContactTask"
        node_number = 5
        frame_name = "left_foot"
        force_on = 40.0
        force_off = 15.0

        [JOINT_TORQUES.SENSOR_REMOVAL]
        NET_EXT_WRENCH_SENSOR = "*"

        [EXTERNAL_WRENCHES]
        wrenchSources = ["LeftShoe"]
        modelPath = "subject.toml"
        humanMass = 72.0
        mu_dyn_variables = 0.0
        cov_dyn_variables = 100.0
        specificElements = ["left_foot"]
        left_foot = [1e-3, 1e-3, 1e-3, 1e-2, 1e-2, 1e-2]
        cov_measurements_RCM_SENSOR = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
        default_cov_measurements = 1e-4

        [EXTERNAL_WRENCHES.LeftShoe]
        type = "fixed"
        outputFrame = "left_foot"
        position = [0.0, 0.0, -0.05]
        orientation = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
    "#;

    #[test]
    fn parses_full_document() {
        let config = EstimatorConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.ik.robot_velocity_variable_name, "robot_velocity");

        let pelvis = config.task_group("PELVIS_TASK").unwrap();
        assert_eq!(pelvis.kind().unwrap(), TaskKind::Orientation);
        assert_eq!(pelvis.node_number, Some(1));
        assert!(pelvis.rotation_matrix.is_none());

        let contact = config.task_group("LEFT_FOOT_CONTACT").unwrap();
        assert_eq!(contact.kind().unwrap(), TaskKind::FloorContact);
        assert_eq!(contact.force_on, 40.0);

        let jt = config.joint_torques.as_ref().unwrap();
        assert_eq!(
            jt.sensor_removal.get("NET_EXT_WRENCH_SENSOR").unwrap(),
            "*"
        );

        let ew = config.external_wrenches.as_ref().unwrap();
        assert_eq!(ew.human_mass, 72.0);
        let shoe = ew.wrench_source("LeftShoe").unwrap();
        assert_eq!(shoe.output_frame, "left_foot");
        let cov = ew.element_covariance("left_foot").unwrap();
        assert_eq!(cov[3], 1e-2);
    }

    #[test]
    fn missing_task_group_fails() {
        let text = r#"
            tasks = ["MISSING"]
            [IK]
            robot_velocity_variable_name = "v"
        "#;
        let err = EstimatorConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::MissingGroup(name) if name == "MISSING"));
    }

    #[test]
    fn unknown_task_type_fails() {
        let text = r#"
            tasks = ["T"]
            [IK]
            robot_velocity_variable_name = "v"
            [T]
            type = "SE3Task"
            node_number = 1
            frame_name = "pelvis"
        "#;
        let err = EstimatorConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTaskType(t) if t == "SE3Task"));
    }

    #[test]
    fn bad_hysteresis_fails() {
        let text = r#"
            tasks = ["C"]
            [IK]
            robot_velocity_variable_name = "v"
            [C]
            type = "FloorContactTask"
            node_number = 2
            frame_name = "foot"
            force_on = 10.0
            force_off = 20.0
        "#;
        let err = EstimatorConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn fixed_source_without_geometry_fails() {
        let text = r#"
            tasks = []
            [IK]
            robot_velocity_variable_name = "v"
            [EXTERNAL_WRENCHES]
            wrenchSources = ["S"]
            modelPath = "m.toml"
            humanMass = 60.0
            mu_dyn_variables = 0.0
            cov_dyn_variables = 10.0
            cov_measurements_RCM_SENSOR = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0]
            default_cov_measurements = 1e-4
            [EXTERNAL_WRENCHES.S]
            type = "fixed"
            outputFrame = "foot"
        "#;
        let err = EstimatorConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter { key, .. } if key == "position"));
    }
}
