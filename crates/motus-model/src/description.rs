//! On-disk model description.
//!
//! These types are the crate's canonical representation of a subject model,
//! independent of the kinematic layer. A description is a TOML document with
//! one table per link, joint and sensor; the kinematic [`Model`](crate::Model)
//! is built from it at load time.

use std::path::Path;

use serde::Deserialize;

use motus_core::error::ModelError;

const fn default_axis() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

fn default_joint_type() -> String {
    "revolute".into()
}

/// A 3D pose specified as position + roll-pitch-yaw.
#[derive(Debug, Clone, Deserialize)]
pub struct OriginDescription {
    /// Translation `[x, y, z]` in meters.
    #[serde(default)]
    pub xyz: [f64; 3],
    /// Rotation `[roll, pitch, yaw]` in radians.
    #[serde(default)]
    pub rpy: [f64; 3],
}

impl Default for OriginDescription {
    fn default() -> Self {
        Self {
            xyz: [0.0; 3],
            rpy: [0.0; 3],
        }
    }
}

/// One rigid body segment.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkDescription {
    pub name: String,
    /// Segment mass in kg.
    pub mass: f64,
    /// Center of mass offset in the link frame.
    #[serde(default)]
    pub com: [f64; 3],
}

/// One single-degree-of-freedom joint connecting two links.
#[derive(Debug, Clone, Deserialize)]
pub struct JointDescription {
    pub name: String,
    pub parent: String,
    pub child: String,
    /// Motion axis in the joint frame.
    #[serde(default = "default_axis")]
    pub axis: [f64; 3],
    /// Static transform from the parent link frame to the joint frame.
    #[serde(default)]
    pub origin: OriginDescription,
    /// `revolute` or `prismatic`.
    #[serde(rename = "type", default = "default_joint_type")]
    pub joint_type: String,
    /// Lower position limit (rad or m).
    pub lower_limit: Option<f64>,
    /// Upper position limit (rad or m).
    pub upper_limit: Option<f64>,
}

/// One declared sensor attached to a link frame.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorDescription {
    pub name: String,
    /// `net_ext_wrench`, `accelerometer` or `gyroscope`.
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub frame: String,
}

/// Complete subject model description.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescription {
    pub name: String,
    /// Floating-base link of the kinematic tree.
    pub base_link: String,
    /// World gravity vector; defaults to `[0, 0, -9.81]`.
    pub gravity: Option<[f64; 3]>,
    pub links: Vec<LinkDescription>,
    #[serde(default)]
    pub joints: Vec<JointDescription>,
    #[serde(default)]
    pub sensors: Vec<SensorDescription>,
}

impl ModelDescription {
    /// Parse a description from a TOML string.
    pub fn from_toml_str(text: &str) -> Result<Self, ModelError> {
        let description: Self = toml::from_str(text)?;
        Ok(description)
    }

    /// Load and parse a description file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_description() {
        let text = r#"
            name = "pendulum"
            base_link = "base"

            [[links]]
            name = "base"
            mass = 1.0

            [[links]]
            name = "arm"
            mass = 0.5
            com = [0.0, 0.0, -0.25]

            [[joints]]
            name = "shoulder"
            parent = "base"
            child = "arm"
            axis = [0.0, 1.0, 0.0]
            lower_limit = -1.57
            upper_limit = 1.57

            [[sensors]]
            name = "arm_imu"
            type = "gyroscope"
            frame = "arm"
        "#;
        let description = ModelDescription::from_toml_str(text).unwrap();
        assert_eq!(description.links.len(), 2);
        assert_eq!(description.joints[0].joint_type, "revolute");
        assert_eq!(description.joints[0].axis, [0.0, 1.0, 0.0]);
        assert_eq!(description.sensors[0].sensor_type, "gyroscope");
    }
}
