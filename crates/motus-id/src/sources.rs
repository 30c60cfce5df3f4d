//! External-wrench contributors.
//!
//! A source is either a physical sensor rigidly offset from its output frame
//! (`Fixed`) or a synthetic constant contact (`Dummy`). Each cycle a source
//! resolves to one world-frame wrench acting at its output frame's origin.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion};

use motus_core::config::WrenchSourceConfig;
use motus_core::error::{ConfigError, IdError};
use motus_core::types::Wrench;
use motus_model::Model;

/// One configured external-wrench contributor.
#[derive(Debug, Clone)]
pub enum WrenchSource {
    /// Force/torque sensor mounted at a fixed offset from the output frame.
    Fixed {
        name: String,
        frame: usize,
        /// Sensor frame expressed in the output frame.
        offset: Isometry3<f64>,
    },
    /// Constant wrench given in the output frame, following its orientation.
    Dummy {
        name: String,
        frame: usize,
        values: Wrench,
    },
}

impl WrenchSource {
    /// Build a source from its validated configuration group.
    pub fn from_config(
        name: &str,
        config: &WrenchSourceConfig,
        model: &Model,
    ) -> Result<Self, IdError> {
        let frame = model.frame_index(&config.output_frame)?;
        match config.source_type.as_str() {
            "fixed" => {
                let position = config.position.ok_or_else(|| ConfigError::MissingParameter {
                    group: name.to_string(),
                    key: "position".into(),
                })?;
                let orientation =
                    config
                        .orientation
                        .ok_or_else(|| ConfigError::MissingParameter {
                            group: name.to_string(),
                            key: "orientation".into(),
                        })?;
                let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(
                    &Matrix3::from_row_slice(&orientation),
                ));
                Ok(Self::Fixed {
                    name: name.to_string(),
                    frame,
                    offset: Isometry3::from_parts(
                        Translation3::new(position[0], position[1], position[2]),
                        rotation,
                    ),
                })
            }
            "dummy" => {
                let values = config.values.ok_or_else(|| ConfigError::MissingParameter {
                    group: name.to_string(),
                    key: "values".into(),
                })?;
                let values = Wrench::from_slice(&values).ok_or_else(|| {
                    ConfigError::InvalidValue {
                        key: format!("{name}.values"),
                        message: "expected six components".into(),
                    }
                })?;
                Ok(Self::Dummy {
                    name: name.to_string(),
                    frame,
                    values,
                })
            }
            other => Err(ConfigError::UnknownSourceType(other.to_string()).into()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Fixed { name, .. } | Self::Dummy { name, .. } => name,
        }
    }

    /// Output frame index in the model.
    #[must_use]
    pub const fn frame(&self) -> usize {
        match self {
            Self::Fixed { frame, .. } | Self::Dummy { frame, .. } => *frame,
        }
    }

    /// World-frame wrench at the output frame origin under the model's
    /// current state.
    ///
    /// A `Fixed` source needs the raw reading named after it; absence is a
    /// failure. A `Dummy` source ignores `raw` and tracks the frame's
    /// current orientation.
    pub fn resolve(&self, model: &Model, raw: Option<&Wrench>) -> Result<Wrench, IdError> {
        match self {
            Self::Fixed {
                name,
                frame,
                offset,
            } => {
                let measured = raw.ok_or_else(|| IdError::MissingMeasurement(name.clone()))?;
                let world_from_sensor = model.world_transform(*frame) * offset;
                Ok(measured.transform(&world_from_sensor))
            }
            Self::Dummy { frame, values, .. } => {
                Ok(values.rotate(&model.world_transform(*frame).rotation))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    const MODEL: &str = r#"
        name = "stub"
        base_link = "foot"
        [[links]]
        name = "foot"
        mass = 1.0
    "#;

    fn fixed_config() -> WrenchSourceConfig {
        WrenchSourceConfig {
            source_type: "fixed".into(),
            output_frame: "foot".into(),
            position: Some([0.0, 0.0, -0.05]),
            orientation: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
            values: None,
        }
    }

    #[test]
    fn fixed_source_applies_offset_moment_arm() {
        let model = Model::from_toml_str(MODEL).unwrap();
        let source = WrenchSource::from_config("Shoe", &fixed_config(), &model).unwrap();

        let raw = Wrench::new(Vector3::new(10.0, 0.0, 0.0), Vector3::zeros());
        let resolved = source.resolve(&model, Some(&raw)).unwrap();
        // offset (0,0,-0.05) x force (10,0,0) = (0, -0.5, 0)
        assert_relative_eq!(resolved.force.x, 10.0, epsilon = 1e-12);
        assert_relative_eq!(resolved.torque.y, -0.5, epsilon = 1e-12);
    }

    #[test]
    fn fixed_source_without_reading_fails() {
        let model = Model::from_toml_str(MODEL).unwrap();
        let source = WrenchSource::from_config("Shoe", &fixed_config(), &model).unwrap();
        assert!(matches!(
            source.resolve(&model, None),
            Err(IdError::MissingMeasurement(name)) if name == "Shoe"
        ));
    }

    #[test]
    fn dummy_source_tracks_frame_orientation() {
        let model = Model::from_toml_str(MODEL).unwrap();
        let config = WrenchSourceConfig {
            source_type: "dummy".into(),
            output_frame: "foot".into(),
            position: None,
            orientation: None,
            values: Some([0.0, 0.0, 5.0, 0.0, 0.0, 0.0]),
        };
        let source = WrenchSource::from_config("Virtual", &config, &model).unwrap();
        let resolved = source.resolve(&model, None).unwrap();
        assert_relative_eq!(resolved.force.z, 5.0, epsilon = 1e-12);
        assert_relative_eq!(resolved.torque.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unknown_output_frame_fails() {
        let model = Model::from_toml_str(MODEL).unwrap();
        let mut config = fixed_config();
        config.output_frame = "hand".into();
        assert!(WrenchSource::from_config("Shoe", &config, &model).is_err());
    }
}
