//! Measurement ordering and unknown-variable layout.
//!
//! Both are derived once at initialization from the model's declared sensor
//! list (after configured removals) and never resized afterwards: every
//! measurement and unknown has a fixed offset in its stacked vector.

use std::collections::HashMap;

use motus_core::error::{ConfigError, IdError};
use motus_model::{SensorInfo, SensorType};

/// Width of one wrench measurement or unknown block.
pub const WRENCH_SIZE: usize = 6;

/// One surviving wrench sensor with its slot in the measurement vector.
#[derive(Debug, Clone)]
pub struct SensorSlot {
    pub name: String,
    pub frame: String,
    pub offset: usize,
}

/// Fixed ordering of the measurement vector, one six-wide slot per
/// surviving net-external-wrench sensor.
#[derive(Debug, Clone)]
pub struct SensorOrdering {
    slots: Vec<SensorSlot>,
}

impl SensorOrdering {
    /// Apply the `SENSOR_REMOVAL` table to the model's sensor list and fix
    /// the slot layout.
    ///
    /// Removal entries map a sensor-type key to an exact sensor name or `*`
    /// for every sensor of that type. The quasi-static estimator only
    /// consumes wrench sensors, so any accelerometer or gyroscope left after
    /// removal makes the configuration ill-posed.
    pub fn build(
        sensors: &[SensorInfo],
        removal: &HashMap<String, String>,
    ) -> Result<Self, IdError> {
        let mut survivors: Vec<SensorInfo> = sensors.to_vec();

        for (type_key, target) in removal {
            let sensor_type = [
                SensorType::NetExternalWrench,
                SensorType::Accelerometer,
                SensorType::Gyroscope,
            ]
            .into_iter()
            .find(|t| t.config_key() == type_key)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: format!("SENSOR_REMOVAL.{type_key}"),
                message: "unknown sensor type key".into(),
            })?;

            if target == "*" {
                survivors.retain(|s| s.sensor_type != sensor_type);
            } else {
                let before = survivors.len();
                survivors.retain(|s| !(s.sensor_type == sensor_type && &s.name == target));
                if survivors.len() == before {
                    return Err(IdError::UnknownSensor(target.clone()));
                }
            }
        }

        if let Some(extra) = survivors
            .iter()
            .find(|s| s.sensor_type != SensorType::NetExternalWrench)
        {
            return Err(IdError::IllPosed(format!(
                "sensor '{}' of type {} is not supported; remove it via SENSOR_REMOVAL",
                extra.name,
                extra.sensor_type.config_key()
            )));
        }

        let slots = survivors
            .iter()
            .enumerate()
            .map(|(i, s)| SensorSlot {
                name: s.name.clone(),
                frame: s.frame.clone(),
                offset: i * WRENCH_SIZE,
            })
            .collect();
        Ok(Self { slots })
    }

    #[must_use]
    pub fn slots(&self) -> &[SensorSlot] {
        &self.slots
    }

    /// Total measurement-vector length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() * WRENCH_SIZE
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot offset of a named sensor.
    pub fn offset_of(&self, name: &str) -> Result<usize, IdError> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.offset)
            .ok_or_else(|| IdError::UnknownSensor(name.to_string()))
    }

    /// Slot bound to a model frame, when one exists.
    #[must_use]
    pub fn slot_for_frame(&self, frame: &str) -> Option<&SensorSlot> {
        self.slots.iter().find(|s| s.frame == frame)
    }
}

/// Layout of the unknown dynamic-variable vector for one estimation variant.
///
/// External wrenches: one six-wide block per source link. Joint torques: the
/// ndof torque block, wrench blocks resolved by the first stage.
#[derive(Debug, Clone, Copy)]
pub struct VariableLayout {
    pub torques: usize,
    pub wrench_blocks: usize,
}

impl VariableLayout {
    #[must_use]
    pub const fn external_wrenches(sources: usize) -> Self {
        Self {
            torques: 0,
            wrench_blocks: sources,
        }
    }

    #[must_use]
    pub const fn joint_torques(ndof: usize) -> Self {
        Self {
            torques: ndof,
            wrench_blocks: 0,
        }
    }

    /// Total unknown-vector length.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.torques + self.wrench_blocks * WRENCH_SIZE
    }

    /// Offset of the i-th wrench block.
    #[must_use]
    pub const fn wrench_offset(&self, index: usize) -> usize {
        self.torques + index * WRENCH_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(name: &str, sensor_type: SensorType, frame: &str) -> SensorInfo {
        SensorInfo {
            name: name.into(),
            sensor_type,
            frame: frame.into(),
        }
    }

    fn sample() -> Vec<SensorInfo> {
        vec![
            sensor("lf_wrench", SensorType::NetExternalWrench, "left_foot"),
            sensor("rf_wrench", SensorType::NetExternalWrench, "right_foot"),
            sensor("pelvis_gyro", SensorType::Gyroscope, "pelvis"),
        ]
    }

    #[test]
    fn wildcard_removal_and_slot_layout() {
        let mut removal = HashMap::new();
        removal.insert("GYROSCOPE_SENSOR".to_string(), "*".to_string());
        let ordering = SensorOrdering::build(&sample(), &removal).unwrap();

        assert_eq!(ordering.len(), 12);
        assert_eq!(ordering.offset_of("lf_wrench").unwrap(), 0);
        assert_eq!(ordering.offset_of("rf_wrench").unwrap(), 6);
        assert_eq!(
            ordering.slot_for_frame("right_foot").unwrap().name,
            "rf_wrench"
        );
    }

    #[test]
    fn exact_removal_drops_one_sensor() {
        let mut removal = HashMap::new();
        removal.insert("GYROSCOPE_SENSOR".to_string(), "*".to_string());
        removal.insert("NET_EXT_WRENCH_SENSOR".to_string(), "rf_wrench".to_string());
        let ordering = SensorOrdering::build(&sample(), &removal).unwrap();
        assert_eq!(ordering.len(), 6);
        assert!(matches!(
            ordering.offset_of("rf_wrench"),
            Err(IdError::UnknownSensor(_))
        ));
    }

    #[test]
    fn removing_a_missing_sensor_fails() {
        let mut removal = HashMap::new();
        removal.insert("GYROSCOPE_SENSOR".to_string(), "nope".to_string());
        assert!(matches!(
            SensorOrdering::build(&sample(), &removal),
            Err(IdError::UnknownSensor(name)) if name == "nope"
        ));
    }

    #[test]
    fn surviving_gyroscope_is_ill_posed() {
        let removal = HashMap::new();
        assert!(matches!(
            SensorOrdering::build(&sample(), &removal),
            Err(IdError::IllPosed(_))
        ));
    }

    #[test]
    fn variable_layouts() {
        let ew = VariableLayout::external_wrenches(2);
        assert_eq!(ew.total(), 12);
        assert_eq!(ew.wrench_offset(1), 6);

        let jt = VariableLayout::joint_torques(23);
        assert_eq!(jt.total(), 23);
    }
}
