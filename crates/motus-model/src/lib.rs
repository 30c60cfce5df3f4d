//! Articulated body model for the motus estimation stack.
//!
//! The estimators treat the model as an opaque query service: push a state
//! with [`Model::set_state`], then ask for frame transforms, floating-base
//! Jacobians, center of mass, gravity torques or the declared sensor list.
//!
//! # Architecture
//!
//! ```text
//! ModelDescription (TOML) ──► Model ──► transforms / Jacobians / sensors
//! ```

pub mod description;
pub mod model;

pub use description::{
    JointDescription, LinkDescription, ModelDescription, OriginDescription, SensorDescription,
};
pub use model::{Model, SensorInfo, SensorType};
