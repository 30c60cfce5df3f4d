//! Posterior estimation of external wrenches and joint torques.
//!
//! Contact and force-plate readings, resolved through a configurable set of
//! wrench sources, feed a linear-Gaussian MAP solve in two stages: external
//! wrenches first, joint torques second with the wrench estimates injected
//! as measurements.
//!
//! # Architecture
//!
//! ```text
//! raw wrenches ──► WrenchSource ──► MapSolver (wrench stage)
//!                                       │
//!            gravity torques + J^T w ──► MapSolver (torque stage)
//! ```

pub mod estimator;
pub mod map;
pub mod sensors;
pub mod sources;

pub use estimator::DynamicsEstimator;
pub use map::{MapSolver, MeasurementBlock};
pub use sensors::{SensorOrdering, SensorSlot, VariableLayout, WRENCH_SIZE};
pub use sources::WrenchSource;
