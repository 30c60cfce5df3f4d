//! Streaming whole-body inverse kinematics.
//!
//! Wearable orientation and contact-force readings drive a set of weighted
//! kinematic tasks; each cycle the tasks are composed into one QP over the
//! generalized velocity and the solution is integrated into the shared
//! articulated model.
//!
//! # Architecture
//!
//! ```text
//! sensor readings ──► CalibrationMap ──► task registry ──► QpBuilder
//!                                                             │
//!                     Model state ◄── explicit Euler step ◄── v
//! ```

pub mod calibration;
pub mod qp;
pub mod solver;
pub mod tasks;

pub use calibration::CalibrationMap;
pub use qp::QpBuilder;
pub use solver::KinematicsSolver;
pub use tasks::{
    FloorContactTask, GravityAlignmentTask, JointConstraintTask, JointRegularizationTask,
    OrientationTask, TaskRows,
};
