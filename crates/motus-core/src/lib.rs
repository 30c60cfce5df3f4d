// motus-core: configuration, errors, diagnostics and shared types for the
// motus human motion estimation stack.

pub mod config;
pub mod diag;
pub mod error;
pub mod time;
pub mod types;

pub mod prelude {
    pub use crate::config::{
        EstimatorConfig, ExternalWrenchesConfig, IkGroupConfig, JointTorquesConfig, TaskConfig,
        WrenchSourceConfig,
    };
    pub use crate::diag::Diag;
    pub use crate::error::{ConfigError, IdError, IkError, ModelError, MotusError};
    pub use crate::time::Timestep;
    pub use crate::types::{NodeId, NodeReading, Wrench};
}
