use thiserror::Error;

/// Top-level error type for the motus workspace.
#[derive(Debug, Error)]
pub enum MotusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Kinematics error: {0}")]
    Ik(#[from] IkError),

    #[error("Dynamics error: {0}")]
    Id(#[from] IdError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing group: {0}")]
    MissingGroup(String),

    #[error("Missing parameter '{key}' in group '{group}'")]
    MissingParameter { group: String, key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Unknown wrench source type: {0}")]
    UnknownSourceType(String),
}

/// Articulated model errors.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unknown frame: {0}")]
    UnknownFrame(String),

    #[error("Unknown joint: {0}")]
    UnknownJoint(String),

    #[error("Malformed model description: {0}")]
    Malformed(String),

    #[error("Vector length mismatch: expected {expected}, got {got}")]
    DofMismatch { expected: usize, got: usize },
}

/// Kinematics solver errors.
#[derive(Debug, Error)]
pub enum IkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Node {0} is configured more than once")]
    DuplicateNode(i32),

    #[error("No task configured for node {0}")]
    UnknownNode(i32),

    #[error("Task '{0}' is not configured")]
    TaskNotConfigured(&'static str),

    #[error("Buffer length mismatch: expected {expected}, got {got}")]
    BufferSize { expected: usize, got: usize },

    #[error("QP solver did not converge")]
    NotConverged,

    #[error("Solver output failed validity check")]
    InvalidOutput,
}

/// Dynamics estimator errors.
#[derive(Debug, Error)]
pub enum IdError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Measurement for '{0}' not found")]
    MissingMeasurement(String),

    #[error("Estimator configuration is not well-posed: {0}")]
    IllPosed(String),

    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error("MAP solve failed")]
    SolveFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motus_error_from_config_error() {
        let err = ConfigError::MissingGroup("IK".into());
        let motus_err: MotusError = err.into();
        assert!(matches!(motus_err, MotusError::Config(_)));
        assert!(motus_err.to_string().contains("IK"));
    }

    #[test]
    fn motus_error_from_ik_error() {
        let err = IkError::BufferSize {
            expected: 6,
            got: 5,
        };
        let motus_err: MotusError = err.into();
        assert!(matches!(motus_err, MotusError::Ik(_)));
        assert!(motus_err.to_string().contains('6'));
    }

    #[test]
    fn motus_error_from_id_error() {
        let err = IdError::MissingMeasurement("LeftFoot".into());
        let motus_err: MotusError = err.into();
        assert!(matches!(motus_err, MotusError::Id(_)));
        assert!(motus_err.to_string().contains("LeftFoot"));
    }
}
