use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum ReconcileError {
    #[error("Point {point} has no {missing} bound")]
    MissingBinding { point: String, missing: &'static str },

    #[error("Capacity attribute missing on {0}")]
    MissingCapacity(String),

    #[error("Invalid capacity {capacity} on {node}")]
    InvalidCapacity { node: String, capacity: f64 },

    #[error("Ratio of {value} over {capacity} is not a finite number")]
    InvalidRatio { value: f64, capacity: f64 },

    #[error("Point {point} is already bound for {role}")]
    AlreadyBound { point: String, role: &'static str },

    #[error("Endpoint {0} has no usable value")]
    NoValue(String),

    #[error("Write to {target} failed: {reason}")]
    WriteFailed { target: String, reason: String },

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

impl From<rumqttc::ClientError> for ReconcileError {
    fn from(e: rumqttc::ClientError) -> Self {
        ReconcileError::Mqtt(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
