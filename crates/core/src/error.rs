use crate::compute::BackendFamily;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("No devices found for type {family}, unsupported hardware or platform?")]
    NoDevicesFound { family: BackendFamily },

    #[error("Unknown scene: {0}")]
    UnknownScene(String),
}
