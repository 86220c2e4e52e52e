/// Errors that can occur in container and envelope operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Frame encode/decode error.
    #[error("frame error: {0}")]
    Frame(#[from] shmparcel_frame::FrameError),

    /// Shared-region error.
    #[error("transport error: {0}")]
    Transport(#[from] shmparcel_transport::TransportError),

    /// The payload type cannot be used the way it was asked to be.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ContainerError {
    /// Returns true when the error came from a malformed frame.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Frame(err) if err.is_decode_error())
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
