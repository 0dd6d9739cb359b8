use crate::transport::TransportError;
use crate::types::SemanticParam;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TetherError {
    /// The camera is detached or the transport failed. Whichever call raised it, the session
    /// moves to `Disconnected`.
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Parameter not supported by this camera: {0}")]
    UnsupportedParameter(SemanticParam),
    #[error("Capture error: {0}")]
    CaptureFailed(String),
    #[error("Write rejected: {0}")]
    WriteRejected(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Workspace error: {0}")]
    Workspace(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Tether session is closed")]
    SessionClosed,
}

impl TetherError {
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, TetherError::DeviceUnavailable(_))
    }

    /// Map a failed device read. Every read failure counts as a detach, whatever the
    /// transport thinks it was.
    pub(crate) fn from_read(error: TransportError) -> Self {
        TetherError::DeviceUnavailable(error.to_string())
    }

    pub(crate) fn from_write(error: TransportError) -> Self {
        if error.is_disconnect() {
            TetherError::DeviceUnavailable(error.to_string())
        } else {
            TetherError::WriteRejected(error.to_string())
        }
    }

    /// A capture that failed because the camera went away is a detach, not a capture error.
    pub(crate) fn from_capture(error: TransportError) -> Self {
        if error.is_disconnect() {
            TetherError::DeviceUnavailable(error.to_string())
        } else {
            TetherError::CaptureFailed(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_classification() {
        let unplugged = TransportError::Unreachable("usb port gone".to_string());
        assert!(TetherError::from_write(unplugged).is_device_unavailable());

        let rejected = TransportError::Rejected {
            key: "iso".to_string(),
            reason: "readonly".to_string(),
        };
        assert!(matches!(
            TetherError::from_write(rejected),
            TetherError::WriteRejected(_)
        ));
    }

    #[test]
    fn test_read_errors_always_mean_unavailable() {
        let err = TetherError::from_read(TransportError::KeyNotFound("iso".to_string()));
        assert!(err.is_device_unavailable());
    }

    #[test]
    fn test_capture_error_keeps_cause() {
        let err = TetherError::from_capture(TransportError::Other("card full".to_string()));
        assert_eq!(err.to_string(), "Capture error: transport error: card full");
    }

    #[test]
    fn test_capture_on_detached_camera_is_unavailable() {
        let err = TetherError::from_capture(TransportError::Unreachable("usb port gone".to_string()));
        assert!(err.is_device_unavailable());
    }

    #[test]
    fn test_unsupported_display_uses_semantic_name() {
        let err = TetherError::UnsupportedParameter(SemanticParam::WhiteBalance);
        assert_eq!(
            err.to_string(),
            "Parameter not supported by this camera: white_balance"
        );
    }
}
