//! Device transport seam
//!
//! The USB/PTP driver lives outside this crate. A session talks to the camera only through
//! [`CameraTransport`] and hears from it only through [`TransportEvent`].

use crate::types::{CameraParameters, CaptureResult, ConnectionState};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("config key not found: {0}")]
    KeyNotFound(String),
    #[error("value rejected for '{key}': {reason}")]
    Rejected { key: String, reason: String },
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Driver message fragments that mean the camera went away rather than refused a request.
const DISCONNECT_MARKERS: &[&str] = &[
    "ptp",
    "i/o",
    "could not",
    "not found",
    "no device",
    "usb port",
    "timeout",
    "unspecified",
    "general error",
    "disconnected",
];

impl TransportError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Unreachable(_))
    }

    /// Classify a free-form driver error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if DISCONNECT_MARKERS.iter().any(|m| lower.contains(m)) {
            TransportError::Unreachable(message)
        } else {
            TransportError::Other(message)
        }
    }
}

/// Blocking operations against one attached camera.
///
/// Implementations are never called concurrently: the session runs every call on a
/// blocking worker while holding the only handle to the transport.
pub trait CameraTransport: Send + 'static {
    /// Fails if `key` does not exist on this camera.
    fn get_config_choices(&mut self, key: &str) -> Result<Vec<String>, TransportError>;

    /// Fails if the camera cannot be reached.
    fn get_params(&mut self) -> Result<CameraParameters, TransportError>;

    fn set_config_value(&mut self, key: &str, value: &str) -> Result<(), TransportError>;

    /// Folder used for captures triggered from the camera body.
    fn set_download_folder(&mut self, path: &Path) -> Result<(), TransportError>;

    fn capture(&mut self, target_folder: Option<&Path>) -> Result<CaptureResult, TransportError>;
}

impl<T: CameraTransport + ?Sized> CameraTransport for Box<T> {
    fn get_config_choices(&mut self, key: &str) -> Result<Vec<String>, TransportError> {
        (**self).get_config_choices(key)
    }

    fn get_params(&mut self) -> Result<CameraParameters, TransportError> {
        (**self).get_params()
    }

    fn set_config_value(&mut self, key: &str, value: &str) -> Result<(), TransportError> {
        (**self).set_config_value(key, value)
    }

    fn set_download_folder(&mut self, path: &Path) -> Result<(), TransportError> {
        (**self).set_download_folder(path)
    }

    fn capture(&mut self, target_folder: Option<&Path>) -> Result<CaptureResult, TransportError> {
        (**self).capture(target_folder)
    }
}

/// Events pushed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Status(ConnectionState),
    /// A file was captured outside of [`crate::TetherSession::capture`], e.g. by the shutter button.
    Captured(CaptureResult),
}
