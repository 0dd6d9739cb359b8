//! tethercam: parameter synchronization for tethered cameras
//!
//! Keeps a host application's view of a USB-attached camera's settings consistent while
//! connection changes, shutter-button captures, periodic polling and user writes all arrive
//! at once.
//!
//! # Features
//! - Per-camera resolution of vendor config keys ("iso" vs "isospeed")
//! - One serialized device queue; reads never overlap
//! - Settle delay after writes before values are trusted
//! - Capture with workspace folder resolution and post-capture refresh
//! - Event broadcast and watchable session snapshots
//!
//! # Usage
//! ```rust,ignore
//! use tethercam::{ConnectionState, SemanticParam, TetherConfig, TetherSession};
//!
//! let config = TetherConfig::load_or_default();
//! let session = TetherSession::spawn(my_gphoto_transport, &config)?;
//! session.connection_changed(ConnectionState::Connected).await?;
//! session.write(SemanticParam::Iso, "800").await?;
//! ```
pub mod config;
pub mod errors;
pub mod naming;
pub mod tether;
pub mod transport;
pub mod types;
pub mod workspace;

// Testing utilities - in-memory camera for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::{StorageConfig, SyncConfig, TetherConfig};
pub use errors::TetherError;
pub use tether::{
    ConfigKeyResolver, ParameterControl, SessionBuilder, SessionEvent, SessionSnapshot,
    TetherSession,
};
pub use transport::{CameraTransport, TransportError, TransportEvent};
pub use types::{
    AliasEntry, AliasMap, CameraParameters, CandidateTable, CaptureResult, ConnectionState,
    SemanticParam,
};
pub use workspace::{DatedWorkspace, SharedWorkspace, WorkspaceProvider};

/// Initialize logging for tethercam
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "tethercam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
