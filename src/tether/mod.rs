//! Camera session engine
//!
//! Keeps one consistent view of an attached camera's settings while connection events,
//! camera-side captures, periodic polling and host writes all compete for the same device.
//!
//! ```no_run
//! use tethercam::{ConnectionState, SemanticParam, TetherSession};
//! use tethercam::testing::FakeCamera;
//!
//! # async fn demo() -> Result<(), tethercam::TetherError> {
//! let session = TetherSession::builder().spawn(FakeCamera::typical());
//! session.connection_changed(ConnectionState::Connected).await?;
//! session.write(SemanticParam::Iso, "800").await?;
//! let shot = session.capture(None).await?;
//! println!("saved {}", shot.file_path.display());
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod connection;
pub mod events;
pub mod resolver;
pub mod session;
pub mod store;
mod sync_loop;

pub use capture::CaptureCoordinator;
pub use connection::{ConnectionStateMachine, Transition};
pub use events::{ParameterControl, SessionEvent, SessionSnapshot};
pub use resolver::{first_working_candidate, ConfigKeyResolver};
pub use session::{SessionBuilder, TetherSession};
pub use store::ParameterStore;
