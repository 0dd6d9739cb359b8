//! Testing utilities for tethercam
//!
//! An in-memory camera transport for exercising sessions without hardware.

pub mod fake_camera;

pub use fake_camera::{DeviceCall, FakeCamera, FakeCameraBuilder, FakeCameraHandle};
