//! Scriptable in-memory camera
//!
//! Behaves like a gphoto-style driver: a set of radio config keys with choices and a current
//! value, a remaining-shot counter, and a USB cable that can be pulled. Every call is logged
//! and the number of overlapping calls is tracked, so tests can check the session never
//! talks to the camera from two places at once.

use crate::naming::capture_file_name;
use crate::transport::{CameraTransport, TransportError};
use crate::types::{CameraParameters, CaptureResult, SemanticParam};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One call made against the fake camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Choices(String),
    GetParams,
    SetValue { key: String, value: String },
    SetDownloadFolder(PathBuf),
    Capture(Option<PathBuf>),
}

#[derive(Debug, Clone)]
struct FakeKey {
    choices: Vec<String>,
    value: String,
    read_only: bool,
}

#[derive(Debug)]
struct FakeState {
    keys: BTreeMap<String, FakeKey>,
    model: String,
    port: String,
    battery_level: Option<f32>,
    images_remaining: Option<u32>,
    plugged: bool,
    latency: Duration,
    capture_failure: Option<String>,
    download_folder: Option<PathBuf>,
    shots: u32,
    built_at: Instant,
    calls: Vec<(Duration, DeviceCall)>,
    in_flight: usize,
    max_in_flight: usize,
}

impl FakeState {
    /// Current value for a semantic parameter, read through the first default key present.
    fn value_for(&self, param: SemanticParam) -> Option<String> {
        param
            .default_candidates()
            .iter()
            .find_map(|k| self.keys.get(*k))
            .map(|k| k.value.clone())
    }

    fn snapshot(&self) -> CameraParameters {
        CameraParameters {
            iso: self.value_for(SemanticParam::Iso).unwrap_or_default(),
            shutter_speed: self.value_for(SemanticParam::Shutter).unwrap_or_default(),
            aperture: self.value_for(SemanticParam::Aperture).unwrap_or_default(),
            exposure_compensation: self.value_for(SemanticParam::ExposureComp),
            shooting_mode: self.value_for(SemanticParam::ShootingMode),
            white_balance: self.value_for(SemanticParam::WhiteBalance),
            focus_mode: self.value_for(SemanticParam::FocusMode),
            drive_mode: self.value_for(SemanticParam::DriveMode),
            metering_mode: self.value_for(SemanticParam::MeteringMode),
            battery_level: self.battery_level,
            images_remaining: self.images_remaining,
            model: self.model.clone(),
            port: self.port.clone(),
        }
    }

    fn ensure_plugged(&self) -> Result<(), TransportError> {
        if self.plugged {
            Ok(())
        } else {
            Err(TransportError::from_message(
                "Could not find the requested device on the USB port",
            ))
        }
    }
}

fn lock(shared: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The transport half. Hand this to the session.
#[derive(Debug)]
pub struct FakeCamera {
    shared: Arc<Mutex<FakeState>>,
}

/// The test half. Inspects and manipulates the camera while a session owns it.
#[derive(Debug, Clone)]
pub struct FakeCameraHandle {
    shared: Arc<Mutex<FakeState>>,
}

pub struct FakeCameraBuilder {
    keys: BTreeMap<String, FakeKey>,
    model: String,
    images_remaining: Option<u32>,
    latency: Duration,
}

impl FakeCameraBuilder {
    /// Add a key whose current value is its first choice.
    pub fn with_key(self, key: &str, choices: &[&str]) -> Self {
        let value = choices.first().copied().unwrap_or_default();
        self.with_value(key, choices, value)
    }

    pub fn with_value(mut self, key: &str, choices: &[&str], value: &str) -> Self {
        self.keys.insert(
            key.to_string(),
            FakeKey {
                choices: choices.iter().map(|c| c.to_string()).collect(),
                value: value.to_string(),
                read_only: false,
            },
        );
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_images_remaining(mut self, remaining: Option<u32>) -> Self {
        self.images_remaining = remaining;
        self
    }

    /// Time every device call takes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn build(self) -> FakeCamera {
        FakeCamera {
            shared: Arc::new(Mutex::new(FakeState {
                keys: self.keys,
                model: self.model,
                port: "usb:001,004".to_string(),
                battery_level: Some(0.8),
                images_remaining: self.images_remaining,
                plugged: true,
                latency: self.latency,
                capture_failure: None,
                download_folder: None,
                shots: 0,
                built_at: Instant::now(),
                calls: Vec::new(),
                in_flight: 0,
                max_in_flight: 0,
            })),
        }
    }
}

impl FakeCamera {
    pub fn builder() -> FakeCameraBuilder {
        FakeCameraBuilder {
            keys: BTreeMap::new(),
            model: "Fake EOS R".to_string(),
            images_remaining: Some(100),
            latency: Duration::ZERO,
        }
    }

    /// A body exposing the standard key names for everything but shooting mode.
    pub fn typical() -> FakeCamera {
        Self::builder()
            .with_value("iso", &["100", "200", "400", "800", "1600", "3200"], "200")
            .with_value("shutterspeed", &["1/30", "1/60", "1/125", "1/250"], "1/125")
            .with_value("aperture", &["2.8", "4", "5.6", "8"], "5.6")
            .with_value("exposurecompensation", &["-1", "0", "+1"], "0")
            .with_key("whitebalance", &["Auto", "Daylight", "Tungsten"])
            .with_key("focusmode", &["One Shot", "AI Servo", "Manual"])
            .with_key("drivemode", &["Single", "Continuous"])
            .with_key("meteringmode", &["Evaluative", "Spot"])
            .build()
    }

    pub fn handle(&self) -> FakeCameraHandle {
        FakeCameraHandle {
            shared: self.shared.clone(),
        }
    }

    fn call<R>(&mut self, call: DeviceCall, op: impl FnOnce(&mut FakeState) -> R) -> R {
        let latency = {
            let mut state = lock(&self.shared);
            let at = state.built_at.elapsed();
            state.calls.push((at, call));
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.latency
        };

        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut state = lock(&self.shared);
        let result = op(&mut *state);
        state.in_flight -= 1;
        result
    }
}

impl CameraTransport for FakeCamera {
    fn get_config_choices(&mut self, key: &str) -> Result<Vec<String>, TransportError> {
        self.call(DeviceCall::Choices(key.to_string()), |state| {
            state.ensure_plugged()?;
            state
                .keys
                .get(key)
                .map(|k| k.choices.clone())
                .ok_or_else(|| TransportError::KeyNotFound(key.to_string()))
        })
    }

    fn get_params(&mut self) -> Result<CameraParameters, TransportError> {
        self.call(DeviceCall::GetParams, |state| {
            state.ensure_plugged()?;
            Ok(state.snapshot())
        })
    }

    fn set_config_value(&mut self, key: &str, value: &str) -> Result<(), TransportError> {
        let call = DeviceCall::SetValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.call(call, |state| {
            state.ensure_plugged()?;
            let entry = state
                .keys
                .get_mut(key)
                .ok_or_else(|| TransportError::KeyNotFound(key.to_string()))?;
            if entry.read_only {
                return Err(TransportError::Rejected {
                    key: key.to_string(),
                    reason: "readonly".to_string(),
                });
            }
            if !entry.choices.is_empty() && !entry.choices.iter().any(|c| c == value) {
                return Err(TransportError::Rejected {
                    key: key.to_string(),
                    reason: format!("'{value}' is not a valid choice"),
                });
            }
            entry.value = value.to_string();
            Ok(())
        })
    }

    fn set_download_folder(&mut self, path: &Path) -> Result<(), TransportError> {
        self.call(DeviceCall::SetDownloadFolder(path.to_path_buf()), |state| {
            state.ensure_plugged()?;
            state.download_folder = Some(path.to_path_buf());
            Ok(())
        })
    }

    fn capture(&mut self, target_folder: Option<&Path>) -> Result<CaptureResult, TransportError> {
        let call = DeviceCall::Capture(target_folder.map(Path::to_path_buf));
        self.call(call, |state| {
            state.ensure_plugged()?;
            if let Some(reason) = state.capture_failure.take() {
                return Err(TransportError::Other(reason));
            }

            state.shots += 1;
            if let Some(remaining) = state.images_remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }

            let folder = target_folder
                .map(Path::to_path_buf)
                .or_else(|| state.download_folder.clone())
                .unwrap_or_else(std::env::temp_dir);
            let camera_name = format!("capt{:04}.jpg", state.shots);
            let name = capture_file_name(&camera_name, 1_700_000_000 + u64::from(state.shots));

            Ok(CaptureResult {
                file_path: folder.join(name),
                preview_path: None,
                width: 6000,
                height: 4000,
            })
        })
    }
}

impl FakeCameraHandle {
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.timeline().into_iter().map(|(_, call)| call).collect()
    }

    /// Every call with the moment it started, measured from when the camera was built.
    pub fn timeline(&self) -> Vec<(Duration, DeviceCall)> {
        lock(&self.shared).calls.clone()
    }

    pub fn choice_queries(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::Choices(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn param_reads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DeviceCall::GetParams))
            .count()
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::SetValue { key, value } => Some((key, value)),
                _ => None,
            })
            .collect()
    }

    pub fn captures(&self) -> Vec<Option<PathBuf>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::Capture(folder) => Some(folder),
                _ => None,
            })
            .collect()
    }

    /// Highest number of device calls that were ever running at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        lock(&self.shared).max_in_flight
    }

    pub fn download_folder(&self) -> Option<PathBuf> {
        lock(&self.shared).download_folder.clone()
    }

    pub fn images_remaining(&self) -> Option<u32> {
        lock(&self.shared).images_remaining
    }

    /// Pull the cable. Every following call fails as unreachable.
    pub fn unplug(&self) {
        lock(&self.shared).plugged = false;
    }

    pub fn replug(&self) {
        lock(&self.shared).plugged = true;
    }

    /// Change a value from the camera body, bypassing the session.
    pub fn turn_dial(&self, key: &str, value: &str) {
        if let Some(entry) = lock(&self.shared).keys.get_mut(key) {
            entry.value = value.to_string();
        }
    }

    pub fn set_read_only(&self, key: &str) {
        if let Some(entry) = lock(&self.shared).keys.get_mut(key) {
            entry.read_only = true;
        }
    }

    /// Swap the keys the camera exposes, as if a different body were plugged in.
    pub fn replace_keys(&self, keys: &[(&str, &[&str])]) {
        let mut state = lock(&self.shared);
        state.keys = keys
            .iter()
            .map(|(key, choices)| {
                (
                    key.to_string(),
                    FakeKey {
                        choices: choices.iter().map(|c| c.to_string()).collect(),
                        value: choices.first().copied().unwrap_or_default().to_string(),
                        read_only: false,
                    },
                )
            })
            .collect();
    }

    pub fn fail_next_capture(&self, reason: &str) {
        lock(&self.shared).capture_failure = Some(reason.to_string());
    }

    pub fn set_latency(&self, latency: Duration) {
        lock(&self.shared).latency = latency;
    }

    pub fn clear_calls(&self) {
        lock(&self.shared).calls.clear();
    }

    /// Keys the camera has been asked about, without duplicates.
    pub fn queried_keys(&self) -> HashSet<String> {
        self.choice_queries().into_iter().collect()
    }
}
