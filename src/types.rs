use crate::errors::TetherError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Vendor-independent name of a camera setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticParam {
    Iso,
    Aperture,
    Shutter,
    ExposureComp,
    WhiteBalance,
    FocusMode,
    DriveMode,
    ShootingMode,
    MeteringMode,
}

impl SemanticParam {
    pub const ALL: [SemanticParam; 9] = [
        SemanticParam::Iso,
        SemanticParam::Aperture,
        SemanticParam::Shutter,
        SemanticParam::ExposureComp,
        SemanticParam::WhiteBalance,
        SemanticParam::FocusMode,
        SemanticParam::DriveMode,
        SemanticParam::ShootingMode,
        SemanticParam::MeteringMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticParam::Iso => "iso",
            SemanticParam::Aperture => "aperture",
            SemanticParam::Shutter => "shutter",
            SemanticParam::ExposureComp => "exposure_comp",
            SemanticParam::WhiteBalance => "white_balance",
            SemanticParam::FocusMode => "focus_mode",
            SemanticParam::DriveMode => "drive_mode",
            SemanticParam::ShootingMode => "shooting_mode",
            SemanticParam::MeteringMode => "metering_mode",
        }
    }

    /// Known vendor key spellings, most common first. The order is the lookup order.
    pub fn default_candidates(&self) -> &'static [&'static str] {
        match self {
            SemanticParam::Iso => &["iso", "isospeed", "autoiso"],
            SemanticParam::Aperture => &["aperture", "f-number", "fnumber", "aperture2"],
            SemanticParam::Shutter => &[
                "shutterspeed",
                "shutter",
                "shutterspeed2",
                "exptime",
                "exposuretime",
            ],
            SemanticParam::ExposureComp => &[
                "exposurecompensation",
                "expcomp",
                "exposurecomp",
                "exposure",
            ],
            SemanticParam::WhiteBalance => &[
                "whitebalance",
                "whitebalanceadjust",
                "whitebalance2",
                "wb",
            ],
            SemanticParam::FocusMode => &["focusmode", "autofocus", "afmode", "focusmode2"],
            SemanticParam::DriveMode => &["drivemode", "capturemode", "continuous"],
            SemanticParam::ShootingMode => &[
                "shootingmode",
                "capturemode",
                "capturemode2",
                "autoexposuremode",
                "exposuremode",
                "mode",
            ],
            SemanticParam::MeteringMode => &["meteringmode", "meteringmodedial", "metering"],
        }
    }
}

impl fmt::Display for SemanticParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticParam {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iso" => Ok(Self::Iso),
            "aperture" => Ok(Self::Aperture),
            "shutter" => Ok(Self::Shutter),
            "exposure_comp" => Ok(Self::ExposureComp),
            "white_balance" => Ok(Self::WhiteBalance),
            "focus_mode" => Ok(Self::FocusMode),
            "drive_mode" => Ok(Self::DriveMode),
            "shooting_mode" => Ok(Self::ShootingMode),
            "metering_mode" => Ok(Self::MeteringMode),
            other => Err(TetherError::InvalidArgument(format!(
                "unknown camera parameter: {other}"
            ))),
        }
    }
}

/// Full snapshot of what the camera reported on one read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraParameters {
    pub iso: String,
    pub shutter_speed: String,
    pub aperture: String,
    pub exposure_compensation: Option<String>,
    pub shooting_mode: Option<String>,
    pub white_balance: Option<String>,
    pub focus_mode: Option<String>,
    pub drive_mode: Option<String>,
    pub metering_mode: Option<String>,
    /// Fraction in 0.0..=1.0
    pub battery_level: Option<f32>,
    pub images_remaining: Option<u32>,
    pub model: String,
    pub port: String,
}

impl CameraParameters {
    pub fn value_of(&self, param: SemanticParam) -> Option<&str> {
        match param {
            SemanticParam::Iso => Some(self.iso.as_str()),
            SemanticParam::Aperture => Some(self.aperture.as_str()),
            SemanticParam::Shutter => Some(self.shutter_speed.as_str()),
            SemanticParam::ExposureComp => self.exposure_compensation.as_deref(),
            SemanticParam::WhiteBalance => self.white_balance.as_deref(),
            SemanticParam::FocusMode => self.focus_mode.as_deref(),
            SemanticParam::DriveMode => self.drive_mode.as_deref(),
            SemanticParam::ShootingMode => self.shooting_mode.as_deref(),
            SemanticParam::MeteringMode => self.metering_mode.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub file_path: PathBuf,
    pub preview_path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Vendor key confirmed on the attached camera, with the choices it reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub key: String,
    pub choices: Vec<String>,
}

/// Semantic parameter -> confirmed vendor key, for one session only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasMap {
    entries: BTreeMap<SemanticParam, AliasEntry>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previous key for `param`, so a parameter never maps to two keys.
    pub fn insert(&mut self, param: SemanticParam, entry: AliasEntry) {
        self.entries.insert(param, entry);
    }

    pub fn get(&self, param: SemanticParam) -> Option<&AliasEntry> {
        self.entries.get(&param)
    }

    pub fn contains(&self, param: SemanticParam) -> bool {
        self.entries.contains_key(&param)
    }

    pub fn params(&self) -> Vec<SemanticParam> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SemanticParam, &AliasEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered candidate keys to try for each semantic parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTable {
    entries: BTreeMap<SemanticParam, Vec<String>>,
}

impl Default for CandidateTable {
    fn default() -> Self {
        let entries = SemanticParam::ALL
            .iter()
            .map(|p| {
                let keys = p.default_candidates().iter().map(|k| k.to_string()).collect();
                (*p, keys)
            })
            .collect();
        Self { entries }
    }
}

impl CandidateTable {
    pub fn candidates(&self, param: SemanticParam) -> &[String] {
        self.entries.get(&param).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_candidates(&mut self, param: SemanticParam, keys: Vec<String>) {
        self.entries.insert(param, keys);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SemanticParam, &Vec<String>)> {
        self.entries.iter()
    }
}
