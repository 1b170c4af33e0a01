//! Driver seam over the vendor SDK
//!
//! The session never talks to camera hardware directly; everything goes
//! through the `CameraDriver` trait so tests can inject a mock and vendor
//! SDKs stay behind one narrow surface.

pub mod mock;

use std::path::Path;

use crate::error::Result;
use crate::frame::RawFrame;

/// Canonical feature names understood by the driver's register map
pub mod feature {
    pub const WIDTH: &str = "Width";
    pub const HEIGHT: &str = "Height";
    pub const BLACK_LEVEL: &str = "BlackLevel";
    pub const BLACK_LEVEL_AUTO: &str = "BlackLevelAuto";
    pub const BRIGHTNESS: &str = "Brightness";
    pub const DIGITAL_SHIFT: &str = "DigitalShift";
    pub const SHARPNESS: &str = "Sharpness";
    pub const SHARPNESS_ENABLED: &str = "SharpnessEnabled";
    pub const EXPOSURE_TIME: &str = "ExposureTime";
    pub const GAMMA: &str = "Gamma";
    pub const GAIN_RAW: &str = "GainRaw";
    pub const BALANCE_WHITE_AUTO: &str = "BalanceWhiteAuto";
    pub const BALANCE_RATIO_SELECTOR: &str = "BalanceRatioSelector";
    pub const BALANCE_RATIO: &str = "BalanceRatio";
    pub const TRIGGER_MODE: &str = "TriggerMode";
    pub const TRIGGER_SOURCE: &str = "TriggerSource";
    pub const TRIGGER_SELECTOR: &str = "TriggerSelector";
    pub const TRIGGER_ACTIVATION: &str = "TriggerActivation";
    pub const FRAME_TRIGGER_COUNT_RESET: &str = "FrameTriggerCountReset";
}

/// One entry from device enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub index: u32,
    pub vendor: String,
    pub model: String,
    pub serial: String,
}

/// Opaque handle to an open physical connection
///
/// Exclusively owned by the session for one open/close bracket; only ever
/// passed by reference to driver calls.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Values that can be read from or written to a named device feature
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Int(i64),
    Float(f64),
    /// Symbolic enumeration entry, e.g. `TriggerMode = "Off"`
    Sym(String),
    Bool(bool),
}

impl FeatureValue {
    pub fn sym(value: impl Into<String>) -> Self {
        FeatureValue::Sym(value.into())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FeatureValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_sym(&self) -> Option<&str> {
        match self {
            FeatureValue::Sym(v) => Some(v),
            _ => None,
        }
    }
}

/// Physical link connectivity change reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Lost,
    Restored,
}

/// Stream telemetry snapshot
///
/// The all-zero `Default` is the neutral reading returned when the device is
/// not grabbing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamStats {
    pub error_frames: u64,
    pub lost_packets: u64,
    pub good_frames: u64,
    pub fps: f64,
    pub bandwidth_mbps: f64,
}

/// Callback invoked on the driver's own thread for every arriving frame
pub type FrameCallback = Box<dyn Fn(RawFrame) + Send + Sync>;

/// Callback invoked on the driver's own thread for link-status changes
pub type LinkCallback = Box<dyn Fn(LinkEvent) + Send + Sync>;

/// Register-level access to one camera family
///
/// Subscriptions replace any previously registered callback for the same
/// handle.
pub trait CameraDriver: Send + Sync {
    /// List every reachable device
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open the device at the given enumeration index
    fn open(&self, index: u32) -> Result<DeviceHandle>;

    /// Close an open device
    fn close(&self, handle: &DeviceHandle) -> Result<()>;

    fn get_feature(&self, handle: &DeviceHandle, name: &str) -> Result<FeatureValue>;

    fn set_feature(&self, handle: &DeviceHandle, name: &str, value: FeatureValue) -> Result<()>;

    /// Fire a command feature such as a counter reset
    fn execute_command(&self, handle: &DeviceHandle, name: &str) -> Result<()>;

    fn start_acquisition(&self, handle: &DeviceHandle) -> Result<()>;

    fn stop_acquisition(&self, handle: &DeviceHandle) -> Result<()>;

    fn is_grabbing(&self, handle: &DeviceHandle) -> bool;

    /// Discard any frames buffered inside the driver
    fn clear_frame_buffer(&self, handle: &DeviceHandle) -> Result<()>;

    fn subscribe_frames(&self, handle: &DeviceHandle, callback: FrameCallback) -> Result<()>;

    fn subscribe_link_status(&self, handle: &DeviceHandle, callback: LinkCallback) -> Result<()>;

    /// Load a vendor profile file into the device
    fn load_profile(&self, handle: &DeviceHandle, path: &Path) -> Result<()>;

    /// Persist the device's current configuration to a vendor profile file
    fn save_profile(&self, handle: &DeviceHandle, path: &Path) -> Result<()>;

    fn stream_stats(&self, handle: &DeviceHandle) -> Result<StreamStats>;

    fn reset_stats(&self, handle: &DeviceHandle) -> Result<()>;
}
