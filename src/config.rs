//! Camera configuration types
//!
//! These types define the desired operating parameters of a device session,
//! either inline or loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// How the device delivers frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Free-running stream, frames arrive via the driver callback
    Continuous,
    /// Hardware line trigger, one frame per external edge
    ExternalTrigger,
    /// Software-issued trigger
    SoftwareTrigger,
    /// The caller pulls frames on its own threads; the session registers no
    /// callbacks and runs no internal loop
    ExternallyClocked,
}

impl Default for AcquisitionMode {
    fn default() -> Self {
        AcquisitionMode::Continuous
    }
}

/// Edge polarity for the external line trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEdge {
    Rising,
    Falling,
}

impl TriggerEdge {
    /// Symbolic feature value understood by the driver
    pub fn symbol(&self) -> &'static str {
        match self {
            TriggerEdge::Rising => "RisingEdge",
            TriggerEdge::Falling => "FallingEdge",
        }
    }
}

impl Default for TriggerEdge {
    fn default() -> Self {
        TriggerEdge::Rising
    }
}

/// Imaging parameters that can be changed while the stream is running
///
/// This is exactly the subset a lite reset applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingParams {
    #[serde(default = "default_black_level")]
    pub black_level: i64,
    #[serde(default = "default_brightness")]
    pub brightness: i64,
    #[serde(default)]
    pub digital_shift: i64,
    #[serde(default = "default_sharpness")]
    pub sharpness: i64,
    /// Exposure time in microseconds
    #[serde(default = "default_exposure_us")]
    pub exposure_us: f64,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    /// White-balance ratios for the red, green and blue channels
    #[serde(default = "default_balance_ratio")]
    pub balance_ratio: [f64; 3],
}

fn default_black_level() -> i64 {
    20
}

fn default_brightness() -> i64 {
    60
}

fn default_sharpness() -> i64 {
    70
}

fn default_exposure_us() -> f64 {
    3000.0
}

fn default_gamma() -> f64 {
    0.7
}

fn default_gain() -> f64 {
    1.0
}

fn default_balance_ratio() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

impl Default for ImagingParams {
    fn default() -> Self {
        Self {
            black_level: default_black_level(),
            brightness: default_brightness(),
            digital_shift: 0,
            sharpness: default_sharpness(),
            exposure_us: default_exposure_us(),
            gamma: default_gamma(),
            gain: default_gain(),
            balance_ratio: default_balance_ratio(),
        }
    }
}

/// Where the device parameters come from
///
/// Exactly one source is ever active; the enum makes the choice structural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Explicit feature values applied one by one
    Inline(ImagingParams),
    /// A vendor profile file the driver loads wholesale; individual feature
    /// fields are ignored
    ProfileFile(PathBuf),
}

impl Default for ConfigSource {
    fn default() -> Self {
        ConfigSource::Inline(ImagingParams::default())
    }
}

/// Reconnect policy after link loss
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// How many close/reopen attempts before the session gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts, in milliseconds (no exponential growth)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    1000
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Desired operating parameters for one device session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub mode: AcquisitionMode,
    #[serde(default = "default_width")]
    pub width: i64,
    #[serde(default = "default_height")]
    pub height: i64,
    #[serde(default)]
    pub source: ConfigSource,
    /// Device serial number; `"auto"` or empty means "pick by vendor filter,
    /// falling back to `index`"
    #[serde(default = "default_serial")]
    pub serial: String,
    /// Enumeration index used when no serial is given and the vendor filter
    /// is empty
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub trigger_edge: TriggerEdge,
    /// Frame handoff queue depth; 1 means the newest frame always displaces
    /// any unconsumed older one
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// IoU threshold above which two same-class detections count as the same
    /// physical target
    #[serde(default = "default_dedup_iou")]
    pub dedup_iou: f32,
    /// Manufacturer strings accepted during auto-selection
    #[serde(default = "default_vendor_filter")]
    pub vendor_filter: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_width() -> i64 {
    1280
}

fn default_height() -> i64 {
    1024
}

fn default_serial() -> String {
    "auto".to_string()
}

fn default_queue_capacity() -> usize {
    1
}

fn default_dedup_iou() -> f32 {
    0.9
}

fn default_vendor_filter() -> Vec<String> {
    vec![
        "Dahua Technology".to_string(),
        "Huaray Technology".to_string(),
    ]
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::default(),
            width: default_width(),
            height: default_height(),
            source: ConfigSource::default(),
            serial: default_serial(),
            index: 0,
            trigger_edge: TriggerEdge::default(),
            queue_capacity: default_queue_capacity(),
            dedup_iou: default_dedup_iou(),
            vendor_filter: default_vendor_filter(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CameraConfig {
    /// Create a configuration with default parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = toml::from_str(&text)?;
        Ok(config)
    }

    /// Whether the device is selected automatically rather than by serial
    pub fn auto_select(&self) -> bool {
        self.serial.is_empty() || self.serial == "auto"
    }

    /// Set the acquisition mode
    pub fn with_mode(mut self, mode: AcquisitionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the image geometry
    pub fn with_geometry(mut self, width: i64, height: i64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Select the device by serial number
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    /// Select the device by enumeration index
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self.serial = String::new();
        self.vendor_filter.clear();
        self
    }

    /// Set inline imaging parameters
    pub fn with_params(mut self, params: ImagingParams) -> Self {
        self.source = ConfigSource::Inline(params);
        self
    }

    /// Load device parameters from a vendor profile file instead
    pub fn with_profile(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = ConfigSource::ProfileFile(path.into());
        self
    }

    /// Set the frame queue depth (clamped to at least 1)
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the duplicate-suppression IoU threshold
    pub fn with_dedup_iou(mut self, iou: f32) -> Self {
        self.dedup_iou = iou.clamp(0.0, 1.0);
        self
    }

    /// Set the reconnect policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
