//! Scriptable in-memory camera driver
//!
//! Stands in for the vendor SDK in unit and integration tests: features are
//! stored in a map with full readback, open failures and feature rejections
//! can be scripted, and frame/link events are emitted synchronously to the
//! registered callbacks.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    CameraDriver, DeviceDescriptor, DeviceHandle, FeatureValue, FrameCallback, LinkCallback,
    LinkEvent, StreamStats,
};
use crate::error::{CameraError, Result};
use crate::frame::RawFrame;

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceDescriptor>,
    features: HashMap<String, FeatureValue>,
    commands: Vec<String>,
    rejected: HashSet<String>,
    open_failures: u32,
    fail_profile: bool,
    opened: bool,
    grabbing: bool,
    next_handle: u64,
    stats: StreamStats,
    profile_loads: Vec<PathBuf>,
    profile_saves: Vec<PathBuf>,
    open_calls: u32,
    open_indices: Vec<u32>,
    start_calls: u32,
    stop_calls: u32,
    close_calls: u32,
}

/// In-memory `CameraDriver` for tests
#[derive(Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
    // Kept outside `state` so emit_* can invoke callbacks without holding the
    // state lock; handlers are allowed to call back into the driver.
    frame_cb: Mutex<Option<Arc<FrameCallback>>>,
    link_cb: Mutex<Option<Arc<LinkCallback>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device to the enumeration list
    pub fn with_device(
        self,
        vendor: impl Into<String>,
        model: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        {
            let mut state = self.state.lock();
            let index = state.devices.len() as u32;
            state.devices.push(DeviceDescriptor {
                index,
                vendor: vendor.into(),
                model: model.into(),
                serial: serial.into(),
            });
        }
        self
    }

    /// Make the next `n` open calls fail with a driver error
    pub fn fail_next_opens(&self, n: u32) {
        self.state.lock().open_failures = n;
    }

    /// Make every write to the named feature fail
    pub fn reject_feature(&self, name: impl Into<String>) {
        self.state.lock().rejected.insert(name.into());
    }

    /// Make profile loads fail
    pub fn fail_profile_loads(&self) {
        self.state.lock().fail_profile = true;
    }

    pub fn set_stats(&self, stats: StreamStats) {
        self.state.lock().stats = stats;
    }

    /// Read back a stored feature value
    pub fn feature(&self, name: &str) -> Option<FeatureValue> {
        self.state.lock().features.get(name).cloned()
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn profile_loads(&self) -> Vec<PathBuf> {
        self.state.lock().profile_loads.clone()
    }

    pub fn profile_saves(&self) -> Vec<PathBuf> {
        self.state.lock().profile_saves.clone()
    }

    pub fn open_calls(&self) -> u32 {
        self.state.lock().open_calls
    }

    /// Enumeration indices passed to `open`, in call order
    pub fn open_indices(&self) -> Vec<u32> {
        self.state.lock().open_indices.clone()
    }

    pub fn start_calls(&self) -> u32 {
        self.state.lock().start_calls
    }

    pub fn stop_calls(&self) -> u32 {
        self.state.lock().stop_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.state.lock().close_calls
    }

    pub fn has_frame_subscriber(&self) -> bool {
        self.frame_cb.lock().is_some()
    }

    pub fn has_link_subscriber(&self) -> bool {
        self.link_cb.lock().is_some()
    }

    /// Deliver a raw frame to the registered callback, as the device would
    pub fn emit_frame(&self, raw: RawFrame) {
        let callback = self.frame_cb.lock().clone();
        if let Some(callback) = callback {
            callback(raw);
        }
    }

    /// Deliver a link-status change to the registered callback
    pub fn emit_link(&self, event: LinkEvent) {
        let callback = self.link_cb.lock().clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    fn ensure_open(state: &MockState, op: &'static str) -> Result<()> {
        if state.opened {
            Ok(())
        } else {
            Err(CameraError::Driver { op, code: -201 })
        }
    }
}

impl CameraDriver for MockDriver {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.state.lock().devices.clone())
    }

    fn open(&self, index: u32) -> Result<DeviceHandle> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        state.open_indices.push(index);
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(CameraError::Driver {
                op: "open",
                code: -101,
            });
        }
        if index as usize >= state.devices.len() {
            return Err(CameraError::Driver {
                op: "open",
                code: -102,
            });
        }
        state.opened = true;
        state.next_handle += 1;
        Ok(DeviceHandle::new(state.next_handle))
    }

    fn close(&self, _handle: &DeviceHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.opened = false;
        state.grabbing = false;
        Ok(())
    }

    fn get_feature(&self, _handle: &DeviceHandle, name: &str) -> Result<FeatureValue> {
        let state = self.state.lock();
        Self::ensure_open(&state, "get_feature")?;
        state
            .features
            .get(name)
            .cloned()
            .ok_or(CameraError::Driver {
                op: "get_feature",
                code: -103,
            })
    }

    fn set_feature(&self, _handle: &DeviceHandle, name: &str, value: FeatureValue) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, "set_feature")?;
        if state.rejected.contains(name) {
            return Err(CameraError::Driver {
                op: "set_feature",
                code: -104,
            });
        }
        state.features.insert(name.to_string(), value);
        Ok(())
    }

    fn execute_command(&self, _handle: &DeviceHandle, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, "execute_command")?;
        if state.rejected.contains(name) {
            return Err(CameraError::Driver {
                op: "execute_command",
                code: -105,
            });
        }
        state.commands.push(name.to_string());
        Ok(())
    }

    fn start_acquisition(&self, _handle: &DeviceHandle) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, "start_acquisition")?;
        state.start_calls += 1;
        state.grabbing = true;
        Ok(())
    }

    fn stop_acquisition(&self, _handle: &DeviceHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.stop_calls += 1;
        state.grabbing = false;
        Ok(())
    }

    fn is_grabbing(&self, _handle: &DeviceHandle) -> bool {
        let state = self.state.lock();
        state.opened && state.grabbing
    }

    fn clear_frame_buffer(&self, _handle: &DeviceHandle) -> Result<()> {
        let state = self.state.lock();
        Self::ensure_open(&state, "clear_frame_buffer")
    }

    fn subscribe_frames(&self, _handle: &DeviceHandle, callback: FrameCallback) -> Result<()> {
        *self.frame_cb.lock() = Some(Arc::new(callback));
        Ok(())
    }

    fn subscribe_link_status(&self, _handle: &DeviceHandle, callback: LinkCallback) -> Result<()> {
        *self.link_cb.lock() = Some(Arc::new(callback));
        Ok(())
    }

    fn load_profile(&self, _handle: &DeviceHandle, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, "load_profile")?;
        if state.fail_profile {
            return Err(CameraError::Driver {
                op: "load_profile",
                code: -106,
            });
        }
        state.profile_loads.push(path.to_path_buf());
        Ok(())
    }

    fn save_profile(&self, _handle: &DeviceHandle, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, "save_profile")?;
        state.profile_saves.push(path.to_path_buf());
        Ok(())
    }

    fn stream_stats(&self, _handle: &DeviceHandle) -> Result<StreamStats> {
        Ok(self.state.lock().stats)
    }

    fn reset_stats(&self, _handle: &DeviceHandle) -> Result<()> {
        self.state.lock().stats = StreamStats::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    #[test]
    fn test_feature_readback() {
        let driver = MockDriver::new().with_device("Dahua Technology", "A5131", "SN001");
        let handle = driver.open(0).unwrap();
        driver
            .set_feature(&handle, "Gamma", FeatureValue::Float(0.7))
            .unwrap();
        assert_eq!(
            driver.get_feature(&handle, "Gamma").unwrap(),
            FeatureValue::Float(0.7)
        );
    }

    #[test]
    fn test_scripted_open_failures() {
        let driver = MockDriver::new().with_device("Dahua Technology", "A5131", "SN001");
        driver.fail_next_opens(2);
        assert!(driver.open(0).is_err());
        assert!(driver.open(0).is_err());
        assert!(driver.open(0).is_ok());
        assert_eq!(driver.open_calls(), 3);
    }

    #[test]
    fn test_emit_frame_reaches_subscriber() {
        let driver = MockDriver::new().with_device("Dahua Technology", "A5131", "SN001");
        let handle = driver.open(0).unwrap();
        let seen = Arc::new(Mutex::new(0u32));
        let seen_cb = seen.clone();
        driver
            .subscribe_frames(
                &handle,
                Box::new(move |_raw| {
                    *seen_cb.lock() += 1;
                }),
            )
            .unwrap();
        driver.emit_frame(RawFrame::new(1, 1, PixelFormat::Mono8, vec![0]));
        driver.emit_frame(RawFrame::new(1, 1, PixelFormat::Mono8, vec![0]));
        assert_eq!(*seen.lock(), 2);
    }
}
