//! Device session lifecycle
//!
//! A `DeviceSession` owns one camera from discovery to teardown: it resolves
//! the device, applies configuration, wires the trigger path, pumps frames
//! into the frame channel and rides out link losses with automatic
//! reconnection. All driver access goes through the `CameraDriver` seam.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use crate::channel::FrameChannel;
use crate::config::{AcquisitionMode, CameraConfig, ConfigSource, ImagingParams};
use crate::driver::{feature, CameraDriver, DeviceHandle, FeatureValue, LinkEvent, StreamStats};
use crate::error::{CameraError, Result};
use crate::frame::{Frame, FrameImage, RawFrame};

/// Lifecycle position of a device session
///
/// `Terminated` is absorbing; every state-changing operation on a terminated
/// session fails with `SessionClosed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device bound
    Closed,
    /// Enumeration and open in progress
    Opening,
    /// Device open, stream not running
    Configuring,
    /// Stream running, frames flowing
    Grabbing,
    /// Physical link dropped, waiting for restoration
    LinkLost,
    /// Link restored, reopen and restart in progress
    Reconnecting,
    /// Session is dead
    Terminated,
}

#[derive(Default)]
struct LinkHooks {
    on_lost: Option<Arc<dyn Fn() + Send + Sync>>,
    on_restored: Option<Arc<dyn Fn() + Send + Sync>>,
}

struct SessionCore {
    state: SessionState,
    handle: Option<DeviceHandle>,
    config: CameraConfig,
    /// Enumeration index resolved at open time, reused by reconnect
    device_index: u32,
}

/// State shared between the session facade and the driver callbacks
///
/// Callbacks capture only a `Weak` to this, so a dropped session cannot be
/// kept alive (or called into) by a late driver event.
struct SessionShared {
    driver: Arc<dyn CameraDriver>,
    core: Mutex<SessionCore>,
    channel: FrameChannel,
    hooks: Mutex<LinkHooks>,
    /// Serializes link event handling so a lost/restored pair cannot race
    link_lock: Mutex<()>,
}

/// A managed session with one physical camera
pub struct DeviceSession {
    shared: Arc<SessionShared>,
}

impl DeviceSession {
    /// Create a session for the given driver and configuration
    ///
    /// Nothing touches hardware until `open` is called.
    pub fn new(driver: Arc<dyn CameraDriver>, config: CameraConfig) -> Self {
        let channel = FrameChannel::new(config.queue_capacity);
        Self {
            shared: Arc::new(SessionShared {
                driver,
                core: Mutex::new(SessionCore {
                    state: SessionState::Closed,
                    handle: None,
                    config,
                    device_index: 0,
                }),
                channel,
                hooks: Mutex::new(LinkHooks::default()),
                link_lock: Mutex::new(()),
            }),
        }
    }

    /// Resolve and open the configured device
    ///
    /// Selection order: explicit serial if one is configured, otherwise the
    /// first device matching the vendor filter, otherwise the configured
    /// enumeration index. Opening an already open session is a no-op.
    pub fn open(&self) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.state == SessionState::Terminated {
            return Err(CameraError::SessionClosed);
        }
        if core.handle.is_some() {
            log::debug!("open called on an already open session");
            return Ok(());
        }
        core.state = SessionState::Opening;

        let index = match self.resolve_device(&core) {
            Ok(index) => index,
            Err(err) => {
                core.state = SessionState::Closed;
                return Err(err);
            }
        };
        match self.shared.driver.open(index) {
            Ok(handle) => {
                log::info!("device opened at index {}", index);
                core.handle = Some(handle);
                core.device_index = index;
                core.state = SessionState::Configuring;
                Ok(())
            }
            Err(err) => {
                log::error!("device open failed: {}", err);
                core.state = SessionState::Closed;
                Err(err)
            }
        }
    }

    fn resolve_device(&self, core: &SessionCore) -> Result<u32> {
        let devices = self.shared.driver.enumerate()?;
        if devices.is_empty() {
            return Err(CameraError::NotFound("no devices enumerated".to_string()));
        }
        let config = &core.config;
        if !config.auto_select() {
            return devices
                .iter()
                .find(|d| d.serial == config.serial)
                .map(|d| d.index)
                .ok_or_else(|| CameraError::NotFound(format!("serial {}", config.serial)));
        }
        if !config.vendor_filter.is_empty() {
            return devices
                .iter()
                .find(|d| config.vendor_filter.iter().any(|v| v == &d.vendor))
                .map(|d| d.index)
                .ok_or_else(|| {
                    CameraError::NotFound(format!(
                        "no device from vendors {:?}",
                        config.vendor_filter
                    ))
                });
        }
        devices
            .get(config.index as usize)
            .map(|d| d.index)
            .ok_or_else(|| CameraError::NotFound(format!("index {}", config.index)))
    }

    /// Apply the configured parameters to the open device
    pub fn configure(&self) -> Result<()> {
        let core = self.shared.core.lock();
        if core.state == SessionState::Terminated {
            return Err(CameraError::SessionClosed);
        }
        self.shared.apply_config(&core)
    }

    /// Wire the trigger path, register callbacks and start the stream
    pub fn start(&self) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.state == SessionState::Terminated {
            return Err(CameraError::SessionClosed);
        }
        if core.state == SessionState::Grabbing {
            return Ok(());
        }
        SessionShared::start_locked(&self.shared, &mut core)
    }

    /// Open, configure and start in one call
    pub fn initiate(&self) -> Result<()> {
        self.open()?;
        self.configure()?;
        self.start()
    }

    /// Stop the stream, leaving the device open; idempotent
    pub fn stop(&self) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.state != SessionState::Grabbing {
            return Ok(());
        }
        SessionShared::stop_locked(&self.shared, &mut core)
    }

    /// Stop the stream, swap in a new configuration and start again
    pub fn reset(&self, config: CameraConfig) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.state == SessionState::Terminated {
            return Err(CameraError::SessionClosed);
        }
        if core.state == SessionState::Grabbing {
            SessionShared::stop_locked(&self.shared, &mut core)?;
        }
        core.config = config;
        self.shared.apply_config(&core)?;
        SessionShared::start_locked(&self.shared, &mut core)
    }

    /// Re-apply imaging parameters without interrupting the stream
    ///
    /// Only inline parameters can be applied live; a profile-file source is
    /// rejected before any state is touched.
    pub fn reset_lite(&self, config: CameraConfig) -> Result<()> {
        let params = match &config.source {
            ConfigSource::Inline(params) => params.clone(),
            ConfigSource::ProfileFile(_) => return Err(CameraError::UnsupportedSource),
        };
        let mut core = self.shared.core.lock();
        if core.state == SessionState::Terminated {
            return Err(CameraError::SessionClosed);
        }
        let handle = core.handle.as_ref().ok_or(CameraError::NotOpen)?;
        let mut rejected = Vec::new();
        self.shared.apply_imaging(handle, &params, &mut rejected);
        core.config.source = ConfigSource::Inline(params);
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(CameraError::FeatureRejected(rejected))
        }
    }

    /// Close and reopen the device, restarting the stream
    ///
    /// This is the synchronous form of what the link-restored handler does in
    /// the background. Retries follow the configured policy; exhaustion
    /// terminates the session.
    pub fn reconnect(&self) -> Result<()> {
        SessionShared::reconnect(&self.shared)
    }

    /// Tear the session down; the state becomes `Terminated` for good
    pub fn close(&self) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.state == SessionState::Terminated {
            return Ok(());
        }
        self.shared.channel.stop();
        let mut first_err = None;
        if core.state == SessionState::Grabbing {
            if let Some(handle) = core.handle.as_ref() {
                if let Err(err) = self.shared.driver.stop_acquisition(handle) {
                    log::warn!("stop during close failed: {}", err);
                    first_err = Some(err);
                }
            }
        }
        core.state = SessionState::Terminated;
        if let Some(handle) = core.handle.take() {
            if let Err(err) = self.shared.driver.close(&handle) {
                log::warn!("device close failed: {}", err);
                first_err = first_err.or(Some(err));
            }
        }
        log::info!("session terminated");
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Handle to the frame stream; clones share the same buffer
    pub fn frames(&self) -> FrameChannel {
        self.shared.channel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().state
    }

    pub fn config(&self) -> CameraConfig {
        self.shared.core.lock().config.clone()
    }

    /// Stream telemetry snapshot; all zeros whenever the stream is not running
    pub fn stat(&self) -> StreamStats {
        let core = self.shared.core.lock();
        if core.state != SessionState::Grabbing {
            return StreamStats::default();
        }
        let handle = match core.handle.as_ref() {
            Some(handle) => handle,
            None => return StreamStats::default(),
        };
        if !self.shared.driver.is_grabbing(handle) {
            return StreamStats::default();
        }
        match self.shared.driver.stream_stats(handle) {
            Ok(stats) => stats,
            Err(err) => {
                log::warn!("stream stats unavailable: {}", err);
                StreamStats::default()
            }
        }
    }

    /// Persist the device's current feature set to a vendor profile file
    pub fn save_profile(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let core = self.shared.core.lock();
        if core.state == SessionState::Terminated {
            return Err(CameraError::SessionClosed);
        }
        let handle = core.handle.as_ref().ok_or(CameraError::NotOpen)?;
        log::info!("saving device profile {}", path.as_ref().display());
        self.shared.driver.save_profile(handle, path.as_ref())
    }

    /// Zero the driver's telemetry counters
    pub fn reset_stat(&self) -> Result<()> {
        let core = self.shared.core.lock();
        let handle = core.handle.as_ref().ok_or(CameraError::NotOpen)?;
        self.shared.driver.reset_stats(handle)
    }

    pub fn fps(&self) -> f64 {
        self.stat().fps
    }

    /// Install a hook fired once per link loss
    pub fn on_link_lost(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.shared.hooks.lock().on_lost = Some(Arc::new(hook));
    }

    /// Install a hook fired once per link restoration
    pub fn on_link_restored(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.shared.hooks.lock().on_restored = Some(Arc::new(hook));
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.state() != SessionState::Terminated {
            if let Err(err) = self.close() {
                log::warn!("close on drop failed: {}", err);
                self.shared.channel.stop();
            }
        }
    }
}

impl SessionShared {
    /// Apply the whole configuration source to the open device
    fn apply_config(&self, core: &SessionCore) -> Result<()> {
        let handle = core.handle.as_ref().ok_or(CameraError::NotOpen)?;
        match &core.config.source {
            ConfigSource::ProfileFile(path) => {
                log::info!("loading device profile {}", path.display());
                self.driver.load_profile(handle, path)
            }
            ConfigSource::Inline(params) => {
                let mut rejected = Vec::new();
                self.try_set(
                    handle,
                    feature::WIDTH,
                    FeatureValue::Int(core.config.width),
                    &mut rejected,
                );
                self.try_set(
                    handle,
                    feature::HEIGHT,
                    FeatureValue::Int(core.config.height),
                    &mut rejected,
                );
                self.apply_imaging(handle, params, &mut rejected);
                if rejected.is_empty() {
                    Ok(())
                } else {
                    Err(CameraError::FeatureRejected(rejected))
                }
            }
        }
    }

    /// Best-effort pass over the imaging features
    ///
    /// Every feature is attempted even after a rejection. Auto modes that
    /// would override a manual value are switched off before the value is
    /// written; a failed `BalanceRatioSelector` write skips the ratio for
    /// that channel since it would land on the wrong one.
    fn apply_imaging(&self, handle: &DeviceHandle, params: &ImagingParams, rejected: &mut Vec<String>) {
        self.try_set(
            handle,
            feature::BLACK_LEVEL_AUTO,
            FeatureValue::sym("Off"),
            rejected,
        );
        self.try_set(
            handle,
            feature::BLACK_LEVEL,
            FeatureValue::Int(params.black_level),
            rejected,
        );
        self.try_set(
            handle,
            feature::BRIGHTNESS,
            FeatureValue::Int(params.brightness),
            rejected,
        );
        self.try_set(
            handle,
            feature::DIGITAL_SHIFT,
            FeatureValue::Int(params.digital_shift),
            rejected,
        );
        self.try_set(
            handle,
            feature::SHARPNESS_ENABLED,
            FeatureValue::Bool(true),
            rejected,
        );
        self.try_set(
            handle,
            feature::SHARPNESS,
            FeatureValue::Int(params.sharpness),
            rejected,
        );
        self.try_set(
            handle,
            feature::EXPOSURE_TIME,
            FeatureValue::Float(params.exposure_us),
            rejected,
        );
        self.try_set(handle, feature::GAMMA, FeatureValue::Float(params.gamma), rejected);
        self.try_set(
            handle,
            feature::GAIN_RAW,
            FeatureValue::Float(params.gain),
            rejected,
        );
        self.try_set(
            handle,
            feature::BALANCE_WHITE_AUTO,
            FeatureValue::sym("Off"),
            rejected,
        );
        for (channel, ratio) in ["Red", "Green", "Blue"].iter().zip(params.balance_ratio) {
            let selected = self
                .driver
                .set_feature(
                    handle,
                    feature::BALANCE_RATIO_SELECTOR,
                    FeatureValue::sym(*channel),
                )
                .is_ok();
            if !selected {
                log::warn!("balance ratio selector rejected channel {}", channel);
                rejected.push(format!("{}:{}", feature::BALANCE_RATIO_SELECTOR, channel));
                continue;
            }
            self.try_set(
                handle,
                feature::BALANCE_RATIO,
                FeatureValue::Float(ratio),
                rejected,
            );
        }
    }

    fn try_set(
        &self,
        handle: &DeviceHandle,
        name: &'static str,
        value: FeatureValue,
        rejected: &mut Vec<String>,
    ) {
        if let Err(err) = self.driver.set_feature(handle, name, value) {
            log::warn!("feature {} rejected: {}", name, err);
            rejected.push(name.to_string());
        }
    }

    /// Put the trigger features into the shape the acquisition mode needs
    fn wire_trigger(&self, core: &SessionCore) -> Result<()> {
        let handle = core.handle.as_ref().ok_or(CameraError::NotOpen)?;
        let driver = &self.driver;
        driver.set_feature(handle, feature::TRIGGER_SELECTOR, FeatureValue::sym("FrameStart"))?;
        match core.config.mode {
            AcquisitionMode::Continuous | AcquisitionMode::ExternallyClocked => {
                driver.set_feature(handle, feature::TRIGGER_MODE, FeatureValue::sym("Off"))?;
            }
            AcquisitionMode::ExternalTrigger => {
                driver.set_feature(handle, feature::TRIGGER_SOURCE, FeatureValue::sym("Line1"))?;
                driver.set_feature(handle, feature::TRIGGER_MODE, FeatureValue::sym("On"))?;
                driver.set_feature(
                    handle,
                    feature::TRIGGER_ACTIVATION,
                    FeatureValue::sym(core.config.trigger_edge.symbol()),
                )?;
                // Some firmware revisions lack this command; the stream still
                // runs without the counter reset.
                if let Err(err) = driver.execute_command(handle, feature::FRAME_TRIGGER_COUNT_RESET)
                {
                    log::warn!("frame trigger count reset unavailable: {}", err);
                }
            }
            AcquisitionMode::SoftwareTrigger => {
                driver.set_feature(handle, feature::TRIGGER_SOURCE, FeatureValue::sym("Software"))?;
                driver.set_feature(handle, feature::TRIGGER_MODE, FeatureValue::sym("On"))?;
            }
        }
        Ok(())
    }

    /// Register driver callbacks holding a `Weak` back-reference
    ///
    /// An externally clocked session gets no frame callback; the caller pulls
    /// frames on its own threads. Link monitoring is registered regardless.
    fn register_callbacks(shared: &Arc<Self>, core: &SessionCore) -> Result<()> {
        let handle = core.handle.as_ref().ok_or(CameraError::NotOpen)?;
        if core.config.mode != AcquisitionMode::ExternallyClocked {
            let weak: Weak<SessionShared> = Arc::downgrade(shared);
            shared.driver.subscribe_frames(
                handle,
                Box::new(move |raw| {
                    if let Some(shared) = weak.upgrade() {
                        shared.deliver_frame(raw);
                    }
                }),
            )?;
        }
        let weak: Weak<SessionShared> = Arc::downgrade(shared);
        shared.driver.subscribe_link_status(
            handle,
            Box::new(move |event| {
                if let Some(shared) = weak.upgrade() {
                    SessionShared::handle_link_event(&shared, event);
                }
            }),
        )?;
        Ok(())
    }

    /// Start the stream; the caller holds the core lock
    fn start_locked(shared: &Arc<Self>, core: &mut SessionCore) -> Result<()> {
        shared.wire_trigger(core)?;
        let handle = core.handle.as_ref().ok_or(CameraError::NotOpen)?;
        if let Err(err) = shared.driver.clear_frame_buffer(handle) {
            log::warn!("could not clear stale frames: {}", err);
        }
        SessionShared::register_callbacks(shared, core)?;
        let handle = core.handle.as_ref().ok_or(CameraError::NotOpen)?;
        shared.driver.start_acquisition(handle)?;
        core.state = SessionState::Grabbing;
        log::info!("acquisition started ({:?})", core.config.mode);
        Ok(())
    }

    fn stop_locked(shared: &Arc<Self>, core: &mut SessionCore) -> Result<()> {
        let handle = core.handle.as_ref().ok_or(CameraError::NotOpen)?;
        shared.driver.stop_acquisition(handle)?;
        core.state = SessionState::Configuring;
        log::info!("acquisition stopped");
        Ok(())
    }

    /// Stamp, canonicalize and hand off one raw frame
    fn deliver_frame(&self, raw: RawFrame) {
        let stamp = Instant::now();
        match FrameImage::from_raw(&raw) {
            Some(image) => self.channel.push(Frame::new(image, stamp)),
            None => log::warn!(
                "discarding malformed frame ({}x{}, {} bytes)",
                raw.width,
                raw.height,
                raw.data.len()
            ),
        }
    }

    /// React to a link-status change from the driver
    ///
    /// Runs on the driver's callback thread; reconnection is pushed to its
    /// own named thread so the callback returns promptly.
    fn handle_link_event(shared: &Arc<Self>, event: LinkEvent) {
        let _serial = shared.link_lock.lock();
        match event {
            LinkEvent::Lost => {
                log::warn!("camera link lost");
                {
                    let mut core = shared.core.lock();
                    if core.state == SessionState::Terminated {
                        return;
                    }
                    if let Some(handle) = core.handle.as_ref() {
                        if let Err(err) = shared.driver.stop_acquisition(handle) {
                            log::warn!("stop after link loss failed: {}", err);
                        }
                    }
                    core.state = SessionState::LinkLost;
                }
                let hook = shared.hooks.lock().on_lost.clone();
                if let Some(hook) = hook {
                    hook();
                }
            }
            LinkEvent::Restored => {
                log::info!("camera link restored, reconnecting");
                let hook = shared.hooks.lock().on_restored.clone();
                if let Some(hook) = hook {
                    hook();
                }
                {
                    let mut core = shared.core.lock();
                    if core.state == SessionState::Terminated {
                        return;
                    }
                    core.state = SessionState::Reconnecting;
                }
                let worker = Arc::clone(shared);
                let spawned = thread::Builder::new()
                    .name("camline-reconnect".to_string())
                    .spawn(move || {
                        if let Err(err) = SessionShared::reconnect(&worker) {
                            log::error!("reconnect failed: {}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("could not spawn reconnect thread: {}", err);
                }
            }
        }
    }

    /// Close and reopen the device, retrying per the configured policy
    ///
    /// Holds the core lock for the whole procedure so no other lifecycle
    /// operation can interleave with a half-reopened device. Exhausting the
    /// retry budget terminates the session and releases frame consumers.
    fn reconnect(shared: &Arc<Self>) -> Result<()> {
        let mut core = shared.core.lock();
        if core.state == SessionState::Terminated {
            return Err(CameraError::SessionClosed);
        }
        core.state = SessionState::Reconnecting;
        if let Some(handle) = core.handle.take() {
            if let Err(err) = shared.driver.close(&handle) {
                log::warn!("closing stale handle failed: {}", err);
            }
        }

        let retry = core.config.retry.clone();
        for attempt in 1..=retry.max_attempts {
            log::info!("reconnect attempt {}/{}", attempt, retry.max_attempts);
            match shared.driver.open(core.device_index) {
                Ok(handle) => {
                    core.handle = Some(handle);
                    match Self::restart_locked(shared, &mut core) {
                        Ok(()) => {
                            log::info!("reconnected after {} attempt(s)", attempt);
                            return Ok(());
                        }
                        Err(err) => {
                            log::error!("restart after reopen failed: {}", err);
                            core.state = SessionState::Terminated;
                            shared.channel.stop();
                            return Err(err);
                        }
                    }
                }
                Err(err) => {
                    log::warn!("reopen failed: {}", err);
                }
            }
            if attempt < retry.max_attempts {
                thread::sleep(retry.backoff());
            }
        }
        core.state = SessionState::Terminated;
        shared.channel.stop();
        Err(CameraError::ReconnectExhausted {
            attempts: retry.max_attempts,
        })
    }

    fn restart_locked(shared: &Arc<Self>, core: &mut SessionCore) -> Result<()> {
        shared.apply_config(core)?;
        Self::start_locked(shared, core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, TriggerEdge};
    use crate::driver::mock::MockDriver;
    use crate::frame::PixelFormat;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn dahua_driver() -> Arc<MockDriver> {
        Arc::new(MockDriver::new().with_device("Dahua Technology", "A5131", "SN001"))
    }

    fn wait_for_state(session: &DeviceSession, wanted: SessionState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.state() != wanted {
            assert!(Instant::now() < deadline, "timed out waiting for {:?}", wanted);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_open_skips_foreign_vendor() {
        let driver = Arc::new(
            MockDriver::new()
                .with_device("Basler", "acA1300", "B0001")
                .with_device("Dahua Technology", "A5131", "SN001"),
        );
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.open().unwrap();
        assert_eq!(session.state(), SessionState::Configuring);
        assert_eq!(driver.open_indices(), vec![1]);
    }

    #[test]
    fn test_open_by_serial() {
        let driver = Arc::new(
            MockDriver::new()
                .with_device("Dahua Technology", "A5131", "SN001")
                .with_device("Dahua Technology", "A5131", "SN002"),
        );
        let session =
            DeviceSession::new(driver.clone(), CameraConfig::new().with_serial("SN002"));
        session.open().unwrap();
        assert_eq!(driver.open_indices(), vec![1]);
    }

    #[test]
    fn test_open_by_index_when_filter_empty() {
        let driver = Arc::new(
            MockDriver::new()
                .with_device("Basler", "acA1300", "B0001")
                .with_device("Basler", "acA1300", "B0002"),
        );
        let session = DeviceSession::new(driver.clone(), CameraConfig::new().with_index(1));
        session.open().unwrap();
        assert_eq!(driver.open_indices(), vec![1]);
    }

    #[test]
    fn test_open_without_devices_reverts_to_closed() {
        let driver = Arc::new(MockDriver::new());
        let session = DeviceSession::new(driver, CameraConfig::new());
        match session.open() {
            Err(CameraError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_configure_applies_inline_features() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.open().unwrap();
        session.configure().unwrap();

        assert_eq!(driver.feature(feature::WIDTH), Some(FeatureValue::Int(1280)));
        assert_eq!(driver.feature(feature::HEIGHT), Some(FeatureValue::Int(1024)));
        assert_eq!(
            driver.feature(feature::BLACK_LEVEL_AUTO),
            Some(FeatureValue::sym("Off"))
        );
        assert_eq!(driver.feature(feature::BLACK_LEVEL), Some(FeatureValue::Int(20)));
        assert_eq!(
            driver.feature(feature::SHARPNESS_ENABLED),
            Some(FeatureValue::Bool(true))
        );
        assert_eq!(driver.feature(feature::GAMMA), Some(FeatureValue::Float(0.7)));
        assert_eq!(
            driver.feature(feature::BALANCE_WHITE_AUTO),
            Some(FeatureValue::sym("Off"))
        );
        // The selector ends on the last channel of the loop.
        assert_eq!(
            driver.feature(feature::BALANCE_RATIO_SELECTOR),
            Some(FeatureValue::sym("Blue"))
        );
        assert_eq!(
            driver.feature(feature::BALANCE_RATIO),
            Some(FeatureValue::Float(1.0))
        );
    }

    #[test]
    fn test_configure_reports_every_rejection() {
        let driver = dahua_driver();
        driver.reject_feature(feature::GAMMA);
        driver.reject_feature(feature::GAIN_RAW);
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.open().unwrap();

        match session.configure() {
            Err(CameraError::FeatureRejected(names)) => {
                assert!(names.contains(&feature::GAMMA.to_string()));
                assert!(names.contains(&feature::GAIN_RAW.to_string()));
            }
            other => panic!("expected FeatureRejected, got {:?}", other.map(|_| ())),
        }
        // Features after the rejected ones were still attempted.
        assert_eq!(
            driver.feature(feature::BALANCE_RATIO),
            Some(FeatureValue::Float(1.0))
        );
    }

    #[test]
    fn test_configure_with_profile_file() {
        let driver = dahua_driver();
        let session = DeviceSession::new(
            driver.clone(),
            CameraConfig::new().with_profile("profiles/lab.mvcfg"),
        );
        session.open().unwrap();
        session.configure().unwrap();
        assert_eq!(driver.profile_loads().len(), 1);
        // Inline features are not written when a profile is the source.
        assert!(driver.feature(feature::GAMMA).is_none());
    }

    #[test]
    fn test_save_profile_needs_an_open_device() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        match session.save_profile("snapshot.mvcfg") {
            Err(CameraError::NotOpen) => {}
            other => panic!("expected NotOpen, got {:?}", other.map(|_| ())),
        }
        session.open().unwrap();
        session.save_profile("snapshot.mvcfg").unwrap();
        assert_eq!(driver.profile_saves().len(), 1);
    }

    #[test]
    fn test_start_wires_continuous_trigger() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.initiate().unwrap();
        assert_eq!(session.state(), SessionState::Grabbing);
        assert_eq!(
            driver.feature(feature::TRIGGER_SELECTOR),
            Some(FeatureValue::sym("FrameStart"))
        );
        assert_eq!(
            driver.feature(feature::TRIGGER_MODE),
            Some(FeatureValue::sym("Off"))
        );
        assert!(driver.has_frame_subscriber());
        assert!(driver.has_link_subscriber());
    }

    #[test]
    fn test_start_wires_line_trigger() {
        let driver = dahua_driver();
        let mut config = CameraConfig::new().with_mode(AcquisitionMode::ExternalTrigger);
        config.trigger_edge = TriggerEdge::Falling;
        let session = DeviceSession::new(driver.clone(), config);
        session.initiate().unwrap();

        assert_eq!(
            driver.feature(feature::TRIGGER_SOURCE),
            Some(FeatureValue::sym("Line1"))
        );
        assert_eq!(
            driver.feature(feature::TRIGGER_MODE),
            Some(FeatureValue::sym("On"))
        );
        assert_eq!(
            driver.feature(feature::TRIGGER_ACTIVATION),
            Some(FeatureValue::sym("FallingEdge"))
        );
        assert!(driver
            .executed_commands()
            .contains(&feature::FRAME_TRIGGER_COUNT_RESET.to_string()));
    }

    #[test]
    fn test_missing_trigger_count_reset_is_tolerated() {
        let driver = dahua_driver();
        driver.reject_feature(feature::FRAME_TRIGGER_COUNT_RESET);
        let session = DeviceSession::new(
            driver,
            CameraConfig::new().with_mode(AcquisitionMode::ExternalTrigger),
        );
        session.initiate().unwrap();
        assert_eq!(session.state(), SessionState::Grabbing);
    }

    #[test]
    fn test_externally_clocked_has_no_frame_callback() {
        let driver = dahua_driver();
        let session = DeviceSession::new(
            driver.clone(),
            CameraConfig::new().with_mode(AcquisitionMode::ExternallyClocked),
        );
        session.initiate().unwrap();
        assert_eq!(session.state(), SessionState::Grabbing);
        assert!(!driver.has_frame_subscriber());
        assert!(driver.has_link_subscriber());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.initiate().unwrap();
        session.stop().unwrap();
        session.stop().unwrap();
        assert_eq!(driver.stop_calls(), 1);
        assert_eq!(session.state(), SessionState::Configuring);
    }

    #[test]
    fn test_frames_reach_the_channel() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.initiate().unwrap();

        driver.emit_frame(RawFrame::new(2, 1, PixelFormat::Mono8, vec![10, 20]));
        let frame = session.frames().try_pop().unwrap();
        assert_eq!(frame.image().pixel(0, 0), Some([10, 10, 10]));
        assert_eq!(frame.image().pixel(1, 0), Some([20, 20, 20]));
    }

    #[test]
    fn test_newest_frame_wins_at_capacity_one() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.initiate().unwrap();

        for tag in [1u8, 2, 3] {
            driver.emit_frame(RawFrame::new(1, 1, PixelFormat::Mono8, vec![tag]));
        }
        let channel = session.frames();
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.try_pop().unwrap().image().data[0], 3);
    }

    #[test]
    fn test_malformed_frame_is_discarded() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.initiate().unwrap();

        driver.emit_frame(RawFrame::new(100, 100, PixelFormat::Bgr8, vec![0; 7]));
        assert!(session.frames().try_pop().is_none());
    }

    #[test]
    fn test_reset_lite_rejects_profile_source() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver, CameraConfig::new());
        session.initiate().unwrap();

        let profile = CameraConfig::new().with_profile("profiles/lab.mvcfg");
        match session.reset_lite(profile) {
            Err(CameraError::UnsupportedSource) => {}
            other => panic!("expected UnsupportedSource, got {:?}", other.map(|_| ())),
        }
        assert_eq!(session.state(), SessionState::Grabbing);
    }

    #[test]
    fn test_reset_lite_applies_without_restart() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.initiate().unwrap();

        let mut params = ImagingParams::default();
        params.exposure_us = 5000.0;
        session
            .reset_lite(CameraConfig::new().with_params(params))
            .unwrap();
        assert_eq!(
            driver.feature(feature::EXPOSURE_TIME),
            Some(FeatureValue::Float(5000.0))
        );
        assert_eq!(driver.stop_calls(), 0);
        assert_eq!(driver.start_calls(), 1);
        assert_eq!(session.state(), SessionState::Grabbing);
    }

    #[test]
    fn test_reset_restarts_the_stream() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.initiate().unwrap();

        session
            .reset(CameraConfig::new().with_geometry(640, 480))
            .unwrap();
        assert_eq!(driver.feature(feature::WIDTH), Some(FeatureValue::Int(640)));
        assert_eq!(driver.stop_calls(), 1);
        assert_eq!(driver.start_calls(), 2);
        assert_eq!(session.state(), SessionState::Grabbing);
    }

    #[test]
    fn test_link_lost_fires_hook_once() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        let losses = Arc::new(AtomicU32::new(0));
        let counter = losses.clone();
        session.on_link_lost(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        session.initiate().unwrap();

        driver.emit_link(LinkEvent::Lost);
        assert_eq!(losses.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::LinkLost);
        assert_eq!(driver.stop_calls(), 1);
    }

    #[test]
    fn test_link_restored_reconnects_in_background() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.initiate().unwrap();

        driver.emit_link(LinkEvent::Lost);
        driver.emit_link(LinkEvent::Restored);
        wait_for_state(&session, SessionState::Grabbing);
        assert_eq!(driver.open_calls(), 2);
        assert_eq!(driver.open_indices(), vec![0, 0]);
        // The stream was fully restarted after reopening.
        assert_eq!(driver.start_calls(), 2);
    }

    #[test]
    fn test_reconnect_exhaustion_terminates_session() {
        let driver = dahua_driver();
        let config = CameraConfig::new().with_retry(RetryPolicy {
            max_attempts: 2,
            backoff_ms: 1,
        });
        let session = DeviceSession::new(driver.clone(), config);
        session.initiate().unwrap();

        driver.fail_next_opens(10);
        driver.emit_link(LinkEvent::Lost);
        driver.emit_link(LinkEvent::Restored);
        wait_for_state(&session, SessionState::Terminated);

        assert!(session.frames().is_stopped());
        match session.start() {
            Err(CameraError::SessionClosed) => {}
            other => panic!("expected SessionClosed, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_synchronous_reconnect_retries_until_success() {
        let driver = dahua_driver();
        let config = CameraConfig::new().with_retry(RetryPolicy {
            max_attempts: 5,
            backoff_ms: 1,
        });
        let session = DeviceSession::new(driver.clone(), config);
        session.initiate().unwrap();

        driver.fail_next_opens(2);
        session.reconnect().unwrap();
        assert_eq!(session.state(), SessionState::Grabbing);
        // Initial open plus two failed and one successful reopen.
        assert_eq!(driver.open_calls(), 4);
    }

    #[test]
    fn test_stat_is_zero_unless_grabbing() {
        let driver = dahua_driver();
        driver.set_stats(StreamStats {
            good_frames: 500,
            fps: 120.0,
            ..StreamStats::default()
        });
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.open().unwrap();
        session.configure().unwrap();
        assert_eq!(session.stat(), StreamStats::default());

        session.start().unwrap();
        let stats = session.stat();
        assert_eq!(stats.good_frames, 500);
        assert!((session.fps() - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_close_terminates_for_good() {
        let driver = dahua_driver();
        let session = DeviceSession::new(driver.clone(), CameraConfig::new());
        session.initiate().unwrap();
        session.close().unwrap();

        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(driver.close_calls(), 1);
        assert!(session.frames().is_stopped());
        match session.open() {
            Err(CameraError::SessionClosed) => {}
            other => panic!("expected SessionClosed, got {:?}", other.map(|_| ())),
        }
        // close is idempotent
        session.close().unwrap();
        assert_eq!(driver.close_calls(), 1);
    }

    #[test]
    fn test_drop_closes_the_device() {
        let driver = dahua_driver();
        {
            let session = DeviceSession::new(driver.clone(), CameraConfig::new());
            session.initiate().unwrap();
        }
        assert_eq!(driver.close_calls(), 1);
    }

    #[test]
    fn test_late_frame_after_drop_is_ignored() {
        let driver = dahua_driver();
        {
            let session = DeviceSession::new(driver.clone(), CameraConfig::new());
            session.initiate().unwrap();
        }
        // The callback holds only a Weak; this must not panic or deliver.
        driver.emit_frame(RawFrame::new(1, 1, PixelFormat::Mono8, vec![1]));
    }
}
