//! camline - industrial area-scan camera acquisition pipeline
//!
//! The crate manages one camera per `DeviceSession`: device discovery and
//! selection, feature configuration, trigger wiring, a bounded latest-wins
//! frame channel between the driver callback and consumers, automatic
//! reconnection after link loss, and per-class IoU deduplication of
//! downstream detections.
//!
//! Hardware access is abstracted behind the [`driver::CameraDriver`] trait;
//! [`driver::mock::MockDriver`] stands in for the vendor SDK in tests.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use camline::{CameraConfig, DeviceSession};
//! use camline::driver::mock::MockDriver;
//!
//! let driver = Arc::new(MockDriver::new().with_device(
//!     "Dahua Technology",
//!     "A5131",
//!     "SN001",
//! ));
//! let session = DeviceSession::new(driver, CameraConfig::new());
//! session.initiate()?;
//!
//! let frames = session.frames();
//! while let Some(frame) = frames.pop() {
//!     // hand the frame to the inference stage
//!     let _ = frame.image();
//! }
//! # Ok::<(), camline::CameraError>(())
//! ```

pub mod channel;
pub mod config;
pub mod detect;
pub mod driver;
pub mod error;
pub mod frame;
pub mod session;

pub use channel::FrameChannel;
pub use config::{
    AcquisitionMode, CameraConfig, ConfigSource, ImagingParams, RetryPolicy, TriggerEdge,
};
pub use detect::{BoundingBox, Deduplicator, Detection, Detector, Point};
pub use driver::{CameraDriver, DeviceDescriptor, LinkEvent, StreamStats};
pub use error::{CameraError, Result};
pub use frame::{Frame, FrameImage, PixelFormat, RawFrame};
pub use session::{DeviceSession, SessionState};
