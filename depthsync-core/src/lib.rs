#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod builder;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod pixel_format;
pub mod telemetry;
pub mod time;
pub mod topology;
pub mod traits;
pub mod validate;

pub mod prelude {
    pub use crate::builder::{ColorResolution, DepthMode, DeviceConfiguration, Fps, WiredSyncMode};
    pub use crate::error::{CameraError, ConfigurationError, Result};
    pub use crate::frame::{Capture, Image, ImuSample, Timestamp};
    pub use crate::pixel_format::ImageFormat;
    pub use crate::topology::{SyncDecision, SyncJacks, SyncViolation};
    pub use crate::traits::{Device, Driver};
    pub use crate::validate::ConfigViolation;
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
